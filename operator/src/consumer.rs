/// Sequencer consumption loop
///
/// Streams events from the last processed offset, verifies each against the
/// local roster and records the accepted ones. The offset is persisted only
/// after an event has been handled, so a restart re-delivers at most the
/// event that was in flight.

use crate::sequencer::SequencerClient;
use crate::store::{AttestationStore, StoreError};
use attestation::{AttestationEvent, EventVerifier};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How one delivered event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Verified, but already recorded
    Duplicate,
    Rejected,
    /// Offset at or below what was already processed
    Stale,
}

pub struct EventConsumer {
    verifier: EventVerifier,
    store: Arc<AttestationStore>,
    sequencer: Arc<dyn SequencerClient>,
    retry_delay: Duration,
}

impl EventConsumer {
    pub fn new(
        verifier: EventVerifier,
        store: Arc<AttestationStore>,
        sequencer: Arc<dyn SequencerClient>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            verifier,
            store,
            sequencer,
            retry_delay,
        }
    }

    /// Handle the event delivered at `offset`
    pub fn process(&self, offset: u64, event: &AttestationEvent) -> Result<Disposition, StoreError> {
        if offset <= self.store.last_offset()? {
            return Ok(Disposition::Stale);
        }

        if !self.verifier.verify(event) {
            self.store.advance_offset(offset)?;
            return Ok(Disposition::Rejected);
        }

        if self.store.record(offset, event)? {
            info!("Accepted downtime attestation for {} at offset {}", event.claim, offset);
            Ok(Disposition::Accepted)
        } else {
            Ok(Disposition::Duplicate)
        }
    }

    /// Consume until shutdown. Only store failures end the loop early.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        loop {
            let from = self.store.last_offset()?;
            info!("Consuming sequencer events after offset {}", from);
            let mut events = self.sequencer.stream_since(from);

            loop {
                tokio::select! {
                    item = events.next() => match item {
                        Some(Ok((event, offset))) => {
                            self.process(offset, &event)?;
                        }
                        Some(Err(e)) => {
                            warn!("Sequencer stream failed: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => return Ok(()),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}
