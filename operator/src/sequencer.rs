/// Sequencer adapters
///
/// The sequencer is an external ordering service: finalized events go in,
/// and every subscriber reads them back in the same order, each tagged with
/// a strictly increasing offset. Offsets start at 1; `stream_since(0)`
/// replays everything.

use async_trait::async_trait;
use attestation::AttestationEvent;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Sequencer unreachable: {0}")]
    Transport(String),
    #[error("Sequencer rejected request: HTTP {0}")]
    Rejected(u16),
    #[error("Malformed sequencer response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, SequencerError>;

/// Ordered events after a given offset
pub type EventStream = BoxStream<'static, Result<(AttestationEvent, u64)>>;

#[async_trait]
pub trait SequencerClient: Send + Sync {
    async fn submit(&self, event: &AttestationEvent) -> Result<()>;

    /// Events with offsets strictly greater than `offset`, in order. Ends
    /// only after yielding a transport error.
    fn stream_since(&self, offset: u64) -> EventStream;
}

#[derive(Default)]
struct MemoryLog {
    events: RwLock<Vec<AttestationEvent>>,
    appended: Notify,
}

/// In-process ordered log
#[derive(Clone, Default)]
pub struct MemorySequencer {
    log: Arc<MemoryLog>,
}

impl MemorySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the newest event; 0 when empty
    pub async fn head(&self) -> u64 {
        self.log.events.read().await.len() as u64
    }
}

#[async_trait]
impl SequencerClient for MemorySequencer {
    async fn submit(&self, event: &AttestationEvent) -> Result<()> {
        let offset = {
            let mut events = self.log.events.write().await;
            events.push(event.clone());
            events.len()
        };
        debug!("Sequenced {} at offset {}", event.claim, offset);
        self.log.appended.notify_waiters();
        Ok(())
    }

    fn stream_since(&self, offset: u64) -> EventStream {
        stream::unfold(
            (Arc::clone(&self.log), offset),
            |(log, offset)| async move {
                loop {
                    // Registered before the length check so no append is missed
                    let appended = log.appended.notified();
                    {
                        let events = log.events.read().await;
                        if let Some(event) = events.get(offset as usize) {
                            let next = offset + 1;
                            return Some((Ok((event.clone(), next)), (log.clone(), next)));
                        }
                    }
                    appended.await;
                }
            },
        )
        .boxed()
    }
}

/// One entry of `GET /apps/{app}/events`
#[derive(Debug, Serialize, Deserialize)]
struct RawEntry {
    index: u64,
    event: serde_json::Value,
}

/// HTTP sequencer client, polling for new events
#[derive(Clone)]
pub struct HttpSequencer {
    client: Client,
    events_url: String,
    poll_interval: Duration,
}

impl HttpSequencer {
    pub fn new(base_url: &str, app: &str, poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SequencerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            events_url: format!("{}/apps/{}/events", base_url.trim_end_matches('/'), app),
            poll_interval,
        })
    }

    /// Fetch entries after `offset`, dropping ones that do not decode.
    /// Also returns the highest index examined, decodable or not.
    async fn fetch(&self, offset: u64) -> Result<(Vec<(AttestationEvent, u64)>, u64)> {
        let response = self
            .client
            .get(&self.events_url)
            .query(&[("after", offset)])
            .send()
            .await
            .map_err(|e| SequencerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SequencerError::Rejected(status.as_u16()));
        }
        let entries: Vec<RawEntry> = response
            .json()
            .await
            .map_err(|e| SequencerError::Malformed(e.to_string()))?;

        let mut decoded = Vec::with_capacity(entries.len());
        let mut last = offset;
        for entry in entries {
            if entry.index <= last {
                warn!("Ignoring out-of-order sequencer entry {} after {}", entry.index, last);
                continue;
            }
            last = entry.index;
            match serde_json::from_value::<AttestationEvent>(entry.event) {
                Ok(event) => decoded.push((event, entry.index)),
                Err(e) => warn!("Skipping undecodable event at offset {}: {}", entry.index, e),
            }
        }
        Ok((decoded, last))
    }
}

struct PollState {
    sequencer: HttpSequencer,
    offset: u64,
    pending: VecDeque<(AttestationEvent, u64)>,
    failed: bool,
}

#[async_trait]
impl SequencerClient for HttpSequencer {
    async fn submit(&self, event: &AttestationEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.events_url)
            .json(event)
            .send()
            .await
            .map_err(|e| SequencerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SequencerError::Rejected(status.as_u16()));
        }
        Ok(())
    }

    fn stream_since(&self, offset: u64) -> EventStream {
        let state = PollState {
            sequencer: self.clone(),
            offset,
            pending: VecDeque::new(),
            failed: false,
        };
        stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            loop {
                if let Some((event, offset)) = state.pending.pop_front() {
                    return Some((Ok((event, offset)), state));
                }
                match state.sequencer.fetch(state.offset).await {
                    Ok((batch, last)) => {
                        state.offset = last;
                        if batch.is_empty() {
                            tokio::time::sleep(state.sequencer.poll_interval).await;
                        }
                        state.pending.extend(batch);
                    }
                    Err(e) => {
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }
}
