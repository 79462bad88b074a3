//! Deadline-bounded streaming delivery.
//!
//! `Idle → Streaming → Completed | TimedOut | Errored`, plus `Cancelled`
//! when the receiving side goes away. Content flows through an
//! `mpsc::Sender<DeliveryEvent>`; the consumer owns the transport, and
//! dropping its receiver stops delivery at the next await point.
//!
//! The deadline is absolute (measured from request start, not stream
//! start). It is checked before every emission and raced against the wait
//! for the next chunk. A breach ends the stream with `Done{timed_out}`;
//! the caller never sees an error mid-stream.

use auspex_core::error::ProviderError;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

/// Sent as the last chunk when the source fails mid-stream.
pub const APOLOGY: &str =
    "Sorry, something went wrong while preparing the rest of this answer. Please try again.";

/// A source of answer fragments.
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

/// How a stream ended, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Completed,
    TimedOut,
    Errored,
}

/// Delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Idle,
    Streaming,
    Completed,
    TimedOut,
    Errored,
    /// The receiver was dropped; nothing more is sent.
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Idle | DeliveryState::Streaming)
    }
}

/// Events pushed to the consumer. SSE event names match [`DeliveryEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// A fragment of the answer.
    Chunk { content: String },
    /// The stream is finished; nothing follows.
    Done { status: DeliveryStatus },
}

impl DeliveryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
        }
    }
}

/// Summary of one delivery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub state: DeliveryState,
    pub chunks_sent: usize,
    pub chars_sent: usize,
}

/// Drives one source into one sender under a deadline.
pub struct StreamDelivery {
    state: DeliveryState,
    chunks_sent: usize,
    chars_sent: usize,
}

impl StreamDelivery {
    fn new() -> Self {
        Self {
            state: DeliveryState::Idle,
            chunks_sent: 0,
            chars_sent: 0,
        }
    }

    fn transition(&mut self, next: DeliveryState) {
        debug_assert!(!self.state.is_terminal(), "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn outcome(&self) -> DeliveryOutcome {
        DeliveryOutcome {
            state: self.state,
            chunks_sent: self.chunks_sent,
            chars_sent: self.chars_sent,
        }
    }

    async fn finish(
        &mut self,
        sender: &mpsc::Sender<DeliveryEvent>,
        state: DeliveryState,
        status: DeliveryStatus,
    ) -> DeliveryOutcome {
        self.transition(state);
        // A closed receiver here is harmless: the stream is over either way.
        let _ = sender.send(DeliveryEvent::Done { status }).await;
        self.outcome()
    }

    /// Deliver `source` until it ends, fails, the deadline passes or the
    /// receiver closes.
    pub async fn run<S>(
        mut source: S,
        deadline: Instant,
        sender: &mpsc::Sender<DeliveryEvent>,
    ) -> DeliveryOutcome
    where
        S: Stream<Item = Result<String, ProviderError>> + Unpin,
    {
        let mut delivery = Self::new();
        delivery.transition(DeliveryState::Streaming);

        loop {
            if Instant::now() >= deadline {
                return delivery
                    .finish(sender, DeliveryState::TimedOut, DeliveryStatus::TimedOut)
                    .await;
            }

            let next = tokio::select! {
                biased;
                _ = sender.closed() => {
                    debug!("Receiver closed; stopping delivery");
                    delivery.transition(DeliveryState::Cancelled);
                    return delivery.outcome();
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return delivery
                        .finish(sender, DeliveryState::TimedOut, DeliveryStatus::TimedOut)
                        .await;
                }
                item = source.next() => item,
            };

            match next {
                None => {
                    return delivery
                        .finish(sender, DeliveryState::Completed, DeliveryStatus::Completed)
                        .await;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Answer source failed mid-stream");
                    let _ = sender
                        .send(DeliveryEvent::Chunk {
                            content: APOLOGY.to_string(),
                        })
                        .await;
                    return delivery
                        .finish(sender, DeliveryState::Errored, DeliveryStatus::Errored)
                        .await;
                }
                Some(Ok(content)) => {
                    if content.is_empty() {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return delivery
                            .finish(sender, DeliveryState::TimedOut, DeliveryStatus::TimedOut)
                            .await;
                    }
                    let chars = content.chars().count();
                    if sender.send(DeliveryEvent::Chunk { content }).await.is_err() {
                        delivery.transition(DeliveryState::Cancelled);
                        return delivery.outcome();
                    }
                    delivery.chunks_sent += 1;
                    delivery.chars_sent += chars;
                }
            }
        }
    }
}

/// Split on word boundaries into pieces of at least `chunk_chars`
/// characters (the last may be shorter). Concatenating the pieces
/// reproduces `text` exactly.
pub fn split_words(text: &str, chunk_chars: usize) -> Vec<String> {
    let target = chunk_chars.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for word in text.split_inclusive(char::is_whitespace) {
        current.push_str(word);
        current_chars += word.chars().count();
        if current_chars >= target {
            pieces.push(std::mem::take(&mut current));
            current_chars = 0;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Turn a finished answer into a paced stream: one piece immediately, then
/// one every `delay`.
pub fn chunk_text(text: &str, chunk_chars: usize, delay: Duration) -> ChunkStream {
    let pieces = split_words(text, chunk_chars);
    stream::iter(pieces.into_iter().enumerate())
        .then(move |(index, piece)| async move {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(piece)
        })
        .boxed()
}
