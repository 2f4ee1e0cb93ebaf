//! Streaming-text reconciliation.
//!
//! Providers emit partially-transcribed text chunks interleaved with
//! completion signals that are not reliably ordered. This module collapses
//! that stream into exactly one finalized string per request. The reconciler
//! is a single async fn with one return point, so "exactly one finalization"
//! holds structurally: whichever trigger fires first returns, and the other
//! timers simply never get polled again.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// One increment of streamed provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    /// Provider-native turn-completion signal. Arms the settle timer; does
    /// not finalize by itself because trailing chunks may still race it.
    pub completed: bool,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }

    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: true,
        }
    }
}

/// Timer budgets for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Overall deadline for the whole request.
    pub request_timeout: Duration,
    /// Uninterrupted quiet period treated as evidence the stream ended.
    pub silence_window: Duration,
    /// Wait after an explicit `completed` flag for trailing chunks.
    pub settle_delay: Duration,
    /// Accumulated-length cap; crossing it finalizes immediately.
    pub max_chars: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            silence_window: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(300),
            max_chars: 280,
        }
    }
}

/// Returned when a stream finalizes without ever accumulating text.
pub const EMPTY_STREAM_FALLBACK: &str =
    "I didn't catch a full response there. Could you ask that again?";

/// Connection and session-status chatter that must never reach the answer.
const SYSTEM_STATUS_MARKERS: &[&str] = &[
    "connection established",
    "session ready",
    "setup complete",
    "voice connection",
    "reconnecting",
];

pub(crate) fn is_system_status(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SYSTEM_STATUS_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Appends a chunk, inserting a separating space only when both sides need
/// one. Plain concatenation otherwise, so finalized text is the chunks in
/// arrival order.
fn append_chunk(buffer: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    let needs_space = !buffer.is_empty()
        && !buffer.ends_with(char::is_whitespace)
        && !text.starts_with(char::is_whitespace)
        && buffer.chars().last().is_some_and(char::is_alphanumeric)
        && text.chars().next().is_some_and(char::is_alphanumeric);
    if needs_space {
        buffer.push(' ');
    }
    buffer.push_str(text);
}

/// Collapses a chunk stream into one finalized string.
///
/// Completion triggers, first-wins:
/// 1. the silence window elapses with nonempty accumulated text,
/// 2. an explicit `completed` flag was seen and the settle delay elapses
///    with nonempty text,
/// 3. accumulated length crosses the hard cap,
/// 4. the overall request timeout elapses,
/// 5. the producer closes the channel.
///
/// If nothing was accumulated, returns [`EMPTY_STREAM_FALLBACK`] rather
/// than an empty string.
pub async fn reconcile(mut rx: mpsc::Receiver<StreamChunk>, config: &ReconcileConfig) -> String {
    let deadline = Instant::now() + config.request_timeout;
    let mut buffer = String::new();
    let mut silence_at: Option<Instant> = None;
    let mut settle_at: Option<Instant> = None;

    loop {
        // Copies taken before select! so the timer arms can be disarmed
        // from the chunk arm without borrow conflicts.
        let silence_fires = silence_at.unwrap_or(deadline);
        let settle_fires = settle_at.unwrap_or(deadline);

        tokio::select! {
            _ = sleep_until(deadline) => {
                debug!("Reconciliation hit the overall request timeout");
                break;
            }
            _ = sleep_until(silence_fires), if silence_at.is_some() => {
                if buffer.is_empty() {
                    silence_at = None;
                } else {
                    debug!(chars = buffer.len(), "Silence window elapsed; finalizing");
                    break;
                }
            }
            _ = sleep_until(settle_fires), if settle_at.is_some() => {
                if buffer.is_empty() {
                    settle_at = None;
                } else {
                    debug!(chars = buffer.len(), "Completion signal settled; finalizing");
                    break;
                }
            }
            maybe_chunk = rx.recv() => {
                match maybe_chunk {
                    None => {
                        debug!("Chunk stream closed by producer");
                        break;
                    }
                    Some(chunk) => {
                        if is_system_status(&chunk.text) {
                            debug!(chunk = %chunk.text, "Ignoring system-status chunk");
                        } else {
                            append_chunk(&mut buffer, &chunk.text);
                            if buffer.chars().count() >= config.max_chars {
                                debug!(chars = buffer.len(), "Hard length cap crossed; finalizing");
                                break;
                            }
                            silence_at = Some(Instant::now() + config.silence_window);
                        }
                        if chunk.completed {
                            settle_at = Some(Instant::now() + config.settle_delay);
                        }
                    }
                }
            }
        }
    }

    if buffer.trim().is_empty() {
        EMPTY_STREAM_FALLBACK.to_string()
    } else {
        buffer
    }
}
