//! Single owner of the relay lifecycle.
//!
//! Every terminal trigger (sentinel, natural end, cancellation, error) goes
//! through [`TerminationController::fire`]. Only the first one moves the relay
//! out of `Streaming`; the rest are no-ops. Cleanup then runs once in
//! [`TerminationController::shutdown`]: the upstream body is dropped, the
//! downstream sink is closed or aborted, and the state settles on `Closed` or
//! `Failed`. Writes are only accepted while `Streaming`.

use std::fmt;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use crate::error::{RelayError, SinkError};
use crate::sink::DownstreamSink;

/// Upstream response body as a stream of chunks.
pub type UpstreamBody = BoxStream<'static, Result<Bytes, RelayError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason the relay stopped streaming.
#[derive(Debug)]
pub enum Trigger {
    Sentinel,
    /// Upstream closed the body without sending the sentinel.
    NaturalEnd,
    /// The downstream consumer went away.
    Cancelled,
    Error(RelayError),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sentinel => "sentinel",
            Self::NaturalEnd => "natural_end",
            Self::Cancelled => "cancelled",
            Self::Error(_) => "error",
        }
    }
}

/// Result of one upstream read.
#[derive(Debug)]
pub enum UpstreamRead {
    Chunk(Bytes),
    End,
    Failed(RelayError),
    Cancelled,
}

pub struct TerminationController<K> {
    state: RelayState,
    cause: Option<Trigger>,
    upstream: Option<UpstreamBody>,
    sink: K,
    terminator: Option<Bytes>,
}

impl<K: DownstreamSink> TerminationController<K> {
    /// `terminator` is written before closing on a clean completion.
    pub fn new(upstream: UpstreamBody, sink: K, terminator: Option<Bytes>) -> Self {
        Self {
            state: RelayState::Streaming,
            cause: None,
            upstream: Some(upstream),
            sink,
            terminator,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == RelayState::Streaming
    }

    pub fn cause(&self) -> Option<&Trigger> {
        self.cause.as_ref()
    }

    pub fn take_cause(&mut self) -> Option<Trigger> {
        self.cause.take()
    }

    /// Record a terminal trigger. Returns `true` only for the first one.
    pub fn fire(&mut self, trigger: Trigger) -> bool {
        if self.state != RelayState::Streaming {
            debug!(
                trigger = trigger.name(),
                state = %self.state,
                "Ignoring trigger after close"
            );
            return false;
        }

        debug!(trigger = trigger.name(), "Relay closing");
        self.state = RelayState::Closing;
        self.cause = Some(trigger);
        true
    }

    /// Wait for the next upstream chunk, or for the consumer to disappear.
    pub async fn read(&mut self) -> UpstreamRead {
        if !self.is_streaming() {
            return UpstreamRead::End;
        }
        let Some(upstream) = self.upstream.as_mut() else {
            return UpstreamRead::End;
        };

        tokio::select! {
            biased;
            _ = self.sink.closed() => UpstreamRead::Cancelled,
            next = upstream.next() => match next {
                Some(Ok(bytes)) => UpstreamRead::Chunk(bytes),
                Some(Err(err)) => UpstreamRead::Failed(err),
                None => UpstreamRead::End,
            },
        }
    }

    /// Write one encoded frame downstream. Returns `false` if nothing was
    /// written, either because the relay is no longer streaming or because the
    /// write failed (which fires the matching trigger).
    pub async fn forward(&mut self, bytes: Bytes) -> bool {
        if !self.is_streaming() {
            return false;
        }

        match self.sink.send(bytes).await {
            Ok(()) => true,
            // A consumer that hung up is a cancellation, not a write failure.
            Err(SinkError::Disconnected) => {
                self.fire(Trigger::Cancelled);
                false
            }
            Err(err) => {
                warn!(error = %err, "Downstream write failed");
                self.fire(Trigger::Error(err.into()));
                false
            }
        }
    }

    /// Release both ends and settle on a terminal state. Safe to call more
    /// than once; only the first call does any work. Shutting down a relay that
    /// is still streaming counts as a cancellation.
    pub async fn shutdown(&mut self) -> RelayState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.state == RelayState::Streaming {
            self.fire(Trigger::Cancelled);
        }

        // Stop reading and release the upstream connection.
        drop(self.upstream.take());

        let clean = matches!(self.cause, Some(Trigger::Sentinel | Trigger::NaturalEnd));
        self.state = if clean {
            self.complete().await
        } else if let Some(Trigger::Error(err)) = &self.cause {
            self.sink.abort(err).await;
            RelayState::Failed
        } else {
            let _ = self.sink.close().await;
            RelayState::Closed
        };
        self.state
    }

    async fn complete(&mut self) -> RelayState {
        if let Some(terminator) = self.terminator.take() {
            match self.sink.send(terminator).await {
                Ok(()) | Err(SinkError::Disconnected) => {}
                Err(err) => {
                    warn!(error = %err, "Failed to write stream terminator");
                    self.sink.abort(&RelayError::DownstreamWrite(err.clone())).await;
                    self.cause = Some(Trigger::Error(err.into()));
                    return RelayState::Failed;
                }
            }
        }

        match self.sink.close().await {
            Ok(()) | Err(SinkError::Disconnected) => RelayState::Closed,
            Err(err) => {
                warn!(error = %err, "Failed to close downstream");
                self.cause = Some(Trigger::Error(err.into()));
                RelayState::Failed
            }
        }
    }
}
