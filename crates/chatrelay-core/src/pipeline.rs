//! One relay instance: upstream chunks in, encoded frames out.

use tracing::{debug, info, warn};

use crate::classifier::{Event, IgnoreReason, Payload, classify};
use crate::encoder::{OutputEncoder, OutputMode};
use crate::reassembler::{Frame, FrameReassembler};
use crate::sink::DownstreamSink;
use crate::termination::{RelayState, TerminationController, Trigger, UpstreamBody, UpstreamRead};

/// Counters collected over one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub chunks: usize,
    pub bytes: usize,
    pub frames: usize,
    pub forwarded: usize,
    pub ignored: usize,
    pub malformed: usize,
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub state: RelayState,
    pub cause: Option<Trigger>,
    pub stats: RelayStats,
}

pub struct RelayPipeline<K> {
    controller: TerminationController<K>,
    reassembler: FrameReassembler,
    encoder: OutputEncoder,
    stats: RelayStats,
}

impl<K: DownstreamSink> RelayPipeline<K> {
    pub fn new(upstream: UpstreamBody, sink: K, mode: OutputMode) -> Self {
        let encoder = OutputEncoder::new(mode);
        Self {
            controller: TerminationController::new(upstream, sink, encoder.terminator()),
            reassembler: FrameReassembler::new(),
            encoder,
            stats: RelayStats::default(),
        }
    }

    /// Relay until a terminal trigger fires, then clean up.
    pub async fn run(mut self) -> RelayOutcome {
        while self.controller.is_streaming() {
            match self.controller.read().await {
                UpstreamRead::Chunk(bytes) => {
                    self.stats.chunks += 1;
                    self.stats.bytes += bytes.len();
                    debug!(bytes = bytes.len(), "Upstream chunk received");
                    match self.reassembler.push(&bytes) {
                        Ok(frames) => self.dispatch(frames).await,
                        Err(err) => {
                            warn!(error = %err, "Failed to decode upstream chunk");
                            self.controller.fire(Trigger::Error(err.into()));
                        }
                    }
                }
                UpstreamRead::End => self.finish_input().await,
                UpstreamRead::Failed(err) => {
                    warn!(error = %err, "Upstream read failed");
                    self.controller.fire(Trigger::Error(err));
                }
                UpstreamRead::Cancelled => {
                    info!("Downstream consumer disconnected");
                    self.controller.fire(Trigger::Cancelled);
                }
            }
        }

        let state = self.controller.shutdown().await;
        let cause = self.controller.take_cause();
        info!(
            state = %state,
            cause = cause.as_ref().map(Trigger::name).unwrap_or("none"),
            chunks = self.stats.chunks,
            bytes = self.stats.bytes,
            frames = self.stats.frames,
            forwarded = self.stats.forwarded,
            ignored = self.stats.ignored,
            malformed = self.stats.malformed,
            "Relay finished"
        );

        RelayOutcome {
            state,
            cause,
            stats: self.stats,
        }
    }

    async fn finish_input(&mut self) {
        match self.reassembler.finish() {
            Ok(Some(frame)) => self.dispatch(vec![frame]).await,
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Upstream ended inside a character");
                self.controller.fire(Trigger::Error(err.into()));
                return;
            }
        }
        if self.controller.fire(Trigger::NaturalEnd) {
            info!("Upstream closed without sentinel");
        }
    }

    async fn dispatch(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            if !self.controller.is_streaming() {
                break;
            }
            self.stats.frames += 1;

            match classify(&frame) {
                Event::Sentinel => {
                    info!("Sentinel received");
                    self.controller.fire(Trigger::Sentinel);
                }
                Event::Payload(payload) => self.forward(payload).await,
                Event::Ignored(IgnoreReason::Malformed(reason)) => {
                    self.stats.ignored += 1;
                    self.stats.malformed += 1;
                    warn!(
                        reason = %reason,
                        frame = %preview(frame.as_str()),
                        "Skipping malformed frame"
                    );
                }
                Event::Ignored(_) => {
                    self.stats.ignored += 1;
                    debug!(frame = %preview(frame.as_str()), "Skipping non-data frame");
                }
            }
        }
    }

    async fn forward(&mut self, payload: Payload) {
        if let Some(chunk) = payload.summary() {
            let choice = chunk.first_choice();
            let delta = choice.and_then(|choice| choice.delta.as_ref());
            debug!(
                id = ?chunk.id,
                role = delta.and_then(|delta| delta.role.as_deref()),
                content = delta.and_then(|delta| delta.content.as_deref()).unwrap_or(""),
                finish_reason = choice.and_then(|choice| choice.finish_reason.as_deref()),
                "Forwarding delta"
            );
        }

        match self.encoder.encode(&payload) {
            Ok(bytes) => {
                if self.controller.forward(bytes).await {
                    self.stats.forwarded += 1;
                }
            }
            Err(err) => {
                self.stats.ignored += 1;
                warn!(error = %err, "Failed to encode payload");
            }
        }
    }
}

fn preview(text: &str) -> &str {
    const MAX_PREVIEW: usize = 100;
    match text.char_indices().nth(MAX_PREVIEW) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
