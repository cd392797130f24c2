//! ChatRelay core - streaming relay for OpenAI-compatible chat endpoints
//!
//! This crate provides:
//! - Request rewriting from `/chat` paths to `/v1/chat/completions`
//! - Incremental SSE frame reassembly across arbitrary chunk boundaries
//! - Frame classification (sentinel, payload, ignored)
//! - A single termination state machine that closes the relay exactly once
//! - Re-encoding as SSE or newline-delimited JSON
//! - Passthrough of non-streaming responses

pub mod adapter;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
mod http_client;
pub mod pipeline;
pub mod reassembler;
pub mod service;
pub mod sink;
pub mod termination;

// Re-export commonly used types
pub use adapter::{RequestAdapter, RequestDescriptor, UpstreamRequest, is_hop_by_hop, rewrite_chat_path};
pub use classifier::{CompletionChunk, Event, IgnoreReason, Payload, classify};
pub use config::RelayConfig;
pub use encoder::{OutputEncoder, OutputMode};
pub use error::{DecodeError, RelayError, Result, SinkError};
pub use pipeline::{RelayOutcome, RelayPipeline, RelayStats};
pub use reassembler::{Frame, FrameReassembler, Utf8Decoder};
pub use service::{InboundRequest, RelayResponse, RelayService, RelayStream};
pub use sink::{ChannelSink, DownstreamSink, DownstreamStream, channel_sink};
pub use termination::{RelayState, TerminationController, Trigger, UpstreamBody};
