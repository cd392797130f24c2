//! Downstream sink abstraction.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{RelayError, SinkError};

/// Byte stream handed to the downstream consumer.
pub type DownstreamStream = ReceiverStream<Result<Bytes, io::Error>>;

/// Anything that accepts encoded frames and can signal completion or failure.
///
/// Writes are issued one at a time; `send` returns only once the previous
/// frame has been accepted.
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    async fn send(&mut self, bytes: Bytes) -> Result<(), SinkError>;

    /// Resolves once the consumer has gone away.
    async fn closed(&self);

    /// Flush and close normally.
    async fn close(&mut self) -> Result<(), SinkError>;

    /// Terminate the stream with an error.
    async fn abort(&mut self, error: &RelayError);
}

/// Sink backed by a bounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Option<mpsc::Sender<Result<Bytes, io::Error>>>,
}

/// Create a sink and the stream its writes appear on.
pub fn channel_sink(capacity: usize) -> (ChannelSink, DownstreamStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChannelSink {
            sender: Some(sender),
        },
        ReceiverStream::new(receiver),
    )
}

#[async_trait]
impl DownstreamSink for ChannelSink {
    async fn send(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        sender
            .send(Ok(bytes))
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&self) {
        if let Some(sender) = &self.sender {
            sender.closed().await;
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        // Dropping the sender ends the receiver stream once it is drained.
        self.sender.take();
        Ok(())
    }

    async fn abort(&mut self, error: &RelayError) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(io::Error::other(error.to_string()))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_writes_arrive_in_order_and_close_ends_stream() {
        let (mut sink, mut stream) = channel_sink(4);
        sink.send(Bytes::from_static(b"a")).await.unwrap();
        sink.send(Bytes::from_static(b"b")).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (mut sink, _stream) = channel_sink(1);
        sink.close().await.unwrap();
        assert_eq!(
            sink.send(Bytes::from_static(b"late")).await,
            Err(SinkError::Closed)
        );
    }

    #[tokio::test]
    async fn test_dropped_consumer_is_detected() {
        let (mut sink, stream) = channel_sink(1);
        drop(stream);
        sink.closed().await;
        assert_eq!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(SinkError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_abort_surfaces_error() {
        let (mut sink, mut stream) = channel_sink(1);
        sink.abort(&RelayError::UpstreamRead("reset".to_string())).await;
        let item = stream.next().await.unwrap();
        assert!(item.unwrap_err().to_string().contains("reset"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_capacity_applies_backpressure() {
        let (mut sink, mut stream) = channel_sink(1);
        sink.send(Bytes::from_static(b"first")).await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            sink.send(Bytes::from_static(b"second")),
        )
        .await;
        assert!(pending.is_err(), "second write should wait for the consumer");

        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        sink.send(Bytes::from_static(b"third")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "third");
    }
}
