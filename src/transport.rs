//! Duplex client transport.
//!
//! A session writes text frames through a [`FrameSink`] and reads client
//! frames from a [`FrameSource`]. Both halves are implemented for split
//! `tokio-tungstenite` WebSocket streams and for in-process channels.

use crate::error::GatewayError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
}

/// Outbound half of a client connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame could not be written.
    async fn send_text(&mut self, text: &str) -> Result<(), GatewayError>;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close handshake fails.
    async fn close(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Inbound half of a client connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next data frame; `None` once the client is gone.
    async fn next_frame(&mut self) -> Option<Result<Frame, GatewayError>>;
}

#[async_trait]
impl<S> FrameSink for SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: &str) -> Result<(), GatewayError> {
        self.send(Message::Text(text.to_string()))
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        SinkExt::close(self)
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))
    }
}

#[async_trait]
impl<S> FrameSource for SplitStream<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Option<Result<Frame, GatewayError>> {
        loop {
            match self.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes))),
                Ok(Message::Close(_)) => return None,
                // control frames are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(GatewayError::transport(e.to_string()))),
            }
        }
    }
}

/// Sink writing frames into an in-process channel.
///
/// Writes fail once the receiving end is dropped.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Creates a sink and the receiver observing what it writes.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: &str) -> Result<(), GatewayError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| GatewayError::transport("client channel closed"))
    }
}

/// Source reading frames from an in-process channel.
///
/// The source ends when every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ChannelSource {
    /// Creates a source and the sender feeding it.
    #[must_use]
    pub fn pair() -> (mpsc::UnboundedSender<Frame>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, GatewayError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_reports_closed_client() {
        let (mut sink, rx) = ChannelSink::pair();
        sink.send_text("hello").await.unwrap();
        drop(rx);

        let err = sink.send_text("again").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn channel_source_ends_with_senders() {
        let (tx, mut source) = ChannelSource::pair();
        tx.send(Frame::Text("STOP".into())).unwrap();
        drop(tx);

        assert_eq!(
            source.next_frame().await.unwrap().unwrap(),
            Frame::Text("STOP".into())
        );
        assert!(source.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn websocket_halves_carry_text_frames() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client, server) = tokio::join!(
            WebSocketStream::from_raw_socket(
                client_io,
                tokio_tungstenite::tungstenite::protocol::Role::Client,
                None
            ),
            WebSocketStream::from_raw_socket(
                server_io,
                tokio_tungstenite::tungstenite::protocol::Role::Server,
                None
            ),
        );
        let (mut server_sink, _server_source) = server.split();
        let (_client_sink, mut client_source) = client.split();

        server_sink.send_text("hi").await.unwrap();
        server_sink.send_text("").await.unwrap();

        assert_eq!(
            client_source.next_frame().await.unwrap().unwrap(),
            Frame::Text("hi".into())
        );
        assert_eq!(
            client_source.next_frame().await.unwrap().unwrap(),
            Frame::Text(String::new())
        );
    }
}
