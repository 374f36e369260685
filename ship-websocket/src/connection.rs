// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-connection websocket handling

use crate::{PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use ship_model::ShipError;
use ship_network::{MessageReader, MessageWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

type WsSink = Box<dyn Sink<Message, Error = tungstenite::Error> + Send + Unpin>;
type WsSource = Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin>;

enum WriterCommand {
    Message(Vec<u8>),
    /// Stop the writer; with a `(code, reason)` a close frame goes out first
    Close(Option<(u16, String)>),
}

/// One websocket connection to a remote SHIP node.
///
/// Writes are queued and flushed by a single writer task; reads run on
/// their own task once [`MessageWriter::init_message_handling`] registered
/// the receiving side. Close is idempotent and remembers its cause.
pub struct WebsocketConnection {
    remote_ski: String,

    /// Split halves, taken by the pump tasks on start
    halves: Mutex<Option<(WsSink, WsSource)>>,
    write_tx: mpsc::UnboundedSender<WriterCommand>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<WriterCommand>>>,

    connection_closed: AtomicBool,
    connection_closed_error: Mutex<Option<ShipError>>,
    close_tx: watch::Sender<bool>,

    me: Weak<WebsocketConnection>,
}

impl WebsocketConnection {
    /// Wrap an established websocket stream. Message pumps do not start
    /// until a reader registers via `init_message_handling`.
    pub fn new<S>(stream: WebSocketStream<S>, remote_ski: &str) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (close_tx, _) = watch::channel(false);

        Arc::new_cyclic(|me| Self {
            remote_ski: remote_ski.to_string(),
            halves: Mutex::new(Some((Box::new(sink), Box::new(source)))),
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
            connection_closed: AtomicBool::new(false),
            connection_closed_error: Mutex::new(None),
            close_tx,
            me: me.clone(),
        })
    }

    fn is_conn_closed(&self) -> bool {
        self.connection_closed.load(Ordering::SeqCst)
    }

    fn set_conn_closed(&self, error: Option<ShipError>) {
        self.connection_closed.store(true, Ordering::SeqCst);
        if let Some(error) = error {
            let mut stored = self.connection_closed_error.lock();
            if stored.is_none() {
                *stored = Some(error);
            }
        }
        let _ = self.close_tx.send(true);
    }

    fn close_with_error(&self, error: ShipError, reader: &Arc<dyn MessageReader>, context: &str) {
        debug!(ski = %self.remote_ski, "{context}: {error}");
        self.set_conn_closed(Some(error.clone()));
        reader.report_connection_error(error);
    }

    async fn run_write_pump(
        self: Arc<Self>,
        mut sink: WsSink,
        mut write_rx: mpsc::UnboundedReceiver<WriterCommand>,
        reader: Arc<dyn MessageReader>,
    ) {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_PERIOD,
            PING_PERIOD,
        );
        let mut close_rx = self.close_tx.subscribe();

        loop {
            tokio::select! {
                command = write_rx.recv() => {
                    match command {
                        None => {
                            // the connection handle is gone
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        Some(WriterCommand::Message(data)) => {
                            if self.is_conn_closed() {
                                // a queued close frame may still follow
                                continue;
                            }

                            trace!(ski = %self.remote_ski, "Send: {}", text_from_message(&data));
                            match tokio::time::timeout(WRITE_WAIT, sink.send(Message::Binary(data))).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    self.close_with_error(
                                        ShipError::TransportClosed(e.to_string()),
                                        &reader,
                                        "error writing to websocket",
                                    );
                                    return;
                                }
                                Err(_) => {
                                    self.close_with_error(
                                        ShipError::TransportClosed("write deadline exceeded".to_string()),
                                        &reader,
                                        "error writing to websocket",
                                    );
                                    return;
                                }
                            }
                        }
                        Some(WriterCommand::Close(frame)) => {
                            send_close_frame(&mut sink, frame).await;
                            return;
                        }
                    }
                }
                _ = close_rx.changed() => {
                    // the close flag is set; flush a queued close frame if
                    // one is waiting, then stop
                    while let Ok(command) = write_rx.try_recv() {
                        if let WriterCommand::Close(frame) = command {
                            send_close_frame(&mut sink, frame).await;
                            return;
                        }
                    }
                    return;
                }
                _ = ping.tick() => {
                    if self.is_conn_closed() {
                        continue;
                    }
                    let _ = tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await;
                }
            }
        }
    }

    async fn run_read_pump(
        self: Arc<Self>,
        mut source: WsSource,
        reader: Arc<dyn MessageReader>,
    ) {
        let mut close_rx = self.close_tx.subscribe();
        let mut read_deadline = tokio::time::Instant::now() + PONG_WAIT;

        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    return;
                }
                _ = tokio::time::sleep_until(read_deadline) => {
                    if self.is_conn_closed() {
                        return;
                    }
                    self.close_with_error(
                        ShipError::TransportClosed("read deadline exceeded".to_string()),
                        &reader,
                        "websocket read error",
                    );
                    return;
                }
                message = source.next() => {
                    // ignore read results if the connection got closed
                    if self.is_conn_closed() {
                        return;
                    }

                    match message {
                        None => {
                            self.close_with_error(
                                ShipError::TransportClosed("connection closed by remote".to_string()),
                                &reader,
                                "websocket read error",
                            );
                            return;
                        }
                        Some(Err(e)) => {
                            self.close_with_error(
                                ShipError::TransportClosed(e.to_string()),
                                &reader,
                                "websocket read error",
                            );
                            return;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if data.len() < 2 {
                                self.close_with_error(
                                    ShipError::InvalidFrame("invalid ship message length".to_string()),
                                    &reader,
                                    "websocket read error",
                                );
                                return;
                            }
                            trace!(ski = %self.remote_ski, "Recv: {}", text_from_message(&data));
                            reader.handle_incoming_message(data);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            // SHIP 4.2: a pong extends the read window
                            read_deadline = tokio::time::Instant::now() + PONG_WAIT;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // answered by tungstenite on the next write
                        }
                        Some(Ok(Message::Close(_))) => {
                            // the stream ends next, which reports the close
                        }
                        Some(Ok(message)) => {
                            let _ = message;
                            self.close_with_error(
                                ShipError::InvalidFrame("message is not a binary message".to_string()),
                                &reader,
                                "websocket read error",
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn send_close_frame(sink: &mut WsSink, frame: Option<(u16, String)>) {
    let Some((code, reason)) = frame else {
        return;
    };
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    };
    let _ = tokio::time::timeout(WRITE_WAIT, sink.send(Message::Close(Some(frame)))).await;
}

fn text_from_message(message: &[u8]) -> String {
    if message.len() > 2 {
        String::from_utf8_lossy(&message[1..]).to_string()
    } else if message == ship_model::SHIP_INIT {
        "ship init".to_string()
    } else {
        "unknown single byte".to_string()
    }
}

impl MessageWriter for WebsocketConnection {
    fn init_message_handling(&self, reader: Arc<dyn MessageReader>) {
        let Some((sink, source)) = self.halves.lock().take() else {
            return;
        };
        let Some(write_rx) = self.write_rx.lock().take() else {
            return;
        };
        let Some(me) = self.me.upgrade() else {
            return;
        };

        tokio::spawn(me.clone().run_write_pump(sink, write_rx, reader.clone()));
        tokio::spawn(me.run_read_pump(source, reader));
    }

    fn write_message(&self, message: Vec<u8>) -> Result<(), ShipError> {
        if self.is_conn_closed() {
            return Err(ShipError::TransportClosed("connection is closed".to_string()));
        }

        self.write_tx
            .send(WriterCommand::Message(message))
            .map_err(|_| ShipError::TransportClosed("connection is closed".to_string()))
    }

    fn close(&self, close_code: u16, reason: &str) {
        if self.is_conn_closed() {
            return;
        }

        // a silent close drops the transport without a close frame
        let frame = if reason.is_empty() {
            None
        } else {
            Some((close_code, reason.to_string()))
        };
        let _ = self.write_tx.send(WriterCommand::Close(frame));

        self.set_conn_closed(None);
    }

    fn is_closed(&self) -> (bool, Option<ShipError>) {
        let is_closed = self.is_conn_closed();
        if !is_closed {
            return (false, None);
        }

        let error = self.connection_closed_error.lock().clone();
        (
            true,
            Some(error.unwrap_or_else(|| {
                ShipError::TransportClosed("connection is closed".to_string())
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct RecordingReader {
        messages: PlMutex<Vec<Vec<u8>>>,
        errors: PlMutex<Vec<ShipError>>,
    }

    impl RecordingReader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: PlMutex::new(Vec::new()),
                errors: PlMutex::new(Vec::new()),
            })
        }
    }

    impl MessageReader for RecordingReader {
        fn handle_incoming_message(&self, message: Vec<u8>) {
            self.messages.lock().push(message);
        }

        fn report_connection_error(&self, error: ShipError) {
            self.errors.lock().push(error);
        }
    }

    type PeerStream = WebSocketStream<tokio::io::DuplexStream>;

    /// An in-memory websocket pair: our side wrapped as a
    /// `WebsocketConnection`, the peer side driven directly.
    async fn connected_pair() -> (Arc<WebsocketConnection>, PeerStream, Arc<RecordingReader>) {
        let (local, remote) = tokio::io::duplex(16 * 1024);

        let local_ws = WebSocketStream::from_raw_socket(local, Role::Server, None).await;
        let remote_ws = WebSocketStream::from_raw_socket(remote, Role::Client, None).await;

        let connection = WebsocketConnection::new(local_ws, &"aa".repeat(20));
        let reader = RecordingReader::new();
        connection.init_message_handling(reader.clone());

        (connection, remote_ws, reader)
    }

    #[tokio::test]
    async fn test_binary_messages_reach_reader() {
        let (_connection, mut peer, reader) = connected_pair().await;

        peer.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(reader.messages.lock().clone(), vec![vec![1, 2, 3]]);
        assert!(reader.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_message_reaches_peer() {
        let (connection, mut peer, _reader) = connected_pair().await;

        connection.write_message(vec![0, 0]).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::Binary(vec![0, 0]));
    }

    #[tokio::test]
    async fn test_short_frame_is_invalid() {
        let (_connection, mut peer, reader) = connected_pair().await;

        peer.send(Message::Binary(vec![1])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let errors = reader.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ShipError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn test_text_frame_is_invalid() {
        let (_connection, mut peer, reader) = connected_pair().await;

        peer.send(Message::Text("hello".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let errors = reader.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ShipError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (connection, mut peer, _reader) = connected_pair().await;

        connection.close(4452, "Node rejected by application");

        let received = tokio::time::timeout(Duration::from_secs(1), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match received {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4452);
                assert_eq!(frame.reason, "Node rejected by application");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        let (is_closed, error) = connection.is_closed();
        assert!(is_closed);
        assert!(matches!(error, Some(ShipError::TransportClosed(_))));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (connection, _peer, _reader) = connected_pair().await;

        connection.close(4001, "close");
        assert!(connection.write_message(vec![0, 0]).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, _peer, _reader) = connected_pair().await;

        connection.close(4001, "close");
        connection.close(4500, "later");

        let (is_closed, _) = connection.is_closed();
        assert!(is_closed);
    }

    #[tokio::test]
    async fn test_remote_drop_reports_error() {
        let (_connection, peer, reader) = connected_pair().await;

        drop(peer);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let errors = reader.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ShipError::TransportClosed(_)));
    }
}
