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

//! In-memory transport pair for full-handshake tests

use parking_lot::Mutex;
use ship_model::{ShipError, ShipStateDetail};
use ship_network::{
    ConnectionInfoProvider, MessageReader, MessageWriter, PayloadReader, PayloadWriter,
    ShipConnection,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One end of an in-memory message pipe. Messages written here arrive at
/// the peer's registered reader through a single pump task per direction,
/// preserving receive order like a real socket.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    reader: Arc<Mutex<Option<Arc<dyn MessageReader>>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Arc::new(Self::new(tx_a));
        let b = Arc::new(Self::new(tx_b));

        // messages written by one side drain into the other's reader
        tokio::spawn(Self::pump(rx_a, b.reader.clone()));
        tokio::spawn(Self::pump(rx_b, a.reader.clone()));

        (a, b)
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            tx,
            reader: Arc::new(Mutex::new(None)),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    async fn pump(
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
        reader_slot: Arc<Mutex<Option<Arc<dyn MessageReader>>>>,
    ) {
        while let Some(message) = rx.recv().await {
            let reader = reader_slot.lock().clone();
            if let Some(reader) = reader {
                reader.handle_incoming_message(message);
            }
        }
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl MessageWriter for LoopbackTransport {
    fn init_message_handling(&self, reader: Arc<dyn MessageReader>) {
        *self.reader.lock() = Some(reader);
    }

    fn write_message(&self, message: Vec<u8>) -> Result<(), ShipError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShipError::TransportClosed("connection is closed".to_string()));
        }

        self.sent.lock().push(message.clone());
        let _ = self.tx.send(message);

        Ok(())
    }

    fn close(&self, _close_code: u16, _reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> (bool, Option<ShipError>) {
        (self.closed.load(Ordering::SeqCst), None)
    }
}

/// Records delivered SPINE payloads
pub struct RecordingPayloadReader {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPayloadReader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }
}

impl PayloadReader for RecordingPayloadReader {
    fn handle_ship_payload(&self, payload: Vec<u8>) {
        self.payloads.lock().push(payload);
    }
}

/// Hub stand-in for one node
pub struct NodeInfoProvider {
    paired: AtomicBool,
    allow_waiting: AtomicBool,
    pub reader: Arc<RecordingPayloadReader>,
    updates: Mutex<Vec<ShipStateDetail>>,
}

impl NodeInfoProvider {
    pub fn new(paired: bool, allow_waiting: bool) -> Arc<Self> {
        Arc::new(Self {
            paired: AtomicBool::new(paired),
            allow_waiting: AtomicBool::new(allow_waiting),
            reader: RecordingPayloadReader::new(),
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn state_updates(&self) -> Vec<ShipStateDetail> {
        self.updates.lock().clone()
    }
}

impl ConnectionInfoProvider for NodeInfoProvider {
    fn is_remote_service_paired(&self, _ski: &str) -> bool {
        self.paired.load(Ordering::SeqCst)
    }

    fn handle_connection_closed(&self, _connection: &ShipConnection, _completed: bool) {}

    fn report_service_ship_id(&self, _ski: &str, _ship_id: &str) {}

    fn allow_waiting_for_trust(&self, _ski: &str) -> bool {
        self.allow_waiting.load(Ordering::SeqCst)
    }

    fn handle_handshake_state_update(&self, _ski: &str, detail: ShipStateDetail) {
        self.updates.lock().push(detail);
    }

    fn setup_remote_device(
        &self,
        _ski: &str,
        _writer: Arc<dyn PayloadWriter>,
    ) -> Arc<dyn PayloadReader> {
        self.reader.clone()
    }
}
