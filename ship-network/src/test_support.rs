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

//! Mock transport and info provider for handshake tests

use crate::api::{
    ConnectionInfoProvider, MessageReader, MessageWriter, PayloadReader, PayloadWriter,
};
use crate::connection::ShipConnection;
use parking_lot::Mutex;
use ship_model::{ShipError, ShipStateDetail};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport stub recording everything written to it
pub(crate) struct TestWriter {
    sent: Mutex<Vec<Vec<u8>>>,
    closes: Mutex<Vec<(u16, String)>>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl TestWriter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Make subsequent writes fail; the message is still recorded, like a
    /// socket that accepts the bytes and then reports the error.
    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub(crate) fn last_message(&self) -> Option<Vec<u8>> {
        self.sent.lock().last().cloned()
    }

    pub(crate) fn close_calls(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }
}

impl MessageWriter for TestWriter {
    fn init_message_handling(&self, _reader: Arc<dyn MessageReader>) {}

    fn write_message(&self, message: Vec<u8>) -> Result<(), ShipError> {
        self.sent.lock().push(message);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ShipError::TransportClosed("write failed".to_string()));
        }
        Ok(())
    }

    fn close(&self, close_code: u16, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.lock().push((close_code, reason.to_string()));
    }

    fn is_closed(&self) -> (bool, Option<ShipError>) {
        (self.closed.load(Ordering::SeqCst), None)
    }
}

/// SPINE engine stub recording delivered payloads
pub(crate) struct TestPayloadReader {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl TestPayloadReader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }
}

impl PayloadReader for TestPayloadReader {
    fn handle_ship_payload(&self, payload: Vec<u8>) {
        self.payloads.lock().push(payload);
    }
}

/// Hub stub with configurable pairing decisions
pub(crate) struct TestInfoProvider {
    paired: AtomicBool,
    allow_waiting: AtomicBool,
    updates: Mutex<Vec<ShipStateDetail>>,
    closed_reports: Mutex<Vec<bool>>,
    ship_ids: Mutex<Vec<String>>,
    pub(crate) reader: Arc<TestPayloadReader>,
}

impl TestInfoProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            paired: AtomicBool::new(false),
            allow_waiting: AtomicBool::new(false),
            updates: Mutex::new(Vec::new()),
            closed_reports: Mutex::new(Vec::new()),
            ship_ids: Mutex::new(Vec::new()),
            reader: TestPayloadReader::new(),
        })
    }

    pub(crate) fn set_paired(&self, paired: bool) {
        self.paired.store(paired, Ordering::SeqCst);
    }

    pub(crate) fn set_allow_waiting(&self, allow: bool) {
        self.allow_waiting.store(allow, Ordering::SeqCst);
    }

    pub(crate) fn state_updates(&self) -> Vec<ShipStateDetail> {
        self.updates.lock().clone()
    }

    pub(crate) fn closed_reports(&self) -> Vec<bool> {
        self.closed_reports.lock().clone()
    }

    pub(crate) fn reported_ship_ids(&self) -> Vec<String> {
        self.ship_ids.lock().clone()
    }
}

impl ConnectionInfoProvider for TestInfoProvider {
    fn is_remote_service_paired(&self, _ski: &str) -> bool {
        self.paired.load(Ordering::SeqCst)
    }

    fn handle_connection_closed(&self, _connection: &ShipConnection, handshake_completed: bool) {
        self.closed_reports.lock().push(handshake_completed);
    }

    fn report_service_ship_id(&self, _ski: &str, ship_id: &str) {
        self.ship_ids.lock().push(ship_id.to_string());
    }

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
