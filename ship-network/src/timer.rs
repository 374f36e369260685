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

//! Handshake timer
//!
//! Exactly one handshake timer is active per connection at any time.
//! Setting a timer cancels the outstanding one. A single scheduler task per
//! connection sleeps on the current setting; every setting carries an epoch
//! that the firing re-checks under the timer lock, so a firing that raced a
//! replacement self-discards.

use crate::connection::ShipConnection;
use parking_lot::Mutex;
use std::sync::Weak;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Timer kinds of the hello phase (SHIP 13.4.4.1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// The peer must reach ready (or request prolongation) before expiry
    WaitForReady,
    /// We must request prolongation before the peer's window closes
    SendProlongationRequest,
    /// A prolongation request went out and awaits its answer
    ProlongRequestReply,
}

#[derive(Debug, Clone, Copy)]
struct TimerSetting {
    epoch: u64,
    deadline: Instant,
}

struct TimerState {
    epoch: u64,
    kind: TimerKind,
    running: bool,
}

pub(crate) struct HandshakeTimer {
    tx: watch::Sender<Option<TimerSetting>>,
    state: Mutex<TimerState>,
}

impl HandshakeTimer {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            state: Mutex::new(TimerState {
                epoch: 0,
                kind: TimerKind::WaitForReady,
                running: false,
            }),
        }
    }

    /// Replace the active timer.
    pub(crate) fn set(&self, kind: TimerKind, duration: Duration) {
        let epoch = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.kind = kind;
            state.running = true;
            state.epoch
        };
        let _ = self.tx.send(Some(TimerSetting {
            epoch,
            deadline: Instant::now() + duration,
        }));
    }

    /// Cancel the active timer, if any.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.epoch += 1;
            state.running = false;
        }
        let _ = self.tx.send(None);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub(crate) fn kind(&self) -> TimerKind {
        self.state.lock().kind
    }

    /// Mark the timer as fired iff `epoch` is still the active one.
    fn finish_if_current(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.running && state.epoch == epoch {
            state.running = false;
            return true;
        }
        false
    }

    /// Start the scheduler task driving this timer into the connection's
    /// state handler.
    pub(crate) fn spawn_scheduler(&self, connection: Weak<ShipConnection>) {
        let mut rx = self.tx.subscribe();

        tokio::spawn(async move {
            let mut fired_epoch = 0u64;
            loop {
                let setting = *rx.borrow_and_update();
                match setting {
                    Some(setting) if setting.epoch > fired_epoch => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(setting.deadline) => {
                                fired_epoch = setting.epoch;
                                let Some(connection) = connection.upgrade() else {
                                    return;
                                };
                                if connection.timer().finish_if_current(setting.epoch) {
                                    connection.handle_ship_message(true, None);
                                }
                            }
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    _ => {
                        if rx.changed().await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}
