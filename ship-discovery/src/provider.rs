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

//! mDNS adapter contract and reconnect supervision
//!
//! Two backend variants (native zeroconf, in-memory mock; historically also
//! Avahi over DBus) share one contract. Internal state machines differ per
//! variant, the outer contract is identical: start resolving with a
//! callback, announce/unannounce the local service, shut down.

use crate::error::DiscoveryError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Interface index wildcard: resolve on every interface
pub const INTERFACE_UNSPEC: i32 = -1;

/// Whether a record observed on `index` passes the configured allow-list.
///
/// An empty list or a list containing [`INTERFACE_UNSPEC`] accepts all
/// interfaces.
pub fn interface_allowed(allowed: &[i32], index: i32) -> bool {
    if allowed.is_empty() || allowed.contains(&INTERFACE_UNSPEC) {
        return true;
    }
    allowed.contains(&index)
}

/// One resolver observation, add or remove
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    /// Parsed TXT key/value pairs
    pub elements: HashMap<String, String>,
    /// mDNS instance name
    pub name: String,
    /// Hostname of the peer
    pub host: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// `true` when the record disappeared
    pub removed: bool,
}

/// Callback invoked by a backend for every add/remove it observes
pub type ResolveCallback = Arc<dyn Fn(ResolvedItem) + Send + Sync>;

/// The uniform backend contract
#[async_trait]
pub trait MdnsProvider: Send + Sync {
    /// Start the backend and begin resolving.
    ///
    /// Returns `false` if the backend is unavailable. With `auto_reconnect`
    /// set, a backend whose session can drop keeps itself alive via its
    /// [`ReconnectSupervisor`].
    async fn start(&self, auto_reconnect: bool, callback: ResolveCallback) -> bool;

    /// Stop resolving and announcing; cancels any reconnect attempts.
    async fn shutdown(&self);

    /// Announce the local service with the given record TTL in seconds.
    /// Backends without TTL control keep their own default.
    async fn announce(
        &self,
        service_name: &str,
        port: u16,
        ttl: u32,
        txt: &[(String, String)],
    ) -> Result<(), DiscoveryError>;

    /// Withdraw the announcement.
    async fn unannounce(&self);
}

/// Arguments of the last successful announce, kept for re-announcing after
/// a reconnect
#[derive(Debug, Clone)]
pub struct AnnounceArgs {
    pub service_name: String,
    pub port: u16,
    pub ttl: u32,
    pub txt: Vec<(String, String)>,
}

/// The backend operations a [`ReconnectSupervisor`] replays after a
/// disconnect
#[async_trait]
pub trait RestartableSession: Send + Sync {
    /// Re-establish the backend session and restart resolving with the
    /// given callback. Returns `false` when the backend stays unavailable.
    async fn restart(&self, callback: ResolveCallback) -> bool;

    /// Repeat an announce with the previously supplied arguments.
    async fn reannounce(&self, args: &AnnounceArgs) -> Result<(), DiscoveryError>;
}

#[derive(Default)]
struct SupervisorState {
    auto_reconnect: bool,
    shutdown: bool,
    callback: Option<ResolveCallback>,
    announced: Option<AnnounceArgs>,
}

/// Keeps a disconnectable backend session alive.
///
/// A backend embeds one supervisor, records its start/announce arguments
/// through it, and signals session loss with [`notify_disconnect`]. While
/// `auto_reconnect` is set and no manual shutdown happened, the supervisor
/// waits one second, restarts the session, re-announces with the stored
/// arguments and restarts resolving with the stored callback.
///
/// [`notify_disconnect`]: ReconnectSupervisor::notify_disconnect
pub struct ReconnectSupervisor {
    state: Mutex<SupervisorState>,
    disconnected: Notify,
    /// Reconnect backoff; shortened by tests
    delay: Duration,
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_secs(1))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::new(SupervisorState::default()),
            disconnected: Notify::new(),
            delay,
        }
    }

    /// Record a backend start.
    pub fn record_start(&self, auto_reconnect: bool, callback: ResolveCallback) {
        let mut state = self.state.lock();
        state.auto_reconnect = auto_reconnect;
        state.shutdown = false;
        state.callback = Some(callback);
    }

    /// Record the latest announce arguments.
    pub fn record_announce(&self, args: AnnounceArgs) {
        self.state.lock().announced = Some(args);
    }

    /// Forget the announce arguments after an unannounce.
    pub fn record_unannounce(&self) {
        self.state.lock().announced = None;
    }

    /// Record a manual shutdown; cancels reconnecting.
    pub fn record_shutdown(&self) {
        self.state.lock().shutdown = true;
        self.disconnected.notify_one();
    }

    /// Signal that the backend session dropped.
    pub fn notify_disconnect(&self) {
        self.disconnected.notify_one();
    }

    /// Drive the reconnect loop. Spawned once by the backend at start; ends
    /// on manual shutdown or when reconnecting is disabled.
    pub async fn run(self: Arc<Self>, session: Arc<dyn RestartableSession>) {
        loop {
            self.disconnected.notified().await;

            let (reconnect, callback, announced) = {
                let state = self.state.lock();
                (
                    state.auto_reconnect && !state.shutdown,
                    state.callback.clone(),
                    state.announced.clone(),
                )
            };

            if !reconnect {
                return;
            }

            tokio::time::sleep(self.delay).await;

            // shutdown may have happened while sleeping
            if self.state.lock().shutdown {
                return;
            }

            let Some(callback) = callback else { return };

            log::debug!("mdns: backend disconnected, restarting");
            if !session.restart(callback).await {
                // restart failed, try again on the next tick
                self.disconnected.notify_one();
                continue;
            }

            if let Some(args) = announced {
                if let Err(e) = session.reannounce(&args).await {
                    log::debug!("mdns: re-announce after reconnect failed: {e}");
                }
            }
        }
    }
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
