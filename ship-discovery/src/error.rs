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

//! Discovery error types

use thiserror::Error;

/// Errors that can occur in the discovery layer
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No backend could be started
    #[error("no mDNS provider available")]
    NoProviderAvailable,

    /// The backend failed to announce the local service
    #[error("announcing service failed: {0}")]
    AnnounceFailed(String),

    /// The backend failed to start or restart resolving
    #[error("resolving failed: {0}")]
    ResolveFailed(String),

    /// The backend session is gone
    #[error("mDNS backend disconnected: {0}")]
    Disconnected(String),
}
