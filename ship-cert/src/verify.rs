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

//! SKI-based TLS peer verification
//!
//! SHIP 12.1: certificates are locally issued, so X.509 chain validation is
//! disabled entirely. A peer is acceptable iff its certificate exposes a
//! valid 20-byte SubjectKeyIdentifier; SKI equality against the expected
//! service record replaces CA trust.

use crate::ski_from_certificate;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, Error, SignatureScheme};

fn verify_ski(end_entity: &CertificateDer<'_>, expected_ski: Option<&str>) -> Result<(), Error> {
    let ski = ski_from_certificate(end_entity.as_ref())
        .map_err(|e| Error::General(format!("no valid SKI provided in certificate: {e}")))?;

    if let Some(expected) = expected_ski {
        if ski != expected {
            return Err(Error::General(format!(
                "SKI mismatch: expected {expected}, got {ski}"
            )));
        }
    }

    Ok(())
}

fn verification_algorithms() -> rustls::crypto::WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

/// Server certificate verifier used when dialling a remote service.
///
/// Accepts any locally-issued certificate whose SKI is present (and, when
/// an expected SKI is configured, equal to it). Signatures are still
/// verified so the peer must actually hold the key the SKI names.
#[derive(Debug)]
pub struct SkiServerCertVerifier {
    expected_ski: Option<String>,
}

impl SkiServerCertVerifier {
    /// Verifier that checks SKI presence only.
    pub fn new() -> Self {
        Self { expected_ski: None }
    }

    /// Verifier that additionally requires the given SKI.
    pub fn with_expected_ski(ski: &str) -> Self {
        Self {
            expected_ski: Some(ski.to_string()),
        }
    }
}

impl Default for SkiServerCertVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for SkiServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        verify_ski(end_entity, self.expected_ski.as_deref())?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &verification_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &verification_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        verification_algorithms().supported_schemes()
    }
}

/// Client certificate verifier for the listening side.
///
/// SHIP 9 requires client authentication; any client presenting a
/// certificate with a valid 20-byte SKI is admitted to the TLS layer. The
/// hub decides afterwards whether that SKI is welcome.
#[derive(Debug)]
pub struct SkiClientCertVerifier {
    root_hints: Vec<DistinguishedName>,
}

impl SkiClientCertVerifier {
    pub fn new() -> Self {
        Self {
            root_hints: Vec::new(),
        }
    }
}

impl Default for SkiClientCertVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCertVerifier for SkiClientCertVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.root_hints
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, Error> {
        verify_ski(end_entity, None)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &verification_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &verification_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        verification_algorithms().supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CertificateKey;

    #[test]
    fn test_verify_ski_presence() {
        let cert = CertificateKey::generate("Test", "Test", "DE", "Unit-1").unwrap();
        let der = CertificateDer::from(cert.cert_der.clone());

        assert!(verify_ski(&der, None).is_ok());
        assert!(verify_ski(&der, Some(&cert.ski)).is_ok());
        assert!(verify_ski(&der, Some("00".repeat(20).as_str())).is_err());
    }
}
