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

//! SHIP certificate handling
//!
//! SHIP identity is not chain-of-trust based: certificates are locally
//! issued (SHIP 12.1), and the peer's identity is its **SKI**, the 20-byte
//! SHA-1 key identifier carried as the certificate's SubjectKeyIdentifier
//! extension (SHIP 12.2, RFC 3280 4.2.1.2), rendered as 40 lowercase hex
//! characters.
//!
//! This crate generates SHIP-compatible self-signed certificates, extracts
//! SKIs from peer certificates, and provides the TLS verifiers that replace
//! chain validation with the SKI presence check.

pub mod verify;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyIdMethod, KeyPair, KeyUsagePurpose,
};
use sha1::{Digest, Sha1};
use ship_model::normalize_ski;
use thiserror::Error;
use x509_parser::prelude::*;

pub use verify::{SkiClientCertVerifier, SkiServerCertVerifier};

/// Errors that can occur while generating or inspecting certificates
#[derive(Debug, Error)]
pub enum CertError {
    /// Key or certificate generation failed
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Certificate bytes could not be parsed as X.509 DER
    #[error("invalid certificate format")]
    InvalidCertificate,

    /// The certificate carries no SubjectKeyIdentifier extension
    #[error("certificate does not provide a SKI")]
    NoSki,

    /// The SubjectKeyIdentifier is not the 20 bytes SHIP requires
    #[error("certificate SKI has invalid length (expected 20 bytes)")]
    InvalidSkiLength,
}

/// A generated certificate with its private key, both DER-encoded
pub struct CertificateKey {
    pub cert_der: Vec<u8>,
    /// PKCS#8 private key
    pub key_der: Vec<u8>,
    /// Normalised 40-hex-char SKI of the key
    pub ski: String,
}

impl CertificateKey {
    /// Generate a SHIP-compatible self-signed certificate.
    ///
    /// ECDSA P-256 with SHA-256 signatures; the SubjectKeyIdentifier is the
    /// SHA-1 of the DER-encoded private key per SHIP 12.2, so the SKI
    /// survives certificate renewals with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Generation`] if key or certificate creation
    /// fails.
    ///
    /// # Example
    ///
    /// ```
    /// # use ship_cert::CertificateKey;
    /// let cert = CertificateKey::generate("Demo", "Demo", "DE", "Demo-Unit-01").unwrap();
    /// assert_eq!(cert.ski.len(), 40);
    /// ```
    pub fn generate(
        organizational_unit: &str,
        organization: &str,
        country: &str,
        common_name: &str,
    ) -> Result<Self, CertError> {
        let key_pair = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
        let key_der = key_pair.serialize_der();

        // SHIP 12.2: SKI per RFC 3280 4.2.1.2, SHA-1 over the key DER
        let ski_bytes: [u8; 20] = Sha1::digest(&key_der).into();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationalUnitName, organizational_unit);
        distinguished_name.push(DnType::OrganizationName, organization);
        distinguished_name.push(DnType::CountryName, country);
        distinguished_name.push(DnType::CommonName, common_name);

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.key_identifier_method = KeyIdMethod::PreSpecified(ski_bytes.to_vec());

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Generation(e.to_string()))?;

        Ok(Self {
            cert_der: cert.der().to_vec(),
            key_der,
            ski: hex::encode(ski_bytes),
        })
    }
}

/// Extract the SKI from a DER-encoded certificate.
///
/// # Errors
///
/// Returns [`CertError::InvalidCertificate`] for unparseable bytes,
/// [`CertError::NoSki`] when the SubjectKeyIdentifier extension is absent
/// and [`CertError::InvalidSkiLength`] when it is not 20 bytes.
pub fn ski_from_certificate(cert_der: &[u8]) -> Result<String, CertError> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|_| CertError::InvalidCertificate)?;

    for ext in cert.extensions() {
        if let ParsedExtension::SubjectKeyIdentifier(key_id) = ext.parsed_extension() {
            if key_id.0.len() != 20 {
                return Err(CertError::InvalidSkiLength);
            }
            return Ok(normalize_ski(&hex::encode(key_id.0)));
        }
    }

    Err(CertError::NoSki)
}

/// Crypto provider restricted to the SHIP cipher policy.
///
/// SHIP 9.1 allows `ECDHE-ECDSA-AES128-CBC-SHA256` and
/// `ECDHE-ECDSA-AES128-GCM-SHA256`; rustls implements no CBC suites, so
/// only the GCM suite is offered for TLS 1.2. TLS 1.2 is the floor
/// (SHIP 9), so the TLS 1.3 AES-128-GCM suite is offered as well.
pub fn restricted_crypto_provider() -> rustls::crypto::CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites = vec![
        rustls::crypto::ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
        rustls::crypto::ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    ];
    provider
}
