//! RSA signature verification for licence documents.
//!
//! A licence's `Code` element holds a base64 PKCS#1 v1.5 signature over the
//! SHA-1 digest of the canonical document form: the tree with `Code`
//! emptied, pretty-printed with CRLF line endings and two-space indents,
//! serialised as UTF-8 without an XML declaration.

use base64::prelude::*;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::path::Path;
use tracing::debug;

use crate::errors::{LicenceError, LicenceResult};
use crate::licence::document::{apply_licence_layout, to_bytes, Element};

/// Verifies licence signatures against a fixed RSA public key.
///
/// The key is parsed once at construction and shared by reference; the
/// verifier never re-reads it from disk.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    public_key: RsaPublicKey,
}

impl SignatureVerifier {
    /// Parse a PEM-encoded RSA public key (SPKI or PKCS#1).
    pub fn from_pem(pem: &str) -> LicenceResult<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| LicenceError::ConfigError(format!("unreadable public key: {e}")))?;
        Ok(Self { public_key })
    }

    /// Read and parse the public key file (conventionally `public_key.pem`).
    pub fn from_pem_file(path: &Path) -> LicenceResult<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            LicenceError::ConfigError(format!(
                "cannot read public key '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_pem(&pem)
    }

    /// Verify the signature embedded in a licence document.
    ///
    /// Returns `false` for any failure: missing `Code` element, undecodable
    /// base64, or a signature mismatch. Never panics and never mutates the
    /// caller's tree.
    pub fn verify(&self, licence: &Element) -> bool {
        let Some(code) = licence.find("Code") else {
            debug!("licence document has no Code element");
            return false;
        };
        let encoded: String = code
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let signature = match BASE64_STANDARD.decode(encoded) {
            Ok(signature) => signature,
            Err(e) => {
                debug!("licence Code is not valid base64: {e}");
                return false;
            }
        };
        let digest = Sha1::digest(canonical_signing_bytes(licence));
        self.public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
            .is_ok()
    }
}

/// Canonical byte sequence a signature is computed over.
///
/// Works on a clone of the tree so the caller's document is untouched.
pub fn canonical_signing_bytes(licence: &Element) -> Vec<u8> {
    let mut doc = licence.clone();
    if let Some(code) = doc.find_mut("Code") {
        code.text = Some(String::new());
    }
    apply_licence_layout(&mut doc, 0);
    to_bytes(&doc)
}
