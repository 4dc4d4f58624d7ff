//! Shared test fixtures: a signing keypair and signed licence builders.

#![allow(dead_code)]

use std::sync::{Mutex, OnceLock};

use base64::prelude::*;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use roost::events::{EventId, EventReporter};
use roost::licence::document::{apply_licence_layout, to_bytes, Element};
use roost::licence::verify::canonical_signing_bytes;
use roost::licence::Licence;

/// Test keypair; generated once per test binary.
pub struct SigningKey {
    private: RsaPrivateKey,
    pub public_pem: String,
}

pub fn signing_key() -> &'static SigningKey {
    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).expect("generate test keypair");
        let public_pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .expect("encode public key");
        SigningKey {
            private,
            public_pem,
        }
    })
}

/// Parameters of a licence document under test.
#[derive(Debug, Clone)]
pub struct LicenceSpec {
    pub product: String,
    pub seats: i64,
    pub start_date: Option<String>,
    pub expiry_date: Option<String>,
    pub timestamp: i64,
}

impl LicenceSpec {
    pub fn new(product: &str, seats: i64, timestamp: i64) -> Self {
        Self {
            product: product.to_string(),
            seats,
            start_date: None,
            expiry_date: None,
            timestamp,
        }
    }

    pub fn expiring(mut self, date: &str) -> Self {
        self.expiry_date = Some(date.to_string());
        self
    }

    pub fn starting(mut self, date: &str) -> Self {
        self.start_date = Some(date.to_string());
        self
    }
}

fn licence_element(spec: &LicenceSpec, code: &str) -> Element {
    let mut root = Element::new("Licence1");
    let mut set = |name: &str, value: Option<&str>| {
        let mut child = Element::new(name);
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            child.text = Some(value.to_string());
        }
        root.push_child(child);
    };
    set("Company", Some("Test Co"));
    set("Product", Some(&spec.product));
    set("Customer", Some("Test Customer"));
    set("Reference", None);
    set("Reseller", None);
    set("NumberOfSeats", Some(&spec.seats.to_string()));
    set("StartDate", spec.start_date.as_deref());
    set("ExpiryDate", spec.expiry_date.as_deref());
    set("TimeStamp", Some(&spec.timestamp.to_string()));
    set("Code", Some(code));
    set("Comments", None);
    root
}

/// Compute a valid signature for the given spec.
pub fn sign(spec: &LicenceSpec) -> String {
    let unsigned = licence_element(spec, "");
    let digest = Sha1::digest(canonical_signing_bytes(&unsigned));
    let signature = signing_key()
        .private
        .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        .expect("sign licence");
    BASE64_STANDARD.encode(signature)
}

/// A licence value carrying a valid signature.
pub fn signed_licence(spec: &LicenceSpec) -> Licence {
    let element = licence_element(spec, &sign(spec));
    Licence::from_element(&element).expect("licence from element")
}

/// A complete signed licence file, pretty-printed like the signing tool.
pub fn signed_licence_xml(spec: &LicenceSpec) -> String {
    let mut element = licence_element(spec, &sign(spec));
    apply_licence_layout(&mut element, 0);
    String::from_utf8(to_bytes(&element)).expect("utf-8 licence")
}

/// Event reporter that records everything it sees.
#[derive(Debug, Default)]
pub struct CapturingReporter {
    pub events: Mutex<Vec<(EventId, String)>>,
}

impl CapturingReporter {
    pub fn seen(&self, event: EventId) -> bool {
        self.events
            .lock()
            .expect("reporter lock")
            .iter()
            .any(|(e, _)| *e == event)
    }
}

impl EventReporter for CapturingReporter {
    fn report(&self, event: EventId, detail: &str) {
        self.events
            .lock()
            .expect("reporter lock")
            .push((event, detail.to_string()));
    }
}
