//! Signed licence documents.
//!
//! A licence is an immutable XML document (`Licence1` root) authorising a
//! number of concurrent seats of one product, optionally bounded by a start
//! and expiry date, and carrying an RSA signature in its `Code` element.

pub mod document;
pub mod reader;
pub mod verify;

use crate::errors::{LicenceError, LicenceResult};
use document::Element;

/// Root element name of a licence document.
pub const LICENCE_ROOT: &str = "Licence1";

/// File extension of licence files on disk.
pub const LICENCE_EXTENSION: &str = ".nls1";

/// A parsed licence document.
///
/// `start_date` and `expiry_date` keep the literal `DD/Mon/YYYY` strings
/// from the signed document: the canonical form must be reproducible bit
/// for bit when the licence is re-verified from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Licence {
    pub company: String,
    pub product: String,
    pub customer: String,
    pub reference: Option<String>,
    pub reseller: Option<String>,
    pub seats: i64,
    pub start_date: Option<String>,
    pub expiry_date: Option<String>,
    pub timestamp: i64,
    pub code: String,
    pub notes: Option<String>,
}

fn optional_text(root: &Element, name: &str) -> Option<String> {
    root.child_text(name)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn required_text(root: &Element, name: &str) -> LicenceResult<String> {
    root.child_text(name)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LicenceError::LicenceFile(format!("missing element '{name}'")))
}

impl Licence {
    /// Extract the licence fields from a parsed (and verified) document.
    pub fn from_element(root: &Element) -> LicenceResult<Self> {
        let seats: i64 = required_text(root, "NumberOfSeats")?
            .trim()
            .parse()
            .map_err(|_| LicenceError::LicenceFile("NumberOfSeats is not a number".into()))?;
        if seats < 0 {
            return Err(LicenceError::LicenceFile(
                "NumberOfSeats must not be negative".into(),
            ));
        }
        let timestamp: i64 = required_text(root, "TimeStamp")?
            .trim()
            .parse()
            .map_err(|_| LicenceError::LicenceFile("TimeStamp is not a number".into()))?;
        Ok(Self {
            company: required_text(root, "Company")?,
            product: required_text(root, "Product")?,
            customer: required_text(root, "Customer")?,
            reference: optional_text(root, "Reference"),
            reseller: optional_text(root, "Reseller"),
            seats,
            start_date: optional_text(root, "StartDate"),
            expiry_date: optional_text(root, "ExpiryDate"),
            timestamp,
            code: required_text(root, "Code")?,
            notes: optional_text(root, "Comments"),
        })
    }

    /// Rebuild the licence document tree.
    ///
    /// All eleven child elements are always present in document order; text
    /// is set only for non-empty values, so empty optional elements
    /// serialise as `<Tag />` just like the signed original. Used when a
    /// stored licence row is re-verified (Double Validation).
    pub fn to_element(&self) -> Element {
        let mut root = Element::new(LICENCE_ROOT);
        let mut set = |name: &str, value: Option<&str>| {
            let mut child = Element::new(name);
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                child.text = Some(value.to_string());
            }
            root.push_child(child);
        };
        set("Company", Some(&self.company));
        set("Product", Some(&self.product));
        set("Customer", Some(&self.customer));
        set("Reference", self.reference.as_deref());
        set("Reseller", self.reseller.as_deref());
        set("NumberOfSeats", Some(&self.seats.to_string()));
        set("StartDate", self.start_date.as_deref());
        set("ExpiryDate", self.expiry_date.as_deref());
        set("TimeStamp", Some(&self.timestamp.to_string()));
        set("Code", Some(&self.code));
        set("Comments", self.notes.as_deref());
        root
    }

    /// Whether the licence has no expiry date.
    pub fn is_perpetual(&self) -> bool {
        self.expiry_date.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::parse;

    const SAMPLE: &str = "<Licence1>\
        <Company>Acme Ltd</Company>\
        <Product>Widget</Product>\
        <Customer>Example Corp</Customer>\
        <Reference />\
        <Reseller>Reseller Co</Reseller>\
        <NumberOfSeats>25</NumberOfSeats>\
        <StartDate>04/Sep/2014</StartDate>\
        <ExpiryDate />\
        <TimeStamp>635456789012345678</TimeStamp>\
        <Code>c2lnbmF0dXJl</Code>\
        <Comments />\
        </Licence1>";

    #[test]
    fn extracts_fields() {
        let licence = Licence::from_element(&parse(SAMPLE).unwrap()).unwrap();
        assert_eq!(licence.company, "Acme Ltd");
        assert_eq!(licence.product, "Widget");
        assert_eq!(licence.seats, 25);
        assert_eq!(licence.reference, None);
        assert_eq!(licence.reseller.as_deref(), Some("Reseller Co"));
        assert_eq!(licence.start_date.as_deref(), Some("04/Sep/2014"));
        assert_eq!(licence.expiry_date, None);
        assert_eq!(licence.timestamp, 635456789012345678);
        assert!(licence.is_perpetual());
    }

    #[test]
    fn rebuilt_document_round_trips() {
        let licence = Licence::from_element(&parse(SAMPLE).unwrap()).unwrap();
        let rebuilt = licence.to_element();
        let again = Licence::from_element(&rebuilt).unwrap();
        assert_eq!(licence, again);
        // Canonical forms agree, which is what Double Validation relies on.
        assert_eq!(
            verify::canonical_signing_bytes(&parse(SAMPLE).unwrap()),
            verify::canonical_signing_bytes(&rebuilt)
        );
    }

    #[test]
    fn missing_required_element_is_an_error() {
        let xml = "<Licence1><Company>A</Company></Licence1>";
        assert!(Licence::from_element(&parse(xml).unwrap()).is_err());
    }

    #[test]
    fn negative_seats_are_rejected() {
        let xml = SAMPLE.replace("25", "-1");
        assert!(Licence::from_element(&parse(&xml).unwrap()).is_err());
    }
}
