//! Licence folder enumeration.
//!
//! Reads every `*.nls1` file in the licence folder, parses it as XML and
//! verifies its signature. Files that fail to parse or verify are logged
//! and skipped; they are never admitted. Directory I/O failures abort the
//! whole scan.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{LicenceError, LicenceResult};
use crate::events::{EventId, EventReporter};
use crate::licence::verify::SignatureVerifier;
use crate::licence::{document, Licence, LICENCE_EXTENSION};

/// Read and verify all licence files in `folder`.
///
/// Returns the verified licences in directory order. Per-file failures are
/// reported through `reporter` and skipped; an unreadable directory or file
/// is an error for the caller.
pub fn read_licence_folder(
    folder: &Path,
    verifier: &SignatureVerifier,
    reporter: &dyn EventReporter,
) -> LicenceResult<Vec<Licence>> {
    let mut licences = Vec::new();

    let entries = fs::read_dir(folder).map_err(|e| {
        LicenceError::LicenceFile(format!(
            "cannot read licence folder '{}': {e}",
            folder.display()
        ))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            LicenceError::LicenceFile(format!("cannot read licence folder entry: {e}"))
        })?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(LICENCE_EXTENSION) || !path.is_file() {
            continue;
        }

        let xml = fs::read_to_string(&path)?;
        let root = match document::parse(&xml) {
            Ok(root) => root,
            Err(e) => {
                warn!("licence '{file_name}' is not well-formed XML: {e}");
                reporter.report(EventId::LicenceVerificationError, file_name);
                continue;
            }
        };
        if !verifier.verify(&root) {
            warn!("licence '{file_name}' NOT VERIFIED");
            reporter.report(EventId::LicenceVerificationError, file_name);
            continue;
        }
        match Licence::from_element(&root) {
            Ok(licence) => {
                debug!("licence '{file_name}' verified");
                licences.push(licence);
            }
            Err(e) => {
                warn!("licence '{file_name}' verified but unusable: {e}");
                reporter.report(EventId::LicenceVerificationError, file_name);
            }
        }
    }

    Ok(licences)
}
