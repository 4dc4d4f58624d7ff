//! Service event identifiers and the injected event reporter.
//!
//! Every externally significant occurrence (seat taken, licence loaded,
//! SQL failure, ...) is reported through an [`EventReporter`] so that the
//! hosting process decides where events go. The default reporter forwards
//! to `tracing`; tests substitute a capturing implementation.

use tracing::{error, info, warn};

/// Identifiers for service events, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    ServiceStart = 1000,
    ServiceStartMessage = 1001,
    ServiceStartError = 1002,
    ServiceShutdown = 1005,
    ServiceShutdownError = 1006,

    SeatRefreshed = 1010,
    SeatReleased = 1011,
    SeatNotReleased = 1012,
    SeatTaken = 1013,
    SeatNotTaken = 1014,
    TakeSeatError = 1015,
    ConnectionInfoError = 1016,

    NumberOfSeatsError = 1020,
    SeatRefreshedError = 1021,
    SeatReleasedError = 1022,

    LicenceLoad = 1030,
    LicenceDelete = 1031,
    LicenceInfoError = 1032,
    LicenceDailyReload = 1033,
    LicenceVerificationError = 1034,
    LicenceNotActive = 1035,

    InvalidProduct = 1040,

    DataFolderCreated = 1050,
    LicenceFolderCreated = 1051,
    DatabaseSchemaCreated = 1052,

    ServerVersion = 1090,
    WebServerAddress = 1091,
}

impl EventId {
    /// Numeric identifier as logged and persisted.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Whether the event represents a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            EventId::ServiceStartError
                | EventId::ServiceShutdownError
                | EventId::SeatNotReleased
                | EventId::TakeSeatError
                | EventId::ConnectionInfoError
                | EventId::NumberOfSeatsError
                | EventId::SeatRefreshedError
                | EventId::SeatReleasedError
                | EventId::LicenceInfoError
                | EventId::LicenceVerificationError
        )
    }
}

/// Reporting seam for service events.
///
/// Injected into the seat manager and maintenance jobs at construction.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: EventId, detail: &str);
}

/// Default reporter: forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
    fn report(&self, event: EventId, detail: &str) {
        if event.is_error() {
            error!(event_id = event.id(), event = ?event, detail, "service event");
        } else if matches!(event, EventId::SeatNotTaken | EventId::InvalidProduct) {
            warn!(event_id = event.id(), event = ?event, detail, "service event");
        } else {
            info!(event_id = event.id(), event = ?event, detail, "service event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_stable() {
        assert_eq!(EventId::ServiceStart.id(), 1000);
        assert_eq!(EventId::SeatTaken.id(), 1013);
        assert_eq!(EventId::LicenceVerificationError.id(), 1034);
        assert_eq!(EventId::InvalidProduct.id(), 1040);
        assert_eq!(EventId::DatabaseSchemaCreated.id(), 1052);
    }

    #[test]
    fn error_classification() {
        assert!(EventId::TakeSeatError.is_error());
        assert!(EventId::LicenceVerificationError.is_error());
        assert!(!EventId::SeatTaken.is_error());
        assert!(!EventId::LicenceLoad.is_error());
    }
}
