//! Server-side components.
//!
//! This module contains:
//! - `store`    → SQLite-backed storage of licences and connections
//! - `pool`     → licence admission and seat quotas per product
//! - `manager`  → the public seat-accounting API
//! - `protocol` → message types and framing at the wire boundary
//! - `service`  → TCP accept loop and request dispatch

pub mod manager;
pub mod pool;
pub mod protocol;
pub mod service;
pub mod store;

pub use manager::{LicenceDetails, SeatManager};
pub use pool::{build_admitted_pool, LicenceSeat, ProductLicences};
pub use protocol::{ErrorCode, MessageType, Reply, Request};
pub use service::SeatService;
pub use store::{ConnectionRow, LicenceRow, Store};
