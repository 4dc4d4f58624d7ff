//! roost — a network floating-licence server.
//!
//! The server owns a corpus of cryptographically signed licence files and
//! rations a finite pool of concurrent seats per product among networked
//! clients. Clients take a seat, refresh it within the heartbeat period,
//! and release it; crashed clients are reclaimed by the stale-seat reaper.

// Core modules
pub mod config;
pub mod dates;
pub mod errors;
pub mod events;

// Licence documents: parsing, canonical form, signature verification
pub mod licence;

// Seat accounting engine and its socket front end
pub mod server;

// Scheduled maintenance (startup sequence, daily reload)
pub mod jobs;
