//! The seat manager: the public face of the seat-accounting engine.
//!
//! Every operation validates its string arguments, reads licence state,
//! and mutates the connection table under a per-manager write lock so that
//! concurrent requests for the same product stay serialisable. Signature
//! verification is CPU-bound and runs before the critical section.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::{LicenceError, LicenceResult};
use crate::events::{EventId, EventReporter};
use crate::licence::reader::read_licence_folder;
use crate::licence::verify::SignatureVerifier;
use crate::server::pool::{build_admitted_pool, AdmittedPool};
use crate::server::store::{ConnectionRow, Store};

/// Tolerance added to the heartbeat before a seat counts as stale.
pub const FUDGE_FACTOR_SECS: i64 = 30;

/// Headline licence details for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenceDetails {
    pub company: String,
    pub product: String,
    pub customer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reseller: Option<String>,
    pub seats: i64,
    /// Representative expiry date; unset when a perpetual licence is
    /// admitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

/// Manages the seat pool for every product.
pub struct SeatManager {
    store: Store,
    verifier: Arc<SignatureVerifier>,
    reporter: Arc<dyn EventReporter>,
    heartbeat: Duration,
    double_validation: bool,
    /// Serialises mutating operations; see the module docs.
    write_lock: Mutex<()>,
}

impl SeatManager {
    pub fn new(
        store: Store,
        verifier: Arc<SignatureVerifier>,
        reporter: Arc<dyn EventReporter>,
        heartbeat_secs: u64,
    ) -> Self {
        Self {
            store,
            verifier,
            reporter,
            heartbeat: Duration::seconds(heartbeat_secs as i64),
            double_validation: true,
            write_lock: Mutex::new(()),
        }
    }

    /// Enable or disable re-verification of licence rows on every
    /// seat-affecting query. Defaults to on.
    pub fn with_double_validation(mut self, enabled: bool) -> Self {
        self.double_validation = enabled;
        self
    }

    /// Storage handle, shared with the maintenance jobs.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Moment before which a connection's update time marks it stale.
    pub fn stale_threshold(&self) -> NaiveDateTime {
        Local::now().naive_local() - (self.heartbeat + Duration::seconds(FUDGE_FACTOR_SECS))
    }

    fn require(name: &'static str, value: &str) -> LicenceResult<()> {
        if value.is_empty() {
            return Err(LicenceError::InvalidArgument(name));
        }
        Ok(())
    }

    async fn admitted_pool(&self, product: &str) -> LicenceResult<(usize, AdmittedPool)> {
        let rows = self.store.licences_for_product(product).await?;
        let verifier = self.double_validation.then_some(self.verifier.as_ref());
        let pool = build_admitted_pool(&rows, verifier, Local::now().naive_local(), &*self.reporter);
        Ok((rows.len(), pool))
    }

    fn invalid_product(&self, product: &str) -> LicenceError {
        self.reporter.report(EventId::InvalidProduct, product);
        LicenceError::InvalidProduct(product.to_string())
    }

    /// Try to take a seat of `product` for the `(user, ip)` pair.
    ///
    /// Returns `Ok(false)` when every admitted seat is in live use, and
    /// `InvalidProduct` when the product has no licence rows at all.
    pub async fn take_seat(
        &self,
        product: &str,
        ip: &str,
        user: &str,
        host: &str,
    ) -> LicenceResult<bool> {
        Self::require("product", product)?;
        Self::require("ipAddress", ip)?;
        Self::require("userName", user)?;
        Self::require("host", host)?;

        let stale = self.stale_threshold();
        let (row_count, pool) = self.admitted_pool(product).await?;
        if row_count == 0 {
            return Err(self.invalid_product(product));
        }
        let mut licences = pool.licences;
        licences.sort();

        let _guard = self.write_lock.lock().await;
        let now = Local::now().naive_local();

        let taken = self
            .store
            .count_live_connections_excluding(product, stale, user, ip)
            .await?;
        if taken >= licences.total_seats() {
            self.reporter.report(
                EventId::SeatNotTaken,
                &format!("{product}: {taken} seat(s) in use"),
            );
            return Ok(false);
        }

        // Candidate selection: with one admitted licence the choice is
        // forced; otherwise take the first licence in sort order with a
        // free seat, falling back to the first overall.
        let seats = licences.licence_seats();
        let mut licence_id = match seats.first() {
            Some(first) => first.licence_id,
            None => return Ok(false),
        };
        if seats.len() > 1 {
            for candidate in seats {
                let in_use = self
                    .store
                    .count_live_connections_for_licence(candidate.licence_id, stale, user, ip)
                    .await?;
                if in_use < candidate.seats {
                    licence_id = candidate.licence_id;
                    break;
                }
            }
        }

        self.store
            .insert_connection_if_absent(product, user, ip, host, now, Some(licence_id))
            .await?;
        self.store
            .bind_connection(product, user, ip, host, now, licence_id)
            .await?;
        self.reporter
            .report(EventId::SeatTaken, &format!("{product}: {user}@{ip}"));
        Ok(true)
    }

    /// Refresh the seat held by the triple, creating the row if needed.
    ///
    /// Deliberately a touch, not a policy check: a stale seat refreshed
    /// before the reaper runs is revived.
    pub async fn refresh_seat(
        &self,
        product: &str,
        ip: &str,
        user: &str,
        host: &str,
    ) -> LicenceResult<()> {
        Self::require("product", product)?;
        Self::require("ipAddress", ip)?;
        Self::require("userName", user)?;
        Self::require("host", host)?;

        let _guard = self.write_lock.lock().await;
        let now = Local::now().naive_local();
        self.store
            .insert_connection_if_absent(product, user, ip, host, now, None)
            .await?;
        self.store.touch_connection(product, user, ip, now).await?;
        self.reporter
            .report(EventId::SeatRefreshed, &format!("{product}: {user}@{ip}"));
        Ok(())
    }

    /// Release the seat held by the triple.
    ///
    /// Succeeds whether or not a row existed; the contract is `true` on a
    /// successful delete.
    pub async fn release_seat(&self, product: &str, ip: &str, user: &str) -> LicenceResult<bool> {
        Self::require("product", product)?;
        Self::require("ipAddress", ip)?;
        Self::require("userName", user)?;

        let _guard = self.write_lock.lock().await;
        self.store.delete_connection(product, user, ip).await?;
        self.reporter
            .report(EventId::SeatReleased, &format!("{product}: {user}@{ip}"));
        Ok(true)
    }

    /// Live connections for a product.
    pub async fn get_connections(&self, product: &str) -> LicenceResult<Vec<ConnectionRow>> {
        Self::require("product", product)?;
        self.store
            .live_connections(product, self.stale_threshold())
            .await
    }

    /// Distinct products in the licence table, ascending.
    pub async fn get_products(&self) -> LicenceResult<Vec<String>> {
        self.store.products().await
    }

    /// Total seat quota for a product.
    pub async fn total_seats(&self, product: &str) -> LicenceResult<i64> {
        Self::require("product", product)?;
        let (row_count, pool) = self.admitted_pool(product).await?;
        if row_count == 0 {
            return Err(self.invalid_product(product));
        }
        Ok(pool.licences.total_seats())
    }

    /// Headline licence details for a product.
    ///
    /// The identity comes from the newest verified licence; the date is the
    /// latest admitted term expiry when no perpetual licence is admitted,
    /// or the latest expiry over all licences when everything has expired.
    pub async fn get_licence_details(&self, product: &str) -> LicenceResult<LicenceDetails> {
        Self::require("product", product)?;
        let (_, pool) = self.admitted_pool(product).await?;
        let Some(identity) = pool.headline else {
            return Err(self.invalid_product(product));
        };

        let seats = pool.licences.total_seats();
        let mut date = if pool.licences.has_perpetual_licence() {
            None
        } else {
            pool.latest_valid_expiry
        };
        if seats == 0 {
            date = pool.latest_expiry;
        }

        Ok(LicenceDetails {
            company: identity.company,
            product: identity.product,
            customer: identity.customer,
            reference: identity.reference,
            reseller: identity.reseller,
            seats,
            date,
        })
    }

    /// Reconcile the licence table against the verified files on disk.
    ///
    /// Verified files are inserted if-not-present (keyed on `TimeStamp`);
    /// rows without a matching file are deleted, cascading into their
    /// connections.
    pub async fn load_licences(&self, licence_folder: &Path) -> LicenceResult<()> {
        let licences = read_licence_folder(licence_folder, &self.verifier, &*self.reporter)?;
        let timestamps: Vec<i64> = licences.iter().map(|l| l.timestamp).collect();

        let _guard = self.write_lock.lock().await;
        let mut loaded = 0u64;
        for licence in &licences {
            if self.store.insert_licence_if_absent(licence).await? {
                self.reporter.report(
                    EventId::LicenceLoad,
                    &format!("{} ({})", licence.product, licence.timestamp),
                );
                loaded += 1;
            }
        }
        let removed = self.store.delete_licences_not_in(&timestamps).await?;
        if removed > 0 {
            self.reporter
                .report(EventId::LicenceDelete, &format!("{removed} licence(s)"));
        }
        info!(
            loaded,
            removed,
            on_disk = licences.len(),
            "reconciled licences"
        );
        Ok(())
    }

    /// Delete every stale connection row.
    pub async fn delete_stale_seats(&self) -> LicenceResult<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .store
            .delete_stale_connections(self.stale_threshold())
            .await?;
        if removed > 0 {
            info!(removed, "deleted stale seat(s)");
        }
        Ok(removed)
    }
}
