//! Seat pool: which licences of a product are admitted, and how many
//! concurrent seats they grant.
//!
//! Admission runs over the product's licence rows newest `TimeStamp` first:
//! optional re-verification of the stored document (Double Validation),
//! then the date window, then perpetual dedup — at most one perpetual
//! licence is admitted, and iteration order makes it the newest one.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, info, warn};

use crate::dates;
use crate::events::{EventId, EventReporter};
use crate::licence::verify::SignatureVerifier;
use crate::licence::Licence;
use crate::server::store::LicenceRow;

/// One admitted licence's contribution to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenceSeat {
    pub licence_id: i64,
    pub seats: i64,
    pub perpetual: bool,
}

/// The admitted licences of one product.
///
/// Each instance owns its own seat list; pools are built per request and
/// never shared.
#[derive(Debug, Default)]
pub struct ProductLicences {
    seats: Vec<LicenceSeat>,
}

impl ProductLicences {
    pub fn new() -> Self {
        Self { seats: Vec::new() }
    }

    pub fn add(&mut self, seat: LicenceSeat) {
        self.seats.push(seat);
    }

    pub fn licence_seats(&self) -> &[LicenceSeat] {
        &self.seats
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    /// Whether a perpetual licence is in the pool.
    pub fn has_perpetual_licence(&self) -> bool {
        self.seats.iter().any(|seat| seat.perpetual)
    }

    /// Seat quota: the sum over all admitted licences.
    pub fn total_seats(&self) -> i64 {
        self.seats.iter().map(|seat| seat.seats).sum()
    }

    /// Order for seat assignment: perpetual licences first, then term
    /// licences by seat count ascending.
    pub fn sort(&mut self) {
        self.seats
            .sort_by_key(|seat| if seat.perpetual { -1 } else { seat.seats });
    }
}

/// Identity of the headline licence shown in licence details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenceIdentity {
    pub company: String,
    pub product: String,
    pub customer: String,
    pub reference: Option<String>,
    pub reseller: Option<String>,
}

/// Result of running the admission pipeline over a product's rows.
#[derive(Debug, Default)]
pub struct AdmittedPool {
    pub licences: ProductLicences,
    /// Identity of the newest verified licence, admitted or not.
    pub headline: Option<LicenceIdentity>,
    /// Latest expiry date among admitted term licences.
    pub latest_valid_expiry: Option<NaiveDate>,
    /// Latest expiry date among all verified rows, in or out of window.
    pub latest_expiry: Option<NaiveDate>,
}

/// Day-granular date window test: active strictly after the start date's
/// midnight and strictly before the expiry date's midnight.
///
/// An unparseable stored date fails the window; it cannot authorise seats.
pub fn is_in_date_window(
    start_date: Option<&str>,
    expiry_date: Option<&str>,
    now: NaiveDateTime,
) -> bool {
    let after_start = match start_date {
        None => true,
        Some(raw) => match dates::parse_licence_date(raw) {
            Some(date) => now > date.and_time(NaiveTime::MIN),
            None => {
                warn!("unparseable licence start date '{raw}'");
                false
            }
        },
    };
    let before_expiry = match expiry_date {
        None => true,
        Some(raw) => match dates::parse_licence_date(raw) {
            Some(date) => now < date.and_time(NaiveTime::MIN),
            None => {
                warn!("unparseable licence expiry date '{raw}'");
                false
            }
        },
    };
    after_start && before_expiry
}

/// Build the admitted pool for a product from its licence rows.
///
/// `rows` must be ordered newest `TimeStamp` first, as the store returns
/// them. When `verifier` is given (Double Validation), each row's document
/// is rebuilt and re-verified; rows that fail are skipped.
pub fn build_admitted_pool(
    rows: &[LicenceRow],
    verifier: Option<&SignatureVerifier>,
    now: NaiveDateTime,
    reporter: &dyn EventReporter,
) -> AdmittedPool {
    let mut pool = AdmittedPool::default();

    for row in rows {
        if let Some(verifier) = verifier {
            let document = Licence::from(row).to_element();
            if !verifier.verify(&document) {
                warn!("licence with id {} NOT VERIFIED", row.id);
                reporter.report(EventId::LicenceVerificationError, &format!("id {}", row.id));
                continue;
            }
            debug!("licence with id {} verified", row.id);
        }

        if pool.headline.is_none() {
            pool.headline = Some(LicenceIdentity {
                company: row.company.clone(),
                product: row.product.clone(),
                customer: row.customer.clone(),
                reference: row.reference.clone(),
                reseller: row.reseller.clone(),
            });
        }

        // Remember the latest expiry over every verified row; it is the
        // reported date when all the product's licences have expired.
        if let Some(expiry) = row.expiry_date.as_deref().and_then(dates::parse_licence_date) {
            if pool.latest_expiry.is_none_or(|latest| expiry > latest) {
                pool.latest_expiry = Some(expiry);
            }
        }

        if !is_in_date_window(row.start_date.as_deref(), row.expiry_date.as_deref(), now) {
            info!("licence with id {} is not active", row.id);
            reporter.report(EventId::LicenceNotActive, &format!("id {}", row.id));
            continue;
        }

        match row.expiry_date.as_deref().and_then(dates::parse_licence_date) {
            Some(expiry) => {
                pool.licences.add(LicenceSeat {
                    licence_id: row.id,
                    seats: row.seats,
                    perpetual: false,
                });
                if pool.latest_valid_expiry.is_none_or(|latest| expiry > latest) {
                    pool.latest_valid_expiry = Some(expiry);
                }
            }
            None => {
                if !pool.licences.has_perpetual_licence() {
                    pool.licences.add(LicenceSeat {
                        licence_id: row.id,
                        seats: row.seats,
                        perpetual: true,
                    });
                }
            }
        }
    }

    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingReporter;
    use chrono::NaiveDate;

    fn row(id: i64, seats: i64, expiry: Option<&str>, timestamp: i64) -> LicenceRow {
        LicenceRow {
            id,
            company: "Acme".into(),
            product: "App".into(),
            customer: "Customer".into(),
            reference: None,
            reseller: None,
            seats,
            start_date: None,
            expiry_date: expiry.map(str::to_string),
            timestamp,
            code: "c2ln".into(),
            version: 1,
            notes: None,
        }
    }

    fn noon(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn date_window_bounds() {
        let now = noon(2026, 8, 1);
        assert!(is_in_date_window(None, None, now));
        assert!(is_in_date_window(Some("01/Jan/2020"), None, now));
        assert!(is_in_date_window(None, Some("01/Jan/2030"), now));
        assert!(!is_in_date_window(Some("01/Jan/2030"), None, now));
        assert!(!is_in_date_window(None, Some("01/Jan/2020"), now));
        // Still active during the start day, already expired on expiry day.
        assert!(is_in_date_window(Some("01/Aug/2026"), None, now));
        assert!(!is_in_date_window(None, Some("01/Aug/2026"), now));
        assert!(!is_in_date_window(Some("garbage"), None, now));
    }

    #[test]
    fn only_newest_perpetual_admitted() {
        let rows = vec![row(3, 5, None, 300), row(2, 9, None, 200), row(1, 1, None, 100)];
        let pool = build_admitted_pool(&rows, None, noon(2026, 8, 1), &TracingReporter);
        assert_eq!(pool.licences.len(), 1);
        assert_eq!(pool.licences.licence_seats()[0].licence_id, 3);
        assert!(pool.licences.has_perpetual_licence());
        assert_eq!(pool.licences.total_seats(), 5);
    }

    #[test]
    fn expired_licences_are_skipped_but_tracked() {
        let rows = vec![
            row(2, 4, Some("01/Jan/2030"), 200),
            row(1, 2, Some("01/Jan/2020"), 100),
        ];
        let pool = build_admitted_pool(&rows, None, noon(2026, 8, 1), &TracingReporter);
        assert_eq!(pool.licences.total_seats(), 4);
        assert_eq!(
            pool.latest_valid_expiry,
            NaiveDate::from_ymd_opt(2030, 1, 1)
        );
        assert_eq!(pool.latest_expiry, NaiveDate::from_ymd_opt(2030, 1, 1));
    }

    #[test]
    fn all_expired_keeps_latest_expiry() {
        let rows = vec![
            row(2, 4, Some("01/Jan/2021"), 200),
            row(1, 2, Some("01/Jan/2020"), 100),
        ];
        let pool = build_admitted_pool(&rows, None, noon(2026, 8, 1), &TracingReporter);
        assert!(pool.licences.is_empty());
        assert_eq!(pool.licences.total_seats(), 0);
        assert!(pool.headline.is_some());
        assert_eq!(pool.latest_expiry, NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(pool.latest_valid_expiry, None);
    }

    #[test]
    fn sort_puts_perpetual_first_then_seats_ascending() {
        let mut licences = ProductLicences::new();
        licences.add(LicenceSeat { licence_id: 1, seats: 3, perpetual: false });
        licences.add(LicenceSeat { licence_id: 2, seats: 0, perpetual: true });
        licences.add(LicenceSeat { licence_id: 3, seats: 1, perpetual: false });
        licences.sort();
        let ids: Vec<i64> = licences.licence_seats().iter().map(|s| s.licence_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn headline_is_newest_row() {
        let rows = vec![row(2, 4, Some("01/Jan/2020"), 200), row(1, 2, None, 100)];
        let pool = build_admitted_pool(&rows, None, noon(2026, 8, 1), &TracingReporter);
        // Newest row is expired, but it still provides the identity.
        assert_eq!(pool.headline.unwrap().company, "Acme");
        assert_eq!(pool.licences.licence_seats()[0].licence_id, 1);
    }
}
