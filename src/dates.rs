//! Licence date handling.
//!
//! Licence documents carry dates in the literal `DD/Mon/YYYY` form with
//! English month abbreviations and no time component (e.g. `04/Sep/2014`).

use chrono::NaiveDate;

/// Format string for licence dates.
pub const LICENCE_DATE_FORMAT: &str = "%d/%b/%Y";

/// Parse a `DD/Mon/YYYY` licence date. Returns `None` for anything else.
pub fn parse_licence_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), LICENCE_DATE_FORMAT).ok()
}

/// Render a date in the licence format.
pub fn format_licence_date(value: NaiveDate) -> String {
    value.format(LICENCE_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_licence_dates() {
        let date = parse_licence_date("04/Sep/2014").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2014, 9, 4).unwrap());
        assert_eq!(
            parse_licence_date("01/Jan/2030"),
            NaiveDate::from_ymd_opt(2030, 1, 1)
        );
    }

    #[test]
    fn rejects_other_formats() {
        assert!(parse_licence_date("2014-09-04").is_none());
        assert!(parse_licence_date("04/09/2014").is_none());
        assert!(parse_licence_date("").is_none());
    }

    #[test]
    fn round_trips() {
        let date = NaiveDate::from_ymd_opt(2029, 1, 1).unwrap();
        assert_eq!(format_licence_date(date), "01/Jan/2029");
        assert_eq!(parse_licence_date(&format_licence_date(date)), Some(date));
    }
}
