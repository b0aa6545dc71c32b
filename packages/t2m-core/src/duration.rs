//! ISO-8601 duration parsing shared by the engine (relative time filters,
//! `Delete.older_than`, `Expire.ttl`) and the bench harness's virtual clock
//! (spec.md §8 property 10, grounded on `bench/tools/clock.py`).
//!
//! Purely additive: months are treated as exactly 30 days and years as
//! exactly 365 days, matching the reference parser rather than calendar
//! arithmetic, so `advance(a); advance(b)` always equals `advance(a+b)`.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^P(?:(?P<years>\d+)Y)?(?:(?P<months>\d+)M)?(?:(?P<weeks>\d+)W)?(?:(?P<days>\d+)D)?(?:T(?:(?P<hours>\d+)H)?(?:(?P<minutes>\d+)M)?(?:(?P<seconds>\d+)S)?)?$",
        )
        .expect("static duration regex is valid")
    })
}

/// Parses an ISO-8601 duration (`P[n]Y[n]M[n]W[n]DT[n]H[n]M[n]S`) into a
/// [`chrono::Duration`].
pub fn parse_iso_duration(input: &str) -> Result<chrono::Duration> {
    let caps = pattern()
        .captures(input)
        .ok_or_else(|| Error::InvalidDuration(input.to_string()))?;
    let field = |name: &str| -> i64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    let years = field("years");
    let months = field("months");
    let weeks = field("weeks");
    let days = field("days");
    let hours = field("hours");
    let minutes = field("minutes");
    let seconds = field("seconds");

    let total_days = days + weeks * 7 + months * 30 + years * 365;
    Ok(chrono::Duration::days(total_days)
        + chrono::Duration::hours(hours)
        + chrono::Duration::minutes(minutes)
        + chrono::Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hours_and_days() {
        assert_eq!(parse_iso_duration("PT1H").unwrap(), chrono::Duration::hours(1));
        assert_eq!(parse_iso_duration("P1D").unwrap(), chrono::Duration::days(1));
    }

    #[test]
    fn months_and_years_are_fixed_length() {
        assert_eq!(parse_iso_duration("P1M").unwrap(), chrono::Duration::days(30));
        assert_eq!(parse_iso_duration("P1Y").unwrap(), chrono::Duration::days(365));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_iso_duration("not-a-duration").is_err());
    }

    #[test]
    fn additive_across_two_advances() {
        let a = parse_iso_duration("P1DT2H").unwrap();
        let b = parse_iso_duration("PT30M").unwrap();
        let combined = parse_iso_duration("P1DT2H30M").unwrap();
        assert_eq!(a + b, combined);
    }
}
