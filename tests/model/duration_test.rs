//! Integration tests for durations, timezones and time parts.

use chrono::{DateTime, TimeZone, Utc};
use heron::model::{Duration, DurationUnit, TimePart, Timezone};

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

fn dur(s: &str) -> Duration {
    Duration::parse(s).unwrap()
}

#[test]
fn test_components_in_canonical_order() {
    let d = dur("P1Y2M3DT4H5M6S");
    assert_eq!(
        d.components(),
        vec![
            (DurationUnit::Year, 1),
            (DurationUnit::Month, 2),
            (DurationUnit::Day, 3),
            (DurationUnit::Hour, 4),
            (DurationUnit::Minute, 5),
            (DurationUnit::Second, 6),
        ]
    );
    assert_eq!(d.single_unit(), None);
    assert_eq!(dur("PT15M").single_unit(), Some((DurationUnit::Minute, 15)));
}

#[test]
fn test_week_cannot_mix() {
    assert!(Duration::parse("P2W").is_ok());
    assert!(Duration::parse("P1W1D").is_err());
    assert!(Duration::parse("P").is_err());
    assert!(Duration::parse("PT").is_err());
    assert!(Duration::parse("1D").is_err());
}

#[test]
fn test_floor_utc() {
    let t = utc(2015, 3, 14, 13, 47, 31);
    let tz = Timezone::utc();
    assert_eq!(dur("PT1M").floor(t, &tz), Some(utc(2015, 3, 14, 13, 47, 0)));
    assert_eq!(dur("PT15M").floor(t, &tz), Some(utc(2015, 3, 14, 13, 45, 0)));
    assert_eq!(dur("PT6H").floor(t, &tz), Some(utc(2015, 3, 14, 12, 0, 0)));
    assert_eq!(dur("P1D").floor(t, &tz), Some(utc(2015, 3, 14, 0, 0, 0)));
    // 2015-03-14 is a Saturday
    assert_eq!(dur("P1W").floor(t, &tz), Some(utc(2015, 3, 9, 0, 0, 0)));
    assert_eq!(dur("P3M").floor(t, &tz), Some(utc(2015, 1, 1, 0, 0, 0)));
    assert_eq!(dur("P1Y").floor(t, &tz), Some(utc(2015, 1, 1, 0, 0, 0)));
}

#[test]
fn test_floor_in_timezone() {
    let la = Timezone::parse("America/Los_Angeles").unwrap();
    // 05:00 UTC is 22:00 the previous day in Los Angeles (PDT, UTC-7)
    let t = utc(2015, 3, 14, 5, 0, 0);
    assert_eq!(dur("P1D").floor(t, &la), Some(utc(2015, 3, 13, 7, 0, 0)));
}

#[test]
fn test_shift_across_month_ends() {
    let tz = Timezone::utc();
    let t = utc(2015, 1, 31, 0, 0, 0);
    assert_eq!(dur("P1M").shift(t, &tz, 1), Some(utc(2015, 2, 28, 0, 0, 0)));
    assert_eq!(dur("P1D").shift(t, &tz, -2), Some(utc(2015, 1, 29, 0, 0, 0)));
    assert_eq!(dur("PT1H").shift(t, &tz, 0), Some(t));
}

#[test]
fn test_time_part_names() {
    assert_eq!("HOUR_OF_DAY".parse::<TimePart>(), Ok(TimePart::HourOfDay));
    assert_eq!(TimePart::DayOfWeek.as_str(), "DAY_OF_WEEK");
    assert_eq!(TimePart::HourOfDay.cardinality(), Some(24));
    assert!("HOUR_OF_FORTNIGHT".parse::<TimePart>().is_err());
}

#[test]
fn test_timezone_parse() {
    assert!(Timezone::utc().is_utc());
    assert_eq!(Timezone::default(), Timezone::utc());
    assert_eq!(
        Timezone::parse("Asia/Kolkata").unwrap().name(),
        "Asia/Kolkata"
    );
    assert!(Timezone::parse("Mars/Olympus").is_err());
}
