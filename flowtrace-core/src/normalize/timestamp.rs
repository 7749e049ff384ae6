//! Timestamp extraction and the synthetic-ordering fallback.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::types::{EventTime, Source};

/// Fields checked, in order, on each object level of an entry.
pub(crate) fn candidate_fields(source: Source) -> &'static [&'static str] {
    match source {
        Source::SmartFlow => &["timestamp", "ts", "time", "@timestamp", "created_date"],
        Source::Agent => &["created_date", "timestamp", "ts", "created_at", "time"],
    }
}

/// Naive formats tried after RFC 3339. Naive values are taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// First parseable timestamp across `levels` (most specific level first).
pub(crate) fn extract(levels: &[&Value], source: Source) -> Option<DateTime<Utc>> {
    let fields = candidate_fields(source);
    levels.iter().find_map(|level| {
        fields
            .iter()
            .find_map(|field| level.get(*field).and_then(parse_value))
    })
}

/// Parse a JSON timestamp value: formatted strings or numeric epoch values.
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_str(s),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

/// Parse a timestamp string in any of the accepted formats.
pub fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    s.parse::<f64>().ok().and_then(from_epoch)
}

/// Interpret an epoch number by magnitude: seconds, milliseconds, or
/// microseconds.
fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value.abs() >= 1e17 {
        return None;
    }

    let scale = if value.abs() < 1e11 {
        1_000_000.0
    } else if value.abs() < 1e14 {
        1_000.0
    } else {
        1.0
    };
    let micros = (value * scale).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Assigns event times within one source, in input order.
///
/// Unparseable entries reuse the previous parsed instant with an increasing
/// step, so input order survives the global sort.
#[derive(Debug)]
pub(crate) struct SyntheticClock {
    last: DateTime<Utc>,
    step: u32,
}

impl SyntheticClock {
    pub(crate) fn new() -> Self {
        Self {
            last: EventTime::EARLIEST,
            step: 0,
        }
    }

    pub(crate) fn observe(&mut self, parsed: Option<DateTime<Utc>>) -> EventTime {
        match parsed {
            Some(at) => {
                self.last = at;
                self.step = 0;
                EventTime::parsed(at)
            }
            None => {
                self.step = self.step.saturating_add(1);
                EventTime {
                    at: self.last,
                    step: self.step,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd_hms_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap() + chrono::Duration::milliseconds(ms as i64)
    }

    #[test]
    fn test_parse_formats() {
        let expected = ymd_hms_ms(2025, 10, 16, 14, 30, 56, 123);

        assert_eq!(parse_str("2025-10-16T14:30:56.123Z"), Some(expected));
        assert_eq!(parse_str("2025-10-16T14:30:56.123+00:00"), Some(expected));
        assert_eq!(parse_str("2025-10-16 14:30:56.123"), Some(expected));
        assert_eq!(parse_str("2025-10-16T14:30:56.123"), Some(expected));
        assert_eq!(
            parse_str("2025-10-16 14:30:56"),
            Some(ymd_hms_ms(2025, 10, 16, 14, 30, 56, 0))
        );
    }

    #[test]
    fn test_parse_epoch_values() {
        let secs = parse_value(&json!(1760633456)).unwrap();
        let millis = parse_value(&json!(1760633456000i64)).unwrap();
        let text = parse_value(&json!("1760633456")).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs, text);
        assert_eq!(secs.timestamp(), 1760633456);

        assert_eq!(parse_value(&json!(1)).unwrap().timestamp(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_str(""), None);
        assert_eq!(parse_str("yesterday"), None);
        assert_eq!(parse_value(&json!(null)), None);
        assert_eq!(parse_value(&json!({"nested": 1})), None);
    }

    #[test]
    fn test_extract_prefers_earlier_levels_and_fields() {
        let inner = json!({"timestamp": "2025-10-16T10:00:00Z"});
        let outer = json!({"timestamp": "2025-10-16T09:00:00Z"});
        let got = extract(&[&inner, &outer], Source::SmartFlow).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2025, 10, 16, 10, 0, 0).unwrap());

        let agent = json!({"timestamp": "2025-10-16T09:00:00Z", "created_date": "2025-10-16T08:00:00Z"});
        let got = extract(&[&agent], Source::Agent).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2025, 10, 16, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_synthetic_clock_steps_after_last_parsed() {
        let t = Utc.with_ymd_and_hms(2025, 10, 16, 10, 0, 0).unwrap();
        let mut clock = SyntheticClock::new();

        let a = clock.observe(None);
        let b = clock.observe(Some(t));
        let c = clock.observe(None);
        let d = clock.observe(None);

        assert_eq!(a.at, EventTime::EARLIEST);
        assert_eq!(a.step, 1);
        assert_eq!(b, EventTime::parsed(t));
        assert_eq!(c, EventTime { at: t, step: 1 });
        assert_eq!(d, EventTime { at: t, step: 2 });
        assert!(a < b && b < c && c < d);
    }
}
