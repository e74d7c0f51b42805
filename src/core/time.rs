use chrono::{DateTime, Utc};

pub fn now_utc() -> DateTime<Utc> {
    if let Ok(value) = std::env::var("KESTREL_FIXED_TIME") {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
            return dt.with_timezone(&Utc);
        }
    }
    Utc::now()
}

/// Second-precision UTC instant for Falcon query filters, e.g. `2025-06-01T12:30:00Z`.
pub fn fql_time(d: DateTime<Utc>) -> String {
    d.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Human timestamp for console lines, e.g. `2025-06-01 12:30.55 UTC`.
pub fn fmt_ts(d: DateTime<Utc>) -> String {
    d.format("%Y-%m-%d %H:%M.%S UTC").to_string()
}

pub fn parse_iso_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fql_time_truncates_to_seconds() {
        let dt = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 59).unwrap()
            + chrono::Duration::milliseconds(750);
        assert_eq!(fql_time(dt), "2025-06-01T12:30:59Z");
    }

    #[test]
    fn parse_iso_utc_accepts_z_suffix() {
        let dt = parse_iso_utc("2025-06-01T12:30:59Z").unwrap();
        assert_eq!(fmt_ts(dt), "2025-06-01 12:30.59 UTC");
    }

    #[test]
    fn parse_iso_utc_rejects_garbage() {
        assert!(parse_iso_utc("not-a-timestamp").is_none());
    }
}
