use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use orion_error::prelude::*;

use super::DecodeCtx;
use crate::error::{CoreReason, CoreResult};

const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%dT%H%M%S",
];

/// Parse a wire timestamp. Offset-carrying RFC 3339 stamps convert directly;
/// naive stamps are localized per the logger's conventions, with UTC as the
/// fallback when no timezone is configured.
pub fn parse_timestamp(raw: &str, ctx: &DecodeCtx) -> CoreResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return localize(naive, ctx);
        }
    }
    StructError::from(CoreReason::TimestampParse)
        .with_detail(format!("unparseable timestamp {raw:?}"))
        .err()
}

fn localize(naive: NaiveDateTime, ctx: &DecodeCtx) -> CoreResult<DateTime<Utc>> {
    if ctx.in_utc {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    match ctx.timezone {
        Some(tz) => tz
            .from_local_datetime(&naive)
            // DST-fold ambiguity resolves to the earlier instant; a spring
            // gap has no local representation and fails the line.
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                StructError::from(CoreReason::TimestampParse)
                    .with_detail(format!("nonexistent local time {naive}"))
            }),
        None => Ok(Utc.from_utc_datetime(&naive)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn ctx(in_utc: bool, tz: Option<Tz>) -> DecodeCtx {
        DecodeCtx {
            received_at: Utc::now(),
            in_utc,
            timezone: tz,
        }
    }

    #[test]
    fn rfc3339_offset_converts_to_utc() {
        let dt = parse_timestamp("2024-05-01T12:00:00+02:00", &ctx(true, None)).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn naive_layouts_accepted() {
        let c = ctx(true, None);
        for raw in [
            "2024-05-01T12:00:00",
            "2024-05-01T12:00:00.250",
            "2024-05-01 12:00:00",
            "20240501T120000",
        ] {
            assert!(parse_timestamp(raw, &c).is_ok(), "{raw}");
        }
    }

    #[test]
    fn naive_localized_via_logger_timezone() {
        let c = ctx(false, Some(chrono_tz::Europe::Amsterdam));
        // CEST, UTC+2
        let dt = parse_timestamp("2024-07-01 12:00:00", &c).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-07-01T10:00:00+00:00");
    }

    #[test]
    fn naive_defaults_to_utc_without_timezone() {
        let c = ctx(false, None);
        let dt = parse_timestamp("2024-07-01 12:00:00", &c).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-07-01T12:00:00+00:00");
    }

    #[test]
    fn garbage_is_a_timestamp_error() {
        assert!(parse_timestamp("yesterday", &ctx(true, None)).is_err());
    }
}
