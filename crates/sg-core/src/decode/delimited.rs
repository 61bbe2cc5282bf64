//! Line-delimited wire format. One record per line:
//!
//! ```text
//! [<timestamp>;]<idcode>,<key1>=<val1>,<key2>=<val2>,...[*]
//! ```
//!
//! A trailing `*` truncates the line. Lines without a timestamp prefix get
//! the submission's receipt time. The first non-blank line's idcode names
//! the logger for the whole submission.

use orion_error::prelude::*;
use tracing::warn;

use super::time::parse_timestamp;
use super::{DecodeCtx, DecodeFailure, DecodedBatch, check_idcode};
use crate::error::{CoreReason, CoreResult};
use crate::model::Point;

/// Split one record into its timestamp prefix, idcode and field tail.
/// The prefix is only a timestamp when the `;` sits before the first `,`.
fn split_line(line: &str) -> (Option<&str>, &str, Option<&str>) {
    let line = match line.split_once('*') {
        Some((kept, _)) => kept,
        None => line,
    };
    let (head, fields) = match line.split_once(',') {
        Some((head, rest)) => (head, Some(rest)),
        None => (line, None),
    };
    match head.split_once(';') {
        Some((ts, idcode)) => (Some(ts), idcode.trim(), fields),
        None => (None, head.trim(), fields),
    }
}

/// Resolve the logger idcode a payload names, without decoding it. Used to
/// look up the logger's timestamp conventions before the full decode.
pub fn peek_idcode(payload: &str) -> CoreResult<String> {
    let line = payload
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| StructError::from(CoreReason::Decode).with_detail("empty payload"))?;
    let (_, idcode, _) = split_line(line);
    check_idcode(idcode)?;
    Ok(idcode.to_string())
}

pub(super) fn decode(payload: &str, ctx: &DecodeCtx) -> Result<DecodedBatch, DecodeFailure> {
    let mut batch_idcode: Option<String> = None;
    let mut points = Vec::new();

    for (lineno, line) in payload.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (ts_raw, idcode, fields) = split_line(line);
        check_idcode(idcode).map_err(DecodeFailure::Reject)?;
        if batch_idcode.is_none() {
            batch_idcode = Some(idcode.to_string());
        }

        // A bad timestamp drops only this line.
        let timestamp = match ts_raw {
            Some(raw) => match parse_timestamp(raw, ctx) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "skipping line with bad timestamp");
                    continue;
                }
            },
            None => ctx.received_at,
        };

        for field in fields.unwrap_or_default().split(',') {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value: f64 = value.trim().parse().map_err(|_| {
                DecodeFailure::Retry(
                    StructError::from(CoreReason::ValueParse)
                        .with_detail(format!("line {}: bad value for {key:?}", lineno + 1)),
                )
            })?;
            points.push(Point {
                channel_key: key.to_string(),
                timestamp,
                value,
            });
        }
    }

    let idcode = batch_idcode.ok_or_else(|| {
        DecodeFailure::Reject(StructError::from(CoreReason::Decode).with_detail("empty payload"))
    })?;
    Ok(DecodedBatch { idcode, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx() -> DecodeCtx {
        DecodeCtx::utc(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn line_without_timestamp_uses_receipt_time() {
        let batch = decode("L1,t1=10.5*", &ctx()).unwrap();
        assert_eq!(batch.idcode, "L1");
        assert_eq!(batch.points.len(), 1);
        assert_eq!(batch.points[0].channel_key, "t1");
        assert_eq!(batch.points[0].value, 10.5);
        assert_eq!(batch.points[0].timestamp, ctx().received_at);
    }

    #[test]
    fn timestamp_prefix_overrides_receipt_time() {
        let batch = decode("2024-05-01T08:30:00;L1,t1=1,t2=2", &ctx()).unwrap();
        let expect = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        assert_eq!(batch.points.len(), 2);
        assert!(batch.points.iter().all(|p| p.timestamp == expect));
    }

    #[test]
    fn bad_timestamp_skips_only_that_line() {
        let payload = "nonsense;L1,t1=1\nL1,t1=2";
        let batch = decode(payload, &ctx()).unwrap();
        assert_eq!(batch.points.len(), 1);
        assert_eq!(batch.points[0].value, 2.0);
    }

    #[test]
    fn bad_value_aborts_the_submission_for_retry() {
        let err = decode("L1,t1=1\nL1,t1=oops", &ctx()).unwrap_err();
        assert!(matches!(err, DecodeFailure::Retry(_)));
    }

    #[test]
    fn malformed_idcode_rejects_the_submission() {
        let err = decode("bad id,t1=1", &ctx()).unwrap_err();
        assert!(matches!(err, DecodeFailure::Reject(_)));
    }

    #[test]
    fn blank_lines_and_bare_fields_are_ignored() {
        let payload = "\nL1,t1=1,flags,=9,t2=2\n\n";
        let batch = decode(payload, &ctx()).unwrap();
        let keys: Vec<&str> = batch.points.iter().map(|p| p.channel_key.as_str()).collect();
        assert_eq!(keys, vec!["t1", "t2"]);
    }

    #[test]
    fn star_truncates_the_line() {
        let batch = decode("L1,t1=1*,t2=2", &ctx()).unwrap();
        assert_eq!(batch.points.len(), 1);
    }

    #[test]
    fn peek_reads_first_line_idcode() {
        assert_eq!(
            peek_idcode("2024-05-01T08:30:00;L9,t1=1").unwrap(),
            "L9".to_string()
        );
        assert!(peek_idcode("").is_err());
        assert!(peek_idcode("no good,t1=1").is_err());
    }
}
