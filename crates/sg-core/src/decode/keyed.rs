//! Keyed-text wire format: a JSON object carrying a comma-separated
//! `key=value` string from one sensor, e.g.
//!
//! ```json
//! {"idcode": "L1", "sensor": "bme", "data": "Temperature=21.75,Humidity=40", "id": "0"}
//! ```
//!
//! Channel keys are namespaced as `{sensor}_{key}`. The format carries no
//! timestamps; every point gets the submission's receipt time.

use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use serde::Deserialize;

use super::{DecodeFailure, DecodedBatch, check_idcode};
use crate::error::CoreReason;
use crate::model::Point;

#[derive(Debug, Deserialize)]
struct KeyedPayload {
    idcode: String,
    sensor: String,
    data: String,
    #[serde(default)]
    #[allow(dead_code)]
    id: Option<String>,
}

pub(super) fn decode(
    payload: &str,
    received_at: DateTime<Utc>,
) -> Result<DecodedBatch, DecodeFailure> {
    let parsed: KeyedPayload = serde_json::from_str(payload).map_err(|e| {
        DecodeFailure::Reject(
            StructError::from(CoreReason::Decode).with_detail(format!("bad json: {e}")),
        )
    })?;
    check_idcode(&parsed.idcode).map_err(DecodeFailure::Reject)?;

    let mut points = Vec::new();
    for keyval in parsed.data.split(',') {
        let Some((key, value)) = keyval.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value: f64 = value.trim().parse().map_err(|_| {
            DecodeFailure::Retry(
                StructError::from(CoreReason::ValueParse)
                    .with_detail(format!("bad value for {key:?}")),
            )
        })?;
        points.push(Point {
            channel_key: format!("{}_{}", parsed.sensor, key),
            timestamp: received_at,
            value,
        });
    }
    Ok(DecodedBatch {
        idcode: parsed.idcode,
        points,
    })
}
