//! Wire payload decoding. Each protocol turns one raw submission payload
//! into a resolved logger idcode plus a flat list of [`Point`]s; nothing in
//! here touches the store.

mod delimited;
mod keyed;
mod time;

use std::io::Read;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use flate2::read::ZlibDecoder;
use orion_error::prelude::*;
use regex::Regex;

use crate::error::{CoreError, CoreReason, CoreResult};
use crate::model::{Point, Protocol, RawSubmission};

pub use delimited::peek_idcode;
pub use time::parse_timestamp;

/// How a failed decode disposes of its submission. Construction sites pick
/// the variant; callers never have to re-classify an error.
#[derive(Debug)]
pub enum DecodeFailure {
    /// Permanent. The submission transitions to `Failed`.
    Reject(CoreError),
    /// Transient. The submission stays `New` and is retried later.
    Retry(CoreError),
}

impl DecodeFailure {
    pub fn error(&self) -> &CoreError {
        match self {
            DecodeFailure::Reject(e) | DecodeFailure::Retry(e) => e,
        }
    }
}

/// Context a decoder needs beyond the payload itself: the receipt time (the
/// fallback timestamp) and the resolved logger's timestamp conventions.
#[derive(Debug, Clone)]
pub struct DecodeCtx {
    pub received_at: DateTime<Utc>,
    /// Naive timestamps are UTC when set; otherwise localized via `timezone`.
    pub in_utc: bool,
    pub timezone: Option<Tz>,
}

impl DecodeCtx {
    pub fn utc(received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            in_utc: true,
            timezone: None,
        }
    }
}

/// Decoder output: the idcode the payload itself names plus the decoded
/// points, in payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    pub idcode: String,
    pub points: Vec<Point>,
}

static IDCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("idcode pattern"));

/// Logger identifiers are allow-listed to `[A-Za-z0-9_-]+`; anything else
/// rejects the whole submission before any side effect.
pub fn check_idcode(idcode: &str) -> CoreResult<()> {
    if IDCODE_RE.is_match(idcode) {
        Ok(())
    } else {
        StructError::from(CoreReason::MalformedIdentifier)
            .with_detail(format!("bad logger identifier {idcode:?}"))
            .err()
    }
}

/// Undo the optional transport compression. Only `zlib+base64` is known;
/// an unknown tag or an undecodable body is a decode error.
pub fn expand_payload(sub: &RawSubmission) -> CoreResult<String> {
    match sub.compression.as_deref() {
        None => Ok(sub.payload.clone()),
        Some("zlib+base64") => {
            let raw = BASE64.decode(sub.payload.trim()).map_err(|e| {
                StructError::from(CoreReason::Decode).with_detail(format!("base64: {e}"))
            })?;
            let mut text = String::new();
            ZlibDecoder::new(raw.as_slice())
                .read_to_string(&mut text)
                .map_err(|e| {
                    StructError::from(CoreReason::Decode).with_detail(format!("zlib: {e}"))
                })?;
            Ok(text)
        }
        Some(other) => StructError::from(CoreReason::Decode)
            .with_detail(format!("unknown compression {other:?}"))
            .err(),
    }
}

/// Decode an already-expanded payload for the submission's protocol.
pub fn decode(
    protocol: Protocol,
    payload: &str,
    ctx: &DecodeCtx,
) -> Result<DecodedBatch, DecodeFailure> {
    match protocol {
        Protocol::Delimited => delimited::decode(payload, ctx),
        Protocol::KeyedText => keyed::decode(payload, ctx.received_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionStatus;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn sub(payload: &str, compression: Option<&str>) -> RawSubmission {
        RawSubmission {
            id: crate::model::SubmissionId(1),
            idcode: "L1".into(),
            payload: payload.into(),
            protocol: Protocol::Delimited,
            version: String::new(),
            compression: compression.map(str::to_string),
            status: SubmissionStatus::New,
            logger: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn idcode_pattern_is_enforced() {
        assert!(check_idcode("abc-12_X").is_ok());
        assert!(check_idcode("").is_err());
        assert!(check_idcode("a b").is_err());
        assert!(check_idcode("x;y").is_err());
    }

    #[test]
    fn zlib_base64_payload_round_trips() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"L1,t1=10.5").unwrap();
        let packed = BASE64.encode(enc.finish().unwrap());

        let text = expand_payload(&sub(&packed, Some("zlib+base64"))).unwrap();
        assert_eq!(text, "L1,t1=10.5");
    }

    #[test]
    fn unknown_compression_is_a_decode_error() {
        assert!(expand_payload(&sub("x", Some("gzip"))).is_err());
        assert!(expand_payload(&sub("not base64!!", Some("zlib+base64"))).is_err());
    }
}
