use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(LoggerId);
id_type!(ChannelId);
id_type!(SampleId);
id_type!(SubmissionId);
id_type!(FormulaId);
id_type!(AlertId);

// ---------------------------------------------------------------------------
// Protocol & submission status
// ---------------------------------------------------------------------------

/// Wire protocols the decoder understands. Closed enum: adding a protocol
/// means adding a decode arm, not touching existing paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Newline-separated `[<ts>;]<idcode>,<key>=<val>,...[*]` records.
    Delimited,
    /// JSON payload with `idcode`, `sensor` and a `data` key-value string.
    KeyedText,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Delimited => "delimited",
            Protocol::KeyedText => "keyed-text",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission lifecycle. Transitions are one-directional from `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    New,
    Processed,
    Failed,
    Deleted,
}

impl SubmissionStatus {
    /// Whether the status can still change.
    pub fn is_final(&self) -> bool {
        !matches!(self, SubmissionStatus::New)
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// A physical field device / reporting endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Logger {
    pub id: LoggerId,
    /// Unique identification code, `^[A-Za-z0-9_-]+$`.
    pub idcode: String,
    pub name: String,
    /// Named timezone for localizing naive timestamps when `in_utc` is off.
    pub timezone: Option<Tz>,
    /// Whether the device reports naive timestamps in UTC.
    pub in_utc: bool,
    pub active: bool,
    pub aggregates: LoggerAggregates,
}

/// Recomputed (never patched) measuring metadata for a Logger.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoggerAggregates {
    pub first_sample: Option<DateTime<Utc>>,
    pub last_sample: Option<DateTime<Utc>>,
    pub sample_count: u64,
    pub submission_count: u64,
    pub last_submission: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Everyone,
    Admins,
    Nobody,
}

/// A Logger's named data stream with its own admission thresholds.
///
/// Threshold fields at or below zero fall back to the pipeline defaults.
/// Alert and filter bounds are optional; `None` disables the bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub logger: LoggerId,
    /// Unique key within the logger, e.g. `bme_Temperature`.
    pub key: String,
    pub name: String,
    /// Min seconds between saved values.
    pub min_time: f64,
    /// Seconds after which a value is always saved.
    pub max_time: f64,
    /// Min change from the previous saved value.
    pub min_change: f64,
    pub alert_low: Option<f64>,
    pub alert_high: Option<f64>,
    pub filter_low: Option<f64>,
    pub filter_high: Option<f64>,
    pub visibility: Visibility,
    pub active: bool,
}

impl Channel {
    pub fn has_alert_bounds(&self) -> bool {
        self.alert_low.is_some() || self.alert_high.is_some()
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One admitted, timestamped reading for a Channel. Created exclusively by
/// the admission filter; immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub id: SampleId,
    pub channel: ChannelId,
    pub value: f64,
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
    pub submission: Option<SubmissionId>,
}

// ---------------------------------------------------------------------------
// RawSubmission
// ---------------------------------------------------------------------------

/// One raw payload delivery from a Logger, prior to decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSubmission {
    pub id: SubmissionId,
    /// Identifier the sender claimed at intake; payload may resolve another.
    pub idcode: String,
    pub payload: String,
    pub protocol: Protocol,
    pub version: String,
    /// `Some("zlib+base64")` when the payload is compressed.
    pub compression: Option<String>,
    pub status: SubmissionStatus,
    /// Resolved during processing; `None` until then.
    pub logger: Option<LoggerId>,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

/// Closed formula variants with type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaKind {
    /// Free restricted-arithmetic expression over `{c1..c4, f1}`.
    Polynomial { expression: String },
    /// V-notch weir transform: one channel input (head in mm) and a fixed
    /// notch angle in degrees.
    VWeir { angle_deg: f64 },
}

/// Channel/formula inputs bound to the fixed expression variables.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormulaInputs {
    pub c1: Option<ChannelId>,
    pub c2: Option<ChannelId>,
    pub c3: Option<ChannelId>,
    pub c4: Option<ChannelId>,
    pub f1: Option<FormulaId>,
}

/// A derived channel computed by expression over up to four Channels and
/// one nested Formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub id: FormulaId,
    pub logger: LoggerId,
    pub name: String,
    pub kind: FormulaKind,
    pub inputs: FormulaInputs,
    pub multiplier: f64,
    pub active: bool,
}

/// A date-scoped replacement for a Formula's default expression/multiplier.
/// Valid from `effective_from` until the next override's `effective_from`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSegmentOverride {
    pub formula: FormulaId,
    pub effective_from: DateTime<Utc>,
    pub expression: String,
    pub multiplier: f64,
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// A debounced threshold-breach record. While an unexpired Alert exists for
/// a Channel, no new Alerts are created for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub channel: ChannelId,
    pub state: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl Alert {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

// ---------------------------------------------------------------------------
// Decoded points
// ---------------------------------------------------------------------------

/// One decoded reading: a channel key, a UTC timestamp and a raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub channel_key: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
