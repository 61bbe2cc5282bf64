//! Per-channel save policy: which decoded points become stored samples, and
//! whether a stored sample is flagged valid.

use sg_config::IngestDefaults;

use crate::error::CoreResult;
use crate::model::{Channel, Point, Sample, SubmissionId};
use crate::store::SampleStore;

/// Effective save thresholds. Channel values at or below zero fall back to
/// the pipeline defaults, so a fresh auto-created channel inherits them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavePolicy {
    /// Min seconds since the previous sample before a change is saved.
    pub min_time: f64,
    /// Seconds after which a value is saved regardless of change.
    pub max_time: f64,
    /// Min absolute change from the previous saved value.
    pub min_change: f64,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            min_time: 30.0,
            max_time: 1800.0,
            min_change: 1.0,
        }
    }
}

impl SavePolicy {
    pub fn from_defaults(defaults: &IngestDefaults) -> Self {
        Self {
            min_time: defaults.min_time.as_secs_f64(),
            max_time: defaults.max_time.as_secs_f64(),
            min_change: defaults.min_change,
        }
    }

    /// Per-channel thresholds with fallback to these defaults.
    pub fn resolve(&self, channel: &Channel) -> Self {
        let pick = |own: f64, default: f64| if own > 0.0 { own } else { default };
        Self {
            min_time: pick(channel.min_time, self.min_time),
            max_time: pick(channel.max_time, self.max_time),
            min_change: pick(channel.min_change, self.min_change),
        }
    }

    /// Save decision against the previous stored sample. No previous sample
    /// always admits.
    pub fn admits(&self, prev: Option<&Sample>, point: &Point) -> bool {
        let Some(prev) = prev else {
            return true;
        };
        let age = (point.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        let change = (point.value - prev.value).abs();
        (age >= self.min_time && change >= self.min_change) || age >= self.max_time
    }
}

/// Range validity. Out-of-range samples are stored with `valid = false`,
/// never dropped.
pub fn is_valid(channel: &Channel, value: f64) -> bool {
    if let Some(low) = channel.filter_low
        && value < low
    {
        return false;
    }
    if let Some(high) = channel.filter_high
        && value > high
    {
        return false;
    }
    true
}

/// Admission filter over a store. `enforce_thresholds` is off for wire
/// formats that carry device-side timestamps and already rate-limit at the
/// source; those admit every well-formed point but still compute validity.
pub struct AdmissionFilter {
    defaults: SavePolicy,
}

impl AdmissionFilter {
    pub fn new(defaults: SavePolicy) -> Self {
        Self { defaults }
    }

    /// Run one decoded point through the save policy. Returns the stored
    /// sample, or `None` when the policy dropped the point.
    pub fn ingest(
        &self,
        store: &dyn SampleStore,
        channel: &Channel,
        point: &Point,
        submission: Option<SubmissionId>,
        enforce_thresholds: bool,
    ) -> CoreResult<Option<Sample>> {
        if enforce_thresholds {
            let policy = self.defaults.resolve(channel);
            let prev = store.last_sample(channel.id);
            if !policy.admits(prev.as_ref(), point) {
                return Ok(None);
            }
        }
        let valid = is_valid(channel, point.value);
        let sample =
            store.insert_sample(channel.id, point.value, valid, point.timestamp, submission)?;
        Ok(Some(sample))
    }
}
