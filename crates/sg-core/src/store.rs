use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use orion_error::prelude::*;

use crate::error::{CoreReason, CoreResult};
use crate::model::{
    Alert, AlertId, Channel, ChannelId, Formula, FormulaId, Logger, LoggerAggregates, LoggerId,
    Protocol, RawSubmission, Sample, SampleId, SubmissionId, SubmissionStatus,
    TimeSegmentOverride, Visibility,
};

// ---------------------------------------------------------------------------
// Boundary types
// ---------------------------------------------------------------------------

/// Narrowing filters for the pending-submission pull.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    /// Only submissions whose intake idcode matches.
    pub idcode: Option<String>,
    /// Only this single submission.
    pub id: Option<SubmissionId>,
}

/// One diagnostics row: pending submissions that reference a logger which is
/// unknown (`logger_known == false`) or known but inactive.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDiagnostic {
    pub idcode: String,
    pub count: u64,
    pub logger_known: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleStats {
    pub count: u64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmissionStats {
    pub count: u64,
    pub last_received: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SampleStore — the persistence boundary
// ---------------------------------------------------------------------------

/// Persistence boundary for the pipeline. Engine internals are out of scope;
/// the trait captures exactly the operations the pipeline performs.
///
/// Contract notes:
/// - `insert_sample` is an idempotent upsert keyed by (channel, timestamp):
///   re-running a failed submission never duplicates an admitted sample.
/// - `claim_submission` hands out a `New` submission at most once until it is
///   released or finished; this is the exclusive per-submission claim.
/// - `write_logger_aggregates` must be serialized per logger by the
///   implementation.
pub trait SampleStore: Send + Sync {
    fn logger(&self, id: LoggerId) -> Option<Logger>;
    fn logger_by_idcode(&self, idcode: &str) -> Option<Logger>;
    /// Create a logger on first contact from an unseen identifier. Created
    /// inactive, UTC, named after its idcode.
    fn create_logger(&self, idcode: &str) -> CoreResult<Logger>;
    fn write_logger_aggregates(&self, id: LoggerId, agg: LoggerAggregates) -> CoreResult<()>;

    fn channel(&self, id: ChannelId) -> Option<Channel>;
    fn channel_by_key(&self, logger: LoggerId, key: &str) -> Option<Channel>;
    /// Fetch or auto-create the channel for an unseen key.
    fn channel_or_create(&self, logger: LoggerId, key: &str) -> CoreResult<Channel>;

    /// Most recent sample for a channel, by timestamp.
    fn last_sample(&self, channel: ChannelId) -> Option<Sample>;
    fn insert_sample(
        &self,
        channel: ChannelId,
        value: f64,
        valid: bool,
        timestamp: DateTime<Utc>,
        submission: Option<SubmissionId>,
    ) -> CoreResult<Sample>;
    /// Samples in `[start, end]` ordered by timestamp ascending.
    fn samples_in_range(
        &self,
        channel: ChannelId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_invalid: bool,
    ) -> Vec<Sample>;
    fn sample_stats(&self, logger: LoggerId) -> SampleStats;

    fn unexpired_alert(&self, channel: ChannelId, now: DateTime<Utc>) -> Option<Alert>;
    fn insert_alert(
        &self,
        channel: ChannelId,
        state: &str,
        created: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> CoreResult<Alert>;
    fn alerts_for_channel(&self, channel: ChannelId) -> Vec<Alert>;

    /// `New` submissions matching `filter`, ordered by (received_at, idcode).
    fn pending_submissions(&self, filter: &SubmissionFilter) -> Vec<RawSubmission>;
    /// Exclusive claim; `None` when already claimed or no longer `New`.
    fn claim_submission(&self, id: SubmissionId) -> Option<RawSubmission>;
    /// Return a claimed submission to the pending pool (status stays `New`).
    fn release_submission(&self, id: SubmissionId);
    /// Final status transition; also records the resolved logger.
    fn finish_submission(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        logger: Option<LoggerId>,
    ) -> CoreResult<()>;
    /// All-time submission stats for an intake idcode (any status).
    fn submission_stats(&self, idcode: &str) -> SubmissionStats;
    fn pending_diagnostics(&self) -> Vec<PendingDiagnostic>;

    fn formula(&self, id: FormulaId) -> Option<Formula>;
    /// Overrides ordered ascending by `effective_from`.
    fn overrides_for(&self, formula: FormulaId) -> Vec<TimeSegmentOverride>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    next_id: u64,
    loggers: HashMap<LoggerId, Logger>,
    logger_ids: HashMap<String, LoggerId>,
    channels: HashMap<ChannelId, Channel>,
    channel_ids: HashMap<(LoggerId, String), ChannelId>,
    samples: HashMap<ChannelId, BTreeMap<DateTime<Utc>, Sample>>,
    alerts: Vec<Alert>,
    submissions: BTreeMap<SubmissionId, RawSubmission>,
    claimed: HashSet<SubmissionId>,
    formulas: HashMap<FormulaId, Formula>,
    overrides: HashMap<FormulaId, Vec<TimeSegmentOverride>>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`SampleStore`] used by tests and the demo engine. A single
/// `RwLock` serializes every write, which also serializes per-logger
/// aggregate recomputes.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a logger row (test/seed helper).
    pub fn update_logger(&self, logger: Logger) {
        let mut inner = self.inner.write().expect("store lock");
        inner.logger_ids.insert(logger.idcode.clone(), logger.id);
        inner.loggers.insert(logger.id, logger);
    }

    /// Replace a channel row (test/seed helper).
    pub fn update_channel(&self, channel: Channel) {
        let mut inner = self.inner.write().expect("store lock");
        inner
            .channel_ids
            .insert((channel.logger, channel.key.clone()), channel.id);
        inner.channels.insert(channel.id, channel);
    }

    pub fn add_formula(&self, formula: Formula) -> FormulaId {
        let mut inner = self.inner.write().expect("store lock");
        let id = formula.id;
        inner.formulas.insert(id, formula);
        id
    }

    pub fn add_override(&self, ovr: TimeSegmentOverride) {
        let mut inner = self.inner.write().expect("store lock");
        let list = inner.overrides.entry(ovr.formula).or_default();
        list.push(ovr);
        list.sort_by_key(|o| o.effective_from);
    }

    /// Register a raw payload delivery (the intake path).
    pub fn add_submission(
        &self,
        idcode: &str,
        protocol: Protocol,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> SubmissionId {
        let mut inner = self.inner.write().expect("store lock");
        let id = SubmissionId(inner.next());
        inner.submissions.insert(
            id,
            RawSubmission {
                id,
                idcode: idcode.to_string(),
                payload: payload.to_string(),
                protocol,
                version: String::new(),
                compression: None,
                status: SubmissionStatus::New,
                logger: None,
                received_at,
            },
        );
        id
    }

    pub fn submission(&self, id: SubmissionId) -> Option<RawSubmission> {
        self.inner
            .read()
            .expect("store lock")
            .submissions
            .get(&id)
            .cloned()
    }

    pub fn set_submission_compression(&self, id: SubmissionId, compression: &str) {
        let mut inner = self.inner.write().expect("store lock");
        if let Some(sub) = inner.submissions.get_mut(&id) {
            sub.compression = Some(compression.to_string());
        }
    }
}

impl SampleStore for MemoryStore {
    fn logger(&self, id: LoggerId) -> Option<Logger> {
        self.inner.read().expect("store lock").loggers.get(&id).cloned()
    }

    fn logger_by_idcode(&self, idcode: &str) -> Option<Logger> {
        let inner = self.inner.read().expect("store lock");
        let id = inner.logger_ids.get(idcode)?;
        inner.loggers.get(id).cloned()
    }

    fn create_logger(&self, idcode: &str) -> CoreResult<Logger> {
        let mut inner = self.inner.write().expect("store lock");
        if let Some(id) = inner.logger_ids.get(idcode) {
            return Ok(inner.loggers[id].clone());
        }
        let id = LoggerId(inner.next());
        let logger = Logger {
            id,
            idcode: idcode.to_string(),
            name: idcode.to_string(),
            timezone: None,
            in_utc: true,
            active: false,
            aggregates: LoggerAggregates::default(),
        };
        inner.logger_ids.insert(idcode.to_string(), id);
        inner.loggers.insert(id, logger.clone());
        Ok(logger)
    }

    fn write_logger_aggregates(&self, id: LoggerId, agg: LoggerAggregates) -> CoreResult<()> {
        let mut inner = self.inner.write().expect("store lock");
        let logger = inner
            .loggers
            .get_mut(&id)
            .ok_or_else(|| StructError::from(CoreReason::Store).with_detail("unknown logger"))?;
        logger.aggregates = agg;
        Ok(())
    }

    fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.inner.read().expect("store lock").channels.get(&id).cloned()
    }

    fn channel_by_key(&self, logger: LoggerId, key: &str) -> Option<Channel> {
        let inner = self.inner.read().expect("store lock");
        let id = inner.channel_ids.get(&(logger, key.to_string()))?;
        inner.channels.get(id).cloned()
    }

    fn channel_or_create(&self, logger: LoggerId, key: &str) -> CoreResult<Channel> {
        let mut inner = self.inner.write().expect("store lock");
        if let Some(id) = inner.channel_ids.get(&(logger, key.to_string())) {
            return Ok(inner.channels[id].clone());
        }
        if !inner.loggers.contains_key(&logger) {
            return StructError::from(CoreReason::Store)
                .with_detail("channel for unknown logger")
                .err();
        }
        let id = ChannelId(inner.next());
        let channel = Channel {
            id,
            logger,
            key: key.to_string(),
            name: key.to_string(),
            min_time: 0.0,
            max_time: 0.0,
            min_change: 0.0,
            alert_low: None,
            alert_high: None,
            filter_low: None,
            filter_high: None,
            visibility: Visibility::Everyone,
            active: true,
        };
        inner.channel_ids.insert((logger, key.to_string()), id);
        inner.channels.insert(id, channel.clone());
        Ok(channel)
    }

    fn last_sample(&self, channel: ChannelId) -> Option<Sample> {
        let inner = self.inner.read().expect("store lock");
        let series = inner.samples.get(&channel)?;
        series.values().next_back().copied()
    }

    fn insert_sample(
        &self,
        channel: ChannelId,
        value: f64,
        valid: bool,
        timestamp: DateTime<Utc>,
        submission: Option<SubmissionId>,
    ) -> CoreResult<Sample> {
        let mut inner = self.inner.write().expect("store lock");
        if !inner.channels.contains_key(&channel) {
            return StructError::from(CoreReason::Store)
                .with_detail("sample for unknown channel")
                .err();
        }
        let series = inner.samples.entry(channel).or_default();
        // Samples are immutable: a retry that hits an existing (channel,
        // timestamp) slot returns the stored row instead of duplicating it.
        if let Some(existing) = series.get(&timestamp) {
            return Ok(*existing);
        }
        drop(series);
        let id = SampleId(inner.next());
        let sample = Sample {
            id,
            channel,
            value,
            valid,
            timestamp,
            submission,
        };
        inner
            .samples
            .entry(channel)
            .or_default()
            .insert(timestamp, sample);
        Ok(sample)
    }

    fn samples_in_range(
        &self,
        channel: ChannelId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_invalid: bool,
    ) -> Vec<Sample> {
        let inner = self.inner.read().expect("store lock");
        let Some(series) = inner.samples.get(&channel) else {
            return Vec::new();
        };
        series
            .range(start..=end)
            .map(|(_, s)| *s)
            .filter(|s| include_invalid || s.valid)
            .collect()
    }

    fn sample_stats(&self, logger: LoggerId) -> SampleStats {
        let inner = self.inner.read().expect("store lock");
        let mut stats = SampleStats::default();
        for (channel_id, series) in &inner.samples {
            let Some(channel) = inner.channels.get(channel_id) else {
                continue;
            };
            if channel.logger != logger {
                continue;
            }
            stats.count += series.len() as u64;
            if let Some(first) = series.keys().next() {
                stats.first = Some(stats.first.map_or(*first, |f| f.min(*first)));
            }
            if let Some(last) = series.keys().next_back() {
                stats.last = Some(stats.last.map_or(*last, |l| l.max(*last)));
            }
        }
        stats
    }

    fn unexpired_alert(&self, channel: ChannelId, now: DateTime<Utc>) -> Option<Alert> {
        let inner = self.inner.read().expect("store lock");
        inner
            .alerts
            .iter()
            .find(|a| a.channel == channel && !a.is_expired(now))
            .cloned()
    }

    fn insert_alert(
        &self,
        channel: ChannelId,
        state: &str,
        created: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> CoreResult<Alert> {
        let mut inner = self.inner.write().expect("store lock");
        let id = AlertId(inner.next());
        let alert = Alert {
            id,
            channel,
            state: state.to_string(),
            created,
            expires,
        };
        inner.alerts.push(alert.clone());
        Ok(alert)
    }

    fn alerts_for_channel(&self, channel: ChannelId) -> Vec<Alert> {
        let inner = self.inner.read().expect("store lock");
        inner
            .alerts
            .iter()
            .filter(|a| a.channel == channel)
            .cloned()
            .collect()
    }

    fn pending_submissions(&self, filter: &SubmissionFilter) -> Vec<RawSubmission> {
        let inner = self.inner.read().expect("store lock");
        let mut pending: Vec<RawSubmission> = inner
            .submissions
            .values()
            .filter(|s| s.status == SubmissionStatus::New && !inner.claimed.contains(&s.id))
            .filter(|s| filter.idcode.as_deref().is_none_or(|ic| s.idcode == ic))
            .filter(|s| filter.id.is_none_or(|id| s.id == id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            (a.received_at, a.idcode.as_str()).cmp(&(b.received_at, b.idcode.as_str()))
        });
        pending
    }

    fn claim_submission(&self, id: SubmissionId) -> Option<RawSubmission> {
        let mut inner = self.inner.write().expect("store lock");
        let sub = inner.submissions.get(&id)?;
        if sub.status != SubmissionStatus::New || inner.claimed.contains(&id) {
            return None;
        }
        let sub = sub.clone();
        inner.claimed.insert(id);
        Some(sub)
    }

    fn release_submission(&self, id: SubmissionId) {
        let mut inner = self.inner.write().expect("store lock");
        inner.claimed.remove(&id);
    }

    fn finish_submission(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        logger: Option<LoggerId>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().expect("store lock");
        let sub = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| StructError::from(CoreReason::Store).with_detail("unknown submission"))?;
        if sub.status.is_final() {
            return StructError::from(CoreReason::Store)
                .with_detail("submission status is final")
                .err();
        }
        sub.status = status;
        if logger.is_some() {
            sub.logger = logger;
        }
        inner.claimed.remove(&id);
        Ok(())
    }

    fn submission_stats(&self, idcode: &str) -> SubmissionStats {
        let inner = self.inner.read().expect("store lock");
        let mut stats = SubmissionStats::default();
        for sub in inner.submissions.values() {
            if sub.idcode == idcode {
                stats.count += 1;
                let received = sub.received_at;
                stats.last_received =
                    Some(stats.last_received.map_or(received, |l| l.max(received)));
            }
        }
        stats
    }

    fn pending_diagnostics(&self) -> Vec<PendingDiagnostic> {
        let inner = self.inner.read().expect("store lock");
        let mut counts: BTreeMap<(String, bool), u64> = BTreeMap::new();
        for sub in inner.submissions.values() {
            if sub.status != SubmissionStatus::New {
                continue;
            }
            match inner.logger_ids.get(&sub.idcode) {
                Some(id) if inner.loggers[id].active => {}
                Some(_) => {
                    *counts.entry((sub.idcode.clone(), true)).or_default() += 1;
                }
                None => {
                    *counts.entry((sub.idcode.clone(), false)).or_default() += 1;
                }
            }
        }
        counts
            .into_iter()
            .map(|((idcode, logger_known), count)| PendingDiagnostic {
                idcode,
                count,
                logger_known,
            })
            .collect()
    }

    fn formula(&self, id: FormulaId) -> Option<Formula> {
        self.inner.read().expect("store lock").formulas.get(&id).cloned()
    }

    fn overrides_for(&self, formula: FormulaId) -> Vec<TimeSegmentOverride> {
        let inner = self.inner.read().expect("store lock");
        inner.overrides.get(&formula).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn sample_insert_is_idempotent_per_timestamp() {
        let store = MemoryStore::new();
        let logger = store.create_logger("L1").unwrap();
        let ch = store.channel_or_create(logger.id, "t1").unwrap();

        let first = store.insert_sample(ch.id, 1.0, true, ts(100), None).unwrap();
        let second = store.insert_sample(ch.id, 9.0, true, ts(100), None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.value, 1.0);
        assert_eq!(store.samples_in_range(ch.id, ts(0), ts(200), true).len(), 1);
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let id = store.add_submission("L1", Protocol::Delimited, "x", ts(10));

        assert!(store.claim_submission(id).is_some());
        assert!(store.claim_submission(id).is_none());
        store.release_submission(id);
        assert!(store.claim_submission(id).is_some());
    }

    #[test]
    fn finish_is_one_directional() {
        let store = MemoryStore::new();
        let id = store.add_submission("L1", Protocol::Delimited, "x", ts(10));
        store
            .finish_submission(id, SubmissionStatus::Processed, None)
            .unwrap();
        assert!(
            store
                .finish_submission(id, SubmissionStatus::Failed, None)
                .is_err()
        );
    }

    #[test]
    fn pending_ordered_by_received_then_idcode() {
        let store = MemoryStore::new();
        store.add_submission("B", Protocol::Delimited, "x", ts(20));
        store.add_submission("A", Protocol::Delimited, "x", ts(20));
        store.add_submission("C", Protocol::Delimited, "x", ts(10));

        let order: Vec<(DateTime<Utc>, String)> = store
            .pending_submissions(&SubmissionFilter::default())
            .into_iter()
            .map(|s| (s.received_at, s.idcode))
            .collect();
        assert_eq!(
            order,
            vec![
                (ts(10), "C".to_string()),
                (ts(20), "A".to_string()),
                (ts(20), "B".to_string()),
            ]
        );
    }

    #[test]
    fn diagnostics_split_unknown_and_inactive() {
        let store = MemoryStore::new();
        // known-but-inactive logger
        store.create_logger("L1").unwrap();
        store.add_submission("L1", Protocol::Delimited, "x", ts(10));
        // unknown logger, two pending
        store.add_submission("ghost", Protocol::Delimited, "x", ts(11));
        store.add_submission("ghost", Protocol::Delimited, "x", ts(12));

        let diags = store.pending_diagnostics();
        assert_eq!(diags.len(), 2);
        let ghost = diags.iter().find(|d| d.idcode == "ghost").unwrap();
        assert_eq!((ghost.count, ghost.logger_known), (2, false));
        let l1 = diags.iter().find(|d| d.idcode == "L1").unwrap();
        assert_eq!((l1.count, l1.logger_known), (1, true));
    }
}
