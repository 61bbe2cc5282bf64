//! The batch coordinator: drains pending submissions through decode,
//! admission and alerting, one submission at a time, each as its own unit
//! of work.

use std::time::{Duration, Instant};

use chrono::Utc;
use orion_error::prelude::*;
use sg_config::IngestConfig;
use sg_core::admission::{AdmissionFilter, SavePolicy};
use sg_core::alert::{AlertEvaluator, AlertNotifier};
use sg_core::decode::{self, DecodeCtx, DecodeFailure, DecodedBatch};
use sg_core::error::CoreReason;
use sg_core::model::{Logger, LoggerId, Protocol, RawSubmission, SubmissionId, SubmissionStatus};
use sg_core::store::{SampleStore, SubmissionFilter};
use tracing::{debug, info, warn};

use crate::error::RuntimeResult;

/// Run-scoped narrowing of the pending pull, layered over the config.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Max submissions this run; falls back to `[batch].limit`.
    pub limit: Option<usize>,
    /// Only submissions delivered under this idcode.
    pub idcode: Option<String>,
    /// Only this single submission.
    pub submission: Option<SubmissionId>,
    /// Wall-clock budget; checked between submissions only, so the last
    /// claimed submission always completes. Falls back to
    /// `[batch].max_processing_time`.
    pub max_processing_time: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub succeeded: u64,
    pub failed: u64,
    /// Pending submissions whose idcode matches no logger: (idcode, count).
    pub unknown_loggers: Vec<(String, u64)>,
    /// Pending submissions whose logger exists but is inactive.
    pub inactive_loggers: Vec<(String, u64)>,
    pub budget_exhausted: bool,
}

enum UnitOutcome {
    Processed(LoggerId),
    Rejected,
    /// Left `New` for a later run (transient failure or unresolvable logger).
    Deferred,
}

pub struct BatchCoordinator<'a> {
    store: &'a dyn SampleStore,
    notifier: &'a dyn AlertNotifier,
    admission: AdmissionFilter,
    alerts: AlertEvaluator,
    batch_limit: Option<usize>,
    batch_budget: Option<Duration>,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(
        store: &'a dyn SampleStore,
        notifier: &'a dyn AlertNotifier,
        config: &IngestConfig,
    ) -> Self {
        let expiry = chrono::Duration::from_std(config.ingest.alert_expiry.as_duration())
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        Self {
            store,
            notifier,
            admission: AdmissionFilter::new(SavePolicy::from_defaults(&config.ingest)),
            alerts: AlertEvaluator::new(expiry),
            batch_limit: config.batch.limit,
            batch_budget: config.batch.max_processing_time.map(|d| d.as_duration()),
        }
    }

    /// Drain one batch. Submissions whose intake idcode matches no active
    /// logger are never claimed; they stay pending and show up in the
    /// report's diagnostics.
    pub fn run(&self, options: &BatchOptions) -> RuntimeResult<BatchReport> {
        let filter = SubmissionFilter {
            idcode: options.idcode.clone(),
            id: options.submission,
        };
        let pending = self.store.pending_submissions(&filter);
        let mut eligible: Vec<RawSubmission> = pending
            .into_iter()
            .filter(|sub| {
                self.store
                    .logger_by_idcode(&sub.idcode)
                    .is_some_and(|l| l.active)
            })
            .collect();
        if let Some(limit) = options.limit.or(self.batch_limit) {
            eligible.truncate(limit);
        }

        let budget = options.max_processing_time.or(self.batch_budget);
        let started = Instant::now();
        let mut report = BatchReport::default();
        let mut touched: Vec<LoggerId> = Vec::new();

        for sub in &eligible {
            if let Some(budget) = budget
                && started.elapsed() >= budget
            {
                report.budget_exhausted = true;
                info!(
                    processed = report.succeeded + report.failed,
                    remaining = eligible.len() as u64 - (report.succeeded + report.failed),
                    "batch budget exhausted"
                );
                break;
            }
            match self.process_one(sub.id) {
                UnitOutcome::Processed(logger) => {
                    report.succeeded += 1;
                    if !touched.contains(&logger) {
                        touched.push(logger);
                    }
                }
                UnitOutcome::Rejected | UnitOutcome::Deferred => report.failed += 1,
            }
        }

        for logger_id in touched {
            if let Some(logger) = self.store.logger(logger_id)
                && let Err(e) = sg_core::aggregate::recompute(self.store, &logger)
            {
                warn!(logger = %logger.idcode, error = %e, "aggregate recompute failed");
            }
        }

        for diag in self.store.pending_diagnostics() {
            let entry = (diag.idcode, diag.count);
            if diag.logger_known {
                report.inactive_loggers.push(entry);
            } else {
                report.unknown_loggers.push(entry);
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            unresolved = report.unknown_loggers.len() + report.inactive_loggers.len(),
            "batch complete"
        );
        Ok(report)
    }

    /// One submission, claimed exclusively and either finished (Processed /
    /// Failed) or released back to the pending pool.
    fn process_one(&self, id: SubmissionId) -> UnitOutcome {
        let Some(sub) = self.store.claim_submission(id) else {
            debug!(submission = %id, "submission no longer claimable, skipping");
            return UnitOutcome::Deferred;
        };

        let payload = match decode::expand_payload(&sub) {
            Ok(p) => p,
            Err(e) => {
                warn!(submission = %id, error = %e, "payload expansion failed");
                return self.finish(id, SubmissionStatus::Failed, None, UnitOutcome::Rejected);
            }
        };

        // Resolve the logger the payload names. Delimited payloads identify
        // the logger themselves and may introduce a new one; keyed payloads
        // must reference an existing logger.
        let (logger, batch) = match self.resolve_and_decode(&sub, &payload) {
            Ok(pair) => pair,
            Err(DecodeFailure::Reject(e)) => {
                warn!(submission = %id, error = %e, "submission rejected");
                return self.finish(id, SubmissionStatus::Failed, None, UnitOutcome::Rejected);
            }
            Err(DecodeFailure::Retry(e)) => {
                warn!(submission = %id, error = %e, "submission deferred for retry");
                self.store.release_submission(id);
                return UnitOutcome::Deferred;
            }
        };

        let enforce_thresholds = sub.protocol == Protocol::KeyedText;
        let now = Utc::now();
        for point in &batch.points {
            let channel = match self.store.channel_or_create(logger.id, &point.channel_key) {
                Ok(c) => c,
                Err(e) => {
                    warn!(submission = %id, error = %e, "channel lookup failed, deferring");
                    self.store.release_submission(id);
                    return UnitOutcome::Deferred;
                }
            };
            let admitted = match self.admission.ingest(
                self.store,
                &channel,
                point,
                Some(sub.id),
                enforce_thresholds,
            ) {
                Ok(s) => s,
                Err(e) => {
                    warn!(submission = %id, error = %e, "sample insert failed, deferring");
                    self.store.release_submission(id);
                    return UnitOutcome::Deferred;
                }
            };
            if let Some(sample) = admitted
                && let Err(e) =
                    self.alerts
                        .check(self.store, self.notifier, &logger, &channel, &sample, now)
            {
                warn!(channel = %channel.key, error = %e, "alert evaluation failed");
            }
        }

        debug!(
            submission = %id,
            idcode = %batch.idcode,
            points = batch.points.len(),
            "submission processed"
        );
        self.finish(
            id,
            SubmissionStatus::Processed,
            Some(logger.id),
            UnitOutcome::Processed(logger.id),
        )
    }

    fn resolve_and_decode(
        &self,
        sub: &RawSubmission,
        payload: &str,
    ) -> Result<(Logger, DecodedBatch), DecodeFailure> {
        match sub.protocol {
            Protocol::Delimited => {
                let idcode = decode::peek_idcode(payload).map_err(DecodeFailure::Reject)?;
                let logger = match self.store.logger_by_idcode(&idcode) {
                    Some(l) => l,
                    None => self
                        .store
                        .create_logger(&idcode)
                        .map_err(DecodeFailure::Retry)?,
                };
                let ctx = DecodeCtx {
                    received_at: sub.received_at,
                    in_utc: logger.in_utc,
                    timezone: logger.timezone,
                };
                let batch = decode::decode(sub.protocol, payload, &ctx)?;
                Ok((logger, batch))
            }
            Protocol::KeyedText => {
                let ctx = DecodeCtx::utc(sub.received_at);
                let batch = decode::decode(sub.protocol, payload, &ctx)?;
                let logger = self.store.logger_by_idcode(&batch.idcode).ok_or_else(|| {
                    DecodeFailure::Retry(
                        StructError::from(CoreReason::UnresolvableLogger)
                            .with_detail(format!("payload names unknown logger {:?}", batch.idcode)),
                    )
                })?;
                Ok((logger, batch))
            }
        }
    }

    fn finish(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        logger: Option<LoggerId>,
        outcome: UnitOutcome,
    ) -> UnitOutcome {
        if let Err(e) = self.store.finish_submission(id, status, logger) {
            warn!(submission = %id, error = %e, "status transition failed");
        }
        outcome
    }
}
