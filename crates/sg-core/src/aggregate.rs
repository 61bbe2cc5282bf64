//! Logger aggregate maintenance. Aggregates are always recomputed from the
//! stored samples and submissions, never incremented in place, so a rerun
//! after a partial failure converges on the same numbers.

use crate::error::CoreResult;
use crate::model::{Logger, LoggerAggregates};
use crate::store::SampleStore;

pub fn recompute(store: &dyn SampleStore, logger: &Logger) -> CoreResult<LoggerAggregates> {
    let samples = store.sample_stats(logger.id);
    let submissions = store.submission_stats(&logger.idcode);
    let aggregates = LoggerAggregates {
        first_sample: samples.first,
        last_sample: samples.last,
        sample_count: samples.count,
        submission_count: submissions.count,
        last_submission: submissions.last_received,
    };
    store.write_logger_aggregates(logger.id, aggregates)?;
    Ok(aggregates)
}
