//! End-to-end pipeline runs against the in-memory store: intake to samples,
//! alerts, derived series and the batch report.

use chrono::{DateTime, TimeZone, Utc};
use sg_config::IngestConfig;
use sg_core::alert::LogNotifier;
use sg_core::formula::FormulaEvaluator;
use sg_core::model::{
    Formula, FormulaId, FormulaInputs, FormulaKind, Logger, Protocol, SubmissionStatus,
    TimeSegmentOverride,
};
use sg_core::store::{MemoryStore, SampleStore};
use sg_runtime::{BatchCoordinator, BatchOptions};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn active_logger(store: &MemoryStore, idcode: &str) -> Logger {
    let mut logger = store.create_logger(idcode).unwrap();
    logger.active = true;
    store.update_logger(logger.clone());
    logger
}

fn run_batch(store: &MemoryStore) -> sg_runtime::BatchReport {
    let config = IngestConfig::default();
    let notifier = LogNotifier;
    BatchCoordinator::new(store, &notifier, &config)
        .run(&BatchOptions::default())
        .unwrap()
}

#[test]
fn keyed_submission_creates_sample_at_receipt_time() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let payload = r#"{"idcode": "L1", "sensor": "bme", "data": "Temperature=21.75", "id": "0"}"#;
    let id = store.add_submission("L1", Protocol::KeyedText, payload, ts(1000));

    let report = run_batch(&store);
    assert_eq!((report.succeeded, report.failed), (1, 0));
    assert_eq!(
        store.submission(id).unwrap().status,
        SubmissionStatus::Processed
    );

    let channel = store.channel_by_key(logger.id, "bme_Temperature").unwrap();
    let samples = store.samples_in_range(channel.id, ts(0), ts(2000), true);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 21.75);
    assert_eq!(samples[0].timestamp, ts(1000));
    assert!(samples[0].valid);
}

#[test]
fn bad_value_line_leaves_submission_new_for_retry() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let id = store.add_submission("L1", Protocol::Delimited, "L1,t1=10.5*\nL1,t1=abc", ts(0));

    let report = run_batch(&store);
    assert_eq!((report.succeeded, report.failed), (0, 1));
    assert_eq!(store.submission(id).unwrap().status, SubmissionStatus::New);

    // nothing was stored, so the retry starts from a clean slate
    if let Some(channel) = store.channel_by_key(logger.id, "t1") {
        assert!(store.samples_in_range(channel.id, ts(0), ts(10), true).is_empty());
    }

    // a rerun picks it up again (still pending)
    let report = run_batch(&store);
    assert_eq!(report.failed, 1);
}

#[test]
fn duplicate_timestamps_across_retries_stay_single_samples() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let line = "2024-05-01T10:00:00;L1,t1=4.2";
    store.add_submission("L1", Protocol::Delimited, line, ts(0));
    store.add_submission("L1", Protocol::Delimited, line, ts(5));

    let report = run_batch(&store);
    assert_eq!(report.succeeded, 2);

    let channel = store.channel_by_key(logger.id, "t1").unwrap();
    let samples = store.samples_in_range(channel.id, ts(0), Utc::now(), true);
    assert_eq!(samples.len(), 1);
}

#[test]
fn polynomial_formula_joins_and_multiplies() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let a = store.channel_or_create(logger.id, "a").unwrap();
    let b = store.channel_or_create(logger.id, "b").unwrap();
    store.insert_sample(a.id, 3.0, true, ts(500), None).unwrap();
    store.insert_sample(b.id, 4.0, true, ts(500), None).unwrap();

    let formula = Formula {
        id: FormulaId(1),
        logger: logger.id,
        name: "sum".into(),
        kind: FormulaKind::Polynomial {
            expression: "c1 + c2".into(),
        },
        inputs: FormulaInputs {
            c1: Some(a.id),
            c2: Some(b.id),
            ..Default::default()
        },
        multiplier: 2.0,
        active: true,
    };
    let rows = FormulaEvaluator::new(&store)
        .series(&formula, ts(0), ts(1000), false)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, ts(500));
    assert_eq!(rows[0].value, Some(14.0));
}

#[test]
fn vweir_zero_head_yields_zero_flow() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let head = store.channel_or_create(logger.id, "head").unwrap();
    store.insert_sample(head.id, 0.0, true, ts(0), None).unwrap();

    let formula = Formula {
        id: FormulaId(1),
        logger: logger.id,
        name: "weir".into(),
        kind: FormulaKind::VWeir { angle_deg: 90.0 },
        inputs: FormulaInputs {
            c1: Some(head.id),
            ..Default::default()
        },
        multiplier: 1.0,
        active: true,
    };
    let rows = FormulaEvaluator::new(&store)
        .series(&formula, ts(0), ts(10), false)
        .unwrap();
    assert_eq!(rows[0].value, Some(0.0));
}

#[test]
fn breaching_samples_raise_exactly_one_alert_within_expiry() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let mut channel = store.channel_or_create(logger.id, "s_level").unwrap();
    channel.alert_low = Some(10.0);
    store.update_channel(channel.clone());

    let payload_a = r#"{"idcode": "L1", "sensor": "s", "data": "level=5"}"#;
    let payload_b = r#"{"idcode": "L1", "sensor": "s", "data": "level=1"}"#;
    store.add_submission("L1", Protocol::KeyedText, payload_a, ts(0));
    store.add_submission("L1", Protocol::KeyedText, payload_b, ts(600));

    let report = run_batch(&store);
    assert_eq!(report.succeeded, 2);
    assert_eq!(store.alerts_for_channel(channel.id).len(), 1);
}

#[test]
fn override_applies_from_boundary_timestamp() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    let a = store.channel_or_create(logger.id, "a").unwrap();
    store.insert_sample(a.id, 7.0, true, ts(100), None).unwrap();

    let formula = Formula {
        id: FormulaId(1),
        logger: logger.id,
        name: "scaled".into(),
        kind: FormulaKind::Polynomial {
            expression: "c1".into(),
        },
        inputs: FormulaInputs {
            c1: Some(a.id),
            ..Default::default()
        },
        multiplier: 1.0,
        active: true,
    };
    store.add_formula(formula.clone());
    store.add_override(TimeSegmentOverride {
        formula: formula.id,
        effective_from: ts(100),
        expression: "c1 * 2".into(),
        multiplier: 1.0,
    });

    let rows = FormulaEvaluator::new(&store)
        .series(&formula, ts(0), ts(200), false)
        .unwrap();
    assert_eq!(rows[0].value, Some(14.0));
}

#[test]
fn unresolved_submissions_stay_pending_and_are_reported() {
    let store = MemoryStore::new();
    // known but inactive
    store.create_logger("sleeper").unwrap();
    let inactive = store.add_submission("sleeper", Protocol::Delimited, "sleeper,t1=1", ts(0));
    // never seen
    let unknown = store.add_submission("ghost", Protocol::Delimited, "ghost,t1=1", ts(1));

    let report = run_batch(&store);
    assert_eq!((report.succeeded, report.failed), (0, 0));
    assert_eq!(report.inactive_loggers, vec![("sleeper".to_string(), 1)]);
    assert_eq!(report.unknown_loggers, vec![("ghost".to_string(), 1)]);
    assert_eq!(store.submission(inactive).unwrap().status, SubmissionStatus::New);
    assert_eq!(store.submission(unknown).unwrap().status, SubmissionStatus::New);
}

#[test]
fn limit_and_budget_bound_the_batch() {
    let store = MemoryStore::new();
    active_logger(&store, "L1");
    for i in 0..3 {
        store.add_submission("L1", Protocol::Delimited, "L1,t1=1", ts(i));
    }

    let config = IngestConfig::default();
    let notifier = LogNotifier;
    let coordinator = BatchCoordinator::new(&store, &notifier, &config);

    let report = coordinator
        .run(&BatchOptions {
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.succeeded, 2);

    // zero budget trips before the first submission
    let report = coordinator
        .run(&BatchOptions {
            max_processing_time: Some(std::time::Duration::ZERO),
            ..Default::default()
        })
        .unwrap();
    assert!(report.budget_exhausted);
    assert_eq!(report.succeeded, 0);
}

#[test]
fn aggregates_recomputed_after_batch() {
    let store = MemoryStore::new();
    let logger = active_logger(&store, "L1");
    store.add_submission("L1", Protocol::Delimited, "L1,t1=1.0,t2=2.0", ts(100));

    run_batch(&store);
    let agg = store.logger(logger.id).unwrap().aggregates;
    assert_eq!(agg.sample_count, 2);
    assert_eq!(agg.submission_count, 1);
    assert_eq!(agg.last_submission, Some(ts(100)));
    assert_eq!(agg.first_sample, Some(ts(100)));
}

#[test]
fn delimited_payload_can_introduce_a_new_logger() {
    let store = MemoryStore::new();
    // intake idcode gates the batch; the payload names another device
    active_logger(&store, "relay");
    store.add_submission("relay", Protocol::Delimited, "node-7,t1=3.5", ts(0));

    let report = run_batch(&store);
    assert_eq!(report.succeeded, 1);
    let created = store.logger_by_idcode("node-7").unwrap();
    assert!(!created.active);
    let channel = store.channel_by_key(created.id, "t1").unwrap();
    assert_eq!(store.samples_in_range(channel.id, ts(0), ts(10), true).len(), 1);
}
