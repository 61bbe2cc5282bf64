//! Export assembly: flatten stored samples and derived formula rows from
//! any number of requested series into one timestamp-ordered list.

use chrono::{DateTime, Utc};

use crate::formula::FormulaPoint;
use crate::model::{ChannelId, FormulaId, Sample, SampleId};

/// One export row, either a stored sample or a synthetic formula value.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesRow {
    Sample {
        id: SampleId,
        channel: ChannelId,
        value: f64,
        valid: bool,
        timestamp: DateTime<Utc>,
    },
    Derived {
        formula: FormulaId,
        value: Option<f64>,
        valid: bool,
        timestamp: DateTime<Utc>,
    },
}

impl SeriesRow {
    pub fn from_sample(sample: &Sample) -> Self {
        SeriesRow::Sample {
            id: sample.id,
            channel: sample.channel,
            value: sample.value,
            valid: sample.valid,
            timestamp: sample.timestamp,
        }
    }

    pub fn derived(formula: FormulaId, point: &FormulaPoint) -> Self {
        SeriesRow::Derived {
            formula,
            value: point.value,
            valid: point.valid,
            timestamp: point.timestamp,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SeriesRow::Sample { timestamp, .. } | SeriesRow::Derived { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// Merge per-series row lists into one ascending timeline. The sort is
/// stable: rows sharing a timestamp keep their input order.
pub fn merge_series(groups: Vec<Vec<SeriesRow>>) -> Vec<SeriesRow> {
    let mut merged: Vec<SeriesRow> = groups.into_iter().flatten().collect();
    merged.sort_by_key(SeriesRow::timestamp);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sample_row(id: u64, secs: i64) -> SeriesRow {
        SeriesRow::Sample {
            id: SampleId(id),
            channel: ChannelId(1),
            value: id as f64,
            valid: true,
            timestamp: ts(secs),
        }
    }

    fn derived_row(formula: u64, secs: i64, value: Option<f64>) -> SeriesRow {
        SeriesRow::Derived {
            formula: FormulaId(formula),
            value,
            valid: value.is_some(),
            timestamp: ts(secs),
        }
    }

    #[test]
    fn merge_orders_by_timestamp_across_kinds() {
        let merged = merge_series(vec![
            vec![sample_row(1, 30), sample_row(2, 10)],
            vec![derived_row(7, 20, Some(1.5)), derived_row(7, 40, None)],
        ]);
        let stamps: Vec<DateTime<Utc>> = merged.iter().map(SeriesRow::timestamp).collect();
        assert_eq!(stamps, vec![ts(10), ts(20), ts(30), ts(40)]);
    }

    #[test]
    fn merge_is_stable_for_equal_timestamps() {
        let merged = merge_series(vec![
            vec![sample_row(1, 10)],
            vec![derived_row(7, 10, Some(2.0))],
            vec![sample_row(2, 10)],
        ]);
        assert_eq!(merged[0], sample_row(1, 10));
        assert_eq!(merged[1], derived_row(7, 10, Some(2.0)));
        assert_eq!(merged[2], sample_row(2, 10));
    }

    #[test]
    fn derived_gaps_survive_the_merge() {
        let merged = merge_series(vec![vec![derived_row(7, 10, None)]]);
        assert!(matches!(merged[0], SeriesRow::Derived { value: None, .. }));
    }
}
