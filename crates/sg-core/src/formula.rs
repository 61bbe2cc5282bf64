//! Derived-channel evaluation: join configured input series on exact
//! timestamps, drive iteration off the densest input, and run the active
//! expression (default or time-segment override) per row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use sg_expr::{Bindings, Program, Var};
use tracing::warn;

use crate::error::{CoreReason, CoreResult};
use crate::model::{Formula, FormulaInputs, FormulaKind};
use crate::store::SampleStore;

/// Nested formula inputs stop resolving past this depth; a deeper (or
/// cyclic) chain contributes an empty series instead of recursing forever.
pub const MAX_NESTING_DEPTH: usize = 4;

/// One output row. `value = None` marks a computed gap: an invalid driver
/// row or a per-point evaluation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub valid: bool,
}

/// Timestamp-keyed rows for one bound input variable.
struct InputSeries {
    var: Var,
    rows: BTreeMap<DateTime<Utc>, (f64, bool)>,
}

pub struct FormulaEvaluator<'a> {
    store: &'a dyn SampleStore,
}

impl<'a> FormulaEvaluator<'a> {
    pub fn new(store: &'a dyn SampleStore) -> Self {
        Self { store }
    }

    /// Evaluate a formula over `[start, end]`. With `show_invalid` off,
    /// rows whose driver sample is invalid come back as `value = None`.
    pub fn series(
        &self,
        formula: &Formula,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        show_invalid: bool,
    ) -> CoreResult<Vec<FormulaPoint>> {
        self.series_at(formula, start, end, show_invalid, 0)
    }

    fn series_at(
        &self,
        formula: &Formula,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        show_invalid: bool,
        depth: usize,
    ) -> CoreResult<Vec<FormulaPoint>> {
        match &formula.kind {
            FormulaKind::Polynomial { expression } => {
                self.polynomial(formula, expression, start, end, show_invalid, depth)
            }
            FormulaKind::VWeir { angle_deg } => {
                self.vweir(formula, *angle_deg, start, end, show_invalid, depth)
            }
        }
    }

    fn polynomial(
        &self,
        formula: &Formula,
        expression: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        show_invalid: bool,
        depth: usize,
    ) -> CoreResult<Vec<FormulaPoint>> {
        let inputs = self.gather(&formula.inputs, start, end, depth)?;
        let Some(driver) = driver_index(&inputs) else {
            return Ok(Vec::new());
        };

        // Compiled once per invocation. Overrides switch in ascending
        // effective_from order; each stays active until the next one.
        let compile = |src: &str| {
            Program::compile(src).map_err(|e| {
                StructError::from(CoreReason::ExpressionEval)
                    .with_detail(format!("formula {}: {e}", formula.name))
            })
        };
        let mut active = (compile(expression)?, formula.multiplier);
        let overrides = self.store.overrides_for(formula.id);
        let mut pending: Vec<(DateTime<Utc>, Program, f64)> = Vec::with_capacity(overrides.len());
        for ovr in &overrides {
            pending.push((ovr.effective_from, compile(&ovr.expression)?, ovr.multiplier));
        }
        let mut next_override = 0;

        let mut out = Vec::new();
        let mut warned = false;
        let driver_rows: Vec<(DateTime<Utc>, (f64, bool))> = inputs[driver]
            .rows
            .iter()
            .map(|(ts, row)| (*ts, *row))
            .collect();

        for (ts, (_, driver_valid)) in driver_rows {
            while next_override < pending.len() && ts >= pending[next_override].0 {
                let (_, program, multiplier) = pending[next_override].clone();
                active = (program, multiplier);
                next_override += 1;
            }
            if !driver_valid && !show_invalid {
                out.push(FormulaPoint {
                    timestamp: ts,
                    value: None,
                    valid: false,
                });
                continue;
            }
            // Exact-timestamp join; any configured input missing the row
            // skips it entirely.
            let Some(bindings) = join_row(&inputs, ts) else {
                continue;
            };
            let value = match active.0.eval(&bindings) {
                Ok(v) => Some(v * active.1),
                Err(e) => {
                    if !warned {
                        warn!(formula = %formula.name, timestamp = %ts, error = %e,
                            "formula evaluation failed, emitting gap");
                        warned = true;
                    }
                    None
                }
            };
            out.push(FormulaPoint {
                timestamp: ts,
                value,
                valid: driver_valid,
            });
        }
        Ok(out)
    }

    fn vweir(
        &self,
        formula: &Formula,
        angle_deg: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        show_invalid: bool,
        depth: usize,
    ) -> CoreResult<Vec<FormulaPoint>> {
        let head_channel = formula.inputs.c1.ok_or_else(|| {
            StructError::from(CoreReason::ExpressionEval)
                .with_detail(format!("v-weir formula {} has no c1 input", formula.name))
        })?;
        // depth bookkeeping matches the polynomial path even though a weir
        // cannot nest further
        let _ = depth;
        let tan_half_angle = (angle_deg.to_radians() / 2.0).tan();

        let mut out = Vec::new();
        for sample in self.store.samples_in_range(head_channel, start, end, true) {
            if !sample.valid && !show_invalid {
                out.push(FormulaPoint {
                    timestamp: sample.timestamp,
                    value: None,
                    valid: false,
                });
                continue;
            }
            // head below the notch has zero flow, not a domain error
            let head_m = sample.value / 1000.0;
            let flow = if head_m < 0.0 {
                0.0
            } else {
                1381.0 * head_m.powf(2.5) * tan_half_angle * formula.multiplier
            };
            out.push(FormulaPoint {
                timestamp: sample.timestamp,
                value: Some(flow),
                valid: sample.valid,
            });
        }
        Ok(out)
    }

    fn gather(
        &self,
        inputs: &FormulaInputs,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        depth: usize,
    ) -> CoreResult<Vec<InputSeries>> {
        let mut series = Vec::new();
        let channels = [
            (Var::C1, inputs.c1),
            (Var::C2, inputs.c2),
            (Var::C3, inputs.c3),
            (Var::C4, inputs.c4),
        ];
        for (var, channel) in channels {
            let Some(channel) = channel else { continue };
            let rows = self
                .store
                .samples_in_range(channel, start, end, true)
                .into_iter()
                .map(|s| (s.timestamp, (s.value, s.valid)))
                .collect();
            series.push(InputSeries { var, rows });
        }
        if let Some(nested_id) = inputs.f1 {
            let rows = if depth >= MAX_NESTING_DEPTH {
                warn!(formula = %nested_id, "formula nesting too deep, input yields no rows");
                BTreeMap::new()
            } else {
                let nested = self.store.formula(nested_id).ok_or_else(|| {
                    StructError::from(CoreReason::ExpressionEval)
                        .with_detail(format!("unknown nested formula {nested_id}"))
                })?;
                self.series_at(&nested, start, end, false, depth + 1)?
                    .into_iter()
                    .filter_map(|p| p.value.map(|v| (p.timestamp, (v, true))))
                    .collect()
            };
            series.push(InputSeries { var: Var::F1, rows });
        }
        Ok(series)
    }
}

/// Densest input wins; ties keep the earliest in c1..c4, f1 order.
fn driver_index(inputs: &[InputSeries]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, input) in inputs.iter().enumerate() {
        match best {
            None => best = Some(i),
            Some(b) if input.rows.len() > inputs[b].rows.len() => best = Some(i),
            Some(_) => {}
        }
    }
    best
}

/// Bind every configured input at `ts`; `None` on any miss.
fn join_row(inputs: &[InputSeries], ts: DateTime<Utc>) -> Option<Bindings> {
    let mut bindings = Bindings::new();
    for input in inputs {
        let (value, _) = input.rows.get(&ts)?;
        bindings.set(input.var, *value);
    }
    Some(bindings)
}
