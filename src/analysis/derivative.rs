//! Centered finite differences
//!
//! A derivative with respect to one parameter takes two complete runs on
//! the same working copy of the parameters: first with the value raised by
//! `step / 2`, then lowered by `step` from there. Every table column but
//! the first is differenced; column 0 (the independent variable) is kept
//! from the high run.

use crate::error::{CambError, Result, ResultExt};
use crate::types::{ParameterSet, RunResult, Table};
use std::collections::BTreeMap;

/// Output of a finite-difference derivative
#[derive(Debug, Clone)]
pub struct DerivativeResult {
    /// Parameter that was varied
    pub param: String,
    pub step: f64,
    /// `(high - low) / step` for every table of the high run
    pub tables: BTreeMap<String, Table>,
    /// Captured stdout of the `(low, high)` runs
    pub stdout: (Vec<u8>, Vec<u8>),
}

impl DerivativeResult {
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

/// Add `delta` to a numeric parameter in place, returning the new value
pub fn perturb(params: &mut ParameterSet, key: &str, delta: f64) -> Result<f64> {
    let current = params
        .get(key)
        .ok_or_else(|| CambError::Config(format!("cannot vary missing parameter {}", key)))?;
    let value: f64 = current.trim().parse().map_err(|_| {
        CambError::Config(format!("parameter {} = {:?} is not a number", key, current))
    })?;

    let updated = value + delta;
    params.insert(key, updated.to_string());
    Ok(updated)
}

/// `(high[:, 1:] - low[:, 1:]) / step`, keeping column 0 of `high`
pub fn centered_difference(
    high: &RunResult,
    low: &RunResult,
    step: f64,
) -> Result<BTreeMap<String, Table>> {
    let mut tables = BTreeMap::new();

    for (name, high_table) in &high.tables {
        let low_table = low.tables.get(name).ok_or_else(|| {
            CambError::Derivative(format!("output {} missing from the low run", name))
        })?;
        if high_table.shape() != low_table.shape() {
            return Err(CambError::Derivative(format!(
                "output {} changed shape: {:?} vs {:?}",
                name,
                high_table.shape(),
                low_table.shape()
            )));
        }

        let columns = high_table.num_columns();
        let mut diff = high_table.clone();
        for (i, (value, low_value)) in diff
            .as_mut_slice()
            .iter_mut()
            .zip(low_table.as_slice())
            .enumerate()
        {
            if i % columns != 0 {
                *value = (*value - low_value) / step;
            }
        }
        tables.insert(name.clone(), diff);
    }

    Ok(tables)
}

/// Run `invoke` twice around `params[key]` and difference the results
pub fn derivative<F>(key: &str, params: &ParameterSet, step: f64, mut invoke: F) -> Result<DerivativeResult>
where
    F: FnMut(&ParameterSet) -> Result<RunResult>,
{
    if step == 0.0 || !step.is_finite() {
        return Err(CambError::Derivative(format!("invalid step {}", step)));
    }

    let mut working = params.clone();

    let high_value = perturb(&mut working, key, step / 2.0)?;
    tracing::debug!("Derivative of {}: high run at {}", key, high_value);
    let high = invoke(&working).with_context(|| format!("high run at {} = {}", key, high_value))?;

    let low_value = perturb(&mut working, key, -step)?;
    tracing::debug!("Derivative of {}: low run at {}", key, low_value);
    let low = invoke(&working).with_context(|| format!("low run at {} = {}", key, low_value))?;

    let tables = centered_difference(&high, &low, step)?;
    Ok(DerivativeResult {
        param: key.to_string(),
        step,
        tables,
        stdout: (low.stdout, high.stdout),
    })
}
