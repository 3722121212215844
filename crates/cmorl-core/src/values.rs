//! Discounted per-objective returns

use crate::error::{CmorlError, Result};

fn check_gamma(gamma: f64, done: bool) -> Result<()> {
    let ok = if done {
        (0.0..=1.0).contains(&gamma)
    } else {
        (0.0..1.0).contains(&gamma)
    };
    if !ok {
        return Err(CmorlError::InvalidParameter(format!(
            "gamma {} out of range for a {} trajectory",
            gamma,
            if done { "terminated" } else { "truncated" }
        )));
    }
    Ok(())
}

fn width_of<R: AsRef<[f64]>>(rows: &[R]) -> Result<usize> {
    let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
    for row in rows {
        if row.as_ref().len() != width {
            return Err(CmorlError::DimensionMismatch {
                expected: width,
                actual: row.as_ref().len(),
            });
        }
    }
    Ok(width)
}

/// Discounted return of every step, per objective
///
/// `values[t] = r[t] + gamma * values[t + 1]`. A terminated trajectory
/// (`done`) has nothing after its last step. A truncated one bootstraps the
/// tail by assuming the last reward repeats forever, so the last step is
/// worth `r / (1 - gamma)`.
pub fn values<R: AsRef<[f64]>>(rewards: &[R], gamma: f64, done: bool) -> Result<Vec<Vec<f64>>> {
    check_gamma(gamma, done)?;
    let width = width_of(rewards)?;
    let Some(last) = rewards.last() else {
        return Ok(Vec::new());
    };

    let mut running: Vec<f64> = if done {
        vec![0.0; width]
    } else {
        last.as_ref().iter().map(|r| r / (1.0 - gamma)).collect()
    };

    let mut out = vec![Vec::new(); rewards.len()];
    for (t, row) in rewards.iter().enumerate().rev() {
        if done || t + 1 < rewards.len() {
            for (acc, r) in running.iter_mut().zip(row.as_ref()) {
                *acc = r + gamma * *acc;
            }
        }
        out[t] = running.clone();
    }
    Ok(out)
}

/// Discounted return from the first step; empty for an empty trajectory
pub fn estimated_value<R: AsRef<[f64]>>(rewards: &[R], gamma: f64, done: bool) -> Result<Vec<f64>> {
    Ok(values(rewards, gamma, done)?
        .into_iter()
        .next()
        .unwrap_or_default())
}

/// Mean absolute error between critic predictions and realised values, per objective
pub fn value_error<P, V>(predictions: &[P], values: &[V]) -> Result<Vec<f64>>
where
    P: AsRef<[f64]>,
    V: AsRef<[f64]>,
{
    if predictions.len() != values.len() {
        return Err(CmorlError::ShapeError(format!(
            "{} predictions for {} values",
            predictions.len(),
            values.len()
        )));
    }
    let width = width_of(values)?;
    if predictions.is_empty() {
        return Ok(Vec::new());
    }

    let mut error = vec![0.0; width];
    for (p, v) in predictions.iter().zip(values) {
        let p = p.as_ref();
        if p.len() != width {
            return Err(CmorlError::DimensionMismatch {
                expected: width,
                actual: p.len(),
            });
        }
        for (e, (a, b)) in error.iter_mut().zip(p.iter().zip(v.as_ref())) {
            *e += (a - b).abs();
        }
    }
    let n = predictions.len() as f64;
    Ok(error.into_iter().map(|e| e / n).collect())
}
