use crate::config::FixedPointConfig;
use crate::progress::{NoopRecoveryProgress, RecoveryObserver, RecoveryStage};
use crate::types::{InputError, Membership, RecoveryError, check_observation_vector};
use ndarray::{Array1, ArrayView1};

/// Result of the cluster-derivative fixed-point iteration.
#[derive(Debug, Clone)]
pub struct FixedPointSolution {
    /// Updated per-observation derivative values.
    pub values: Array1<f64>,
    pub iterations: usize,
    /// `false` when `max_iterations` was reached with updates still above tolerance.
    pub converged: bool,
    /// Largest absolute per-category update of the last sweep.
    pub max_update: f64,
}

pub fn solve_cluster_derivative(
    membership: &Membership,
    second_derivative: ArrayView1<'_, f64>,
    contribution: ArrayView1<'_, f64>,
    initial: ArrayView1<'_, f64>,
    config: &FixedPointConfig,
) -> Result<FixedPointSolution, RecoveryError> {
    solve_cluster_derivative_with_progress(
        membership,
        second_derivative,
        contribution,
        initial,
        config,
        &mut NoopRecoveryProgress,
    )
}

/// Gauss-Seidel sweeps over the dimensions until no category moves by more
/// than `config.tolerance`.
///
/// For dimension `q` and each of its categories `c`, a sweep computes
///
/// `update(c) = -sum_{i in c}(contribution_i + value_i * d2_i) / sum_{i in c} d2_i`
///
/// and adds `update(c)` to the value of every observation in `c`. Dimensions
/// are visited in order and each sees the values left by the previous one.
/// At the fixed point every category's weighted residual sums to zero.
pub fn solve_cluster_derivative_with_progress<P>(
    membership: &Membership,
    second_derivative: ArrayView1<'_, f64>,
    contribution: ArrayView1<'_, f64>,
    initial: ArrayView1<'_, f64>,
    config: &FixedPointConfig,
    progress: &mut P,
) -> Result<FixedPointSolution, RecoveryError>
where
    P: RecoveryObserver,
{
    let n_obs = membership.n_obs();
    check_observation_vector("second_derivative", second_derivative, n_obs)?;
    check_observation_vector("contribution", contribution, n_obs)?;
    check_observation_vector("initial", initial, n_obs)?;

    let curvature = category_curvature(membership, second_derivative)?;
    let mut updates: Vec<Vec<f64>> = membership.sizes().iter().map(|&n| vec![0.0; n]).collect();
    let mut values = initial.to_owned();

    let mut iterations = 0usize;
    let mut pending = true;
    let mut max_update = 0.0f64;

    progress.on_stage_start(RecoveryStage::FixedPoint, config.max_iterations);
    while pending && iterations < config.max_iterations {
        if progress.is_cancelled() {
            return Err(RecoveryError::Interrupted {
                stage: RecoveryStage::FixedPoint,
                pass: iterations,
            });
        }
        iterations += 1;
        pending = false;
        max_update = 0.0;

        for (dimension, (update, weight)) in updates.iter_mut().zip(&curvature).enumerate() {
            let column = membership.column(dimension);
            update.fill(0.0);

            for ((&category, &d2), (&dx, &value)) in column
                .iter()
                .zip(second_derivative.iter())
                .zip(contribution.iter().zip(values.iter()))
            {
                update[category] += dx + value * d2;
            }

            for (u, &w) in update.iter_mut().zip(weight) {
                *u = -*u / w;
                max_update = max_update.max(u.abs());
                if u.abs() > config.tolerance {
                    pending = true;
                }
            }

            for (value, &category) in values.iter_mut().zip(column.iter()) {
                *value += update[category];
            }
        }

        log::debug!("Cluster derivative sweep {iterations}: max update {max_update:.3e}");
        progress.on_stage_advance(RecoveryStage::FixedPoint, iterations);
    }
    progress.on_stage_finish(RecoveryStage::FixedPoint);

    let converged = !pending;
    if !converged {
        log::warn!(
            "Cluster derivative: maximum iterations reached ({}), last max update {:.3e}.",
            config.max_iterations,
            max_update
        );
    }

    Ok(FixedPointSolution {
        values,
        iterations,
        converged,
        max_update,
    })
}

/// Per-category sums of the second derivative, one vector per dimension.
fn category_curvature(
    membership: &Membership,
    second_derivative: ArrayView1<'_, f64>,
) -> Result<Vec<Vec<f64>>, InputError> {
    let mut curvature: Vec<Vec<f64>> =
        membership.sizes().iter().map(|&n| vec![0.0; n]).collect();
    for (dimension, sums) in curvature.iter_mut().enumerate() {
        for (&category, &d2) in membership.column(dimension).iter().zip(second_derivative) {
            sums[category] += d2;
        }
        if let Some(category) = sums.iter().position(|&w| w == 0.0) {
            return Err(InputError::DegenerateCurvature {
                dimension,
                category,
            });
        }
    }
    Ok(curvature)
}
