//! # Multi-Way Coefficient Recovery
//!
//! Recovers one coefficient per category for any number of fixed-effect
//! dimensions by propagation over the observation hypergraph. An observation
//! whose categories are all known except one pins that last category:
//!
//! `coef(unknown) = sumFE(observation) - sum(coef(known))`
//!
//! When propagation reaches a fixpoint with observations left unresolved, a
//! new batch of references is placed on the most-resolved pending
//! observation: all of its unresolved categories but the first are fixed to
//! zero. Picking the observation closest to resolvable keeps the number of
//! references per pass as small as possible, so collinear structures (for
//! example a dimension nested in another) receive exactly the extra references
//! they need and fully constrained components receive none. This selection is
//! a greedy heuristic; rank is never computed explicitly.
//!
//! All progress state (resolved flags, per-observation `rowsum`, the pending
//! worklist) lives in a `ResolutionState` allocated per call.

use crate::config::RecoveryConfig;
use crate::progress::{NoopRecoveryProgress, RecoveryObserver, RecoveryStage};
use crate::shared::index::ObservationOrdering;
use crate::types::{
    CoefficientRow, Membership, RecoveryError, RecoveryStatus, check_observation_vector,
};
use ndarray::{Array1, Array2, ArrayView1};

/// Coefficients for every dimension plus reference bookkeeping.
#[derive(Debug, Clone)]
pub struct GeneralRecovery {
    pub coefficients: Vec<Array1<f64>>,
    /// Number of categories fixed to zero as references, per dimension.
    pub reference_counts: Vec<usize>,
    pub is_reference: Vec<Vec<bool>>,
    pub status: RecoveryStatus,
}

impl GeneralRecovery {
    /// The coefficient table, dimension by dimension in category order.
    pub fn rows(&self) -> Vec<CoefficientRow> {
        self.coefficients
            .iter()
            .zip(&self.is_reference)
            .enumerate()
            .flat_map(|(dimension, (values, flags))| {
                values
                    .iter()
                    .zip(flags)
                    .enumerate()
                    .map(move |(category, (&value, &is_reference))| CoefficientRow {
                        dimension,
                        category,
                        value,
                        is_reference,
                    })
            })
            .collect()
    }

    pub fn total_references(&self) -> usize {
        self.reference_counts.iter().sum()
    }
}

/// Per-call progress state, indexed by dimension/category and observation.
struct ResolutionState {
    values: Vec<Vec<f64>>,
    resolved: Vec<Vec<bool>>,
    is_reference: Vec<Vec<bool>>,
    reference_counts: Vec<usize>,
    done: Array2<bool>,
    rowsums: Vec<usize>,
    n_resolved: usize,
}

impl ResolutionState {
    fn new(membership: &Membership) -> Self {
        let sizes = membership.sizes();
        Self {
            values: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            resolved: sizes.iter().map(|&n| vec![false; n]).collect(),
            is_reference: sizes.iter().map(|&n| vec![false; n]).collect(),
            reference_counts: vec![0; sizes.len()],
            done: Array2::from_elem((membership.n_obs(), sizes.len()), false),
            rowsums: vec![0; membership.n_obs()],
            n_resolved: 0,
        }
    }

    /// Assigns `value` to a category and marks every observation touching it.
    fn resolve(
        &mut self,
        ordering: &ObservationOrdering,
        dimension: usize,
        category: usize,
        value: f64,
    ) {
        debug_assert!(!self.resolved[dimension][category]);
        self.values[dimension][category] = value;
        self.resolved[dimension][category] = true;
        self.n_resolved += 1;
        for &obs in ordering.observations(dimension, category) {
            self.done[[obs, dimension]] = true;
            self.rowsums[obs] += 1;
        }
    }
}

pub fn recover_general(
    membership: &Membership,
    sum_fe: ArrayView1<'_, f64>,
    ordering: &ObservationOrdering,
    config: &RecoveryConfig,
) -> Result<GeneralRecovery, RecoveryError> {
    recover_general_with_progress(
        membership,
        sum_fe,
        ordering,
        config,
        &mut NoopRecoveryProgress,
    )
}

pub fn recover_general_with_progress<P>(
    membership: &Membership,
    sum_fe: ArrayView1<'_, f64>,
    ordering: &ObservationOrdering,
    config: &RecoveryConfig,
    progress: &mut P,
) -> Result<GeneralRecovery, RecoveryError>
where
    P: RecoveryObserver,
{
    check_observation_vector("sum_fe", sum_fe, membership.n_obs())?;
    ordering.check_against(membership)?;

    let n_dims = membership.n_dims();
    let total = membership.total_categories();
    log::info!(
        "Recovering {}-way fixed effects: {} categories, {} observations",
        n_dims,
        total,
        membership.n_obs()
    );

    let mut state = ResolutionState::new(membership);
    let mut worklist: Vec<usize> = (0..membership.n_obs()).collect();
    let mut passes = 0usize;
    let mut max_sweeps = 0usize;
    let mut converged = true;

    progress.on_stage_start(RecoveryStage::ReferenceSelection, total);
    while !worklist.is_empty() {
        if progress.is_cancelled() {
            return Err(RecoveryError::Interrupted {
                stage: RecoveryStage::ReferenceSelection,
                pass: passes,
            });
        }
        if passes == config.max_passes {
            log::warn!(
                "Multi-way recovery stopped at the pass cap ({}) with {} categories unresolved.",
                config.max_passes,
                total - state.n_resolved
            );
            converged = false;
            break;
        }
        passes += 1;
        let resolved_before = state.n_resolved;

        let Some(pivot) = select_reference_row(&worklist, &state.rowsums, n_dims) else {
            return Err(RecoveryError::Stalled {
                stage: RecoveryStage::ReferenceSelection,
                unresolved: total - state.n_resolved,
            });
        };
        let placed = place_references(&mut state, membership, ordering, pivot);
        log::debug!("Pass {passes}: observation {pivot} seeded {placed} references");

        let (sweeps, capped) = propagate(
            &mut state,
            membership,
            sum_fe,
            ordering,
            &mut worklist,
            config.max_sweeps,
            passes,
            &*progress,
        )?;
        max_sweeps = max_sweeps.max(sweeps);
        if capped {
            log::warn!(
                "Propagation hit the sweep cap ({}) in pass {}.",
                config.max_sweeps,
                passes
            );
            converged = false;
        }

        worklist.retain(|&obs| state.rowsums[obs] < n_dims);
        if state.n_resolved == resolved_before {
            return Err(RecoveryError::Stalled {
                stage: RecoveryStage::Propagation,
                unresolved: total - state.n_resolved,
            });
        }
        progress.on_stage_advance(RecoveryStage::ReferenceSelection, state.n_resolved);
    }
    progress.on_stage_finish(RecoveryStage::ReferenceSelection);

    log::info!(
        "Multi-way recovery finished after {} passes: references per dimension {:?}, converged: {}",
        passes,
        state.reference_counts,
        converged
    );

    Ok(GeneralRecovery {
        coefficients: state.values.into_iter().map(Array1::from_vec).collect(),
        reference_counts: state.reference_counts,
        is_reference: state.is_reference,
        status: RecoveryStatus {
            passes,
            max_sweeps,
            converged,
        },
    })
}

/// Picks the pending observation with the most resolved categories short of
/// full resolution. `rowsum == Q - 2` is the best possible and ends the scan;
/// ties go to the earliest observation in worklist order.
fn select_reference_row(worklist: &[usize], rowsums: &[usize], n_dims: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for &obs in worklist {
        let rowsum = rowsums[obs];
        if rowsum >= n_dims {
            continue;
        }
        if n_dims >= 2 && rowsum == n_dims - 2 {
            return Some(obs);
        }
        if best.is_none_or(|(_, best_rowsum)| rowsum > best_rowsum) {
            best = Some((obs, rowsum));
        }
    }
    best.map(|(obs, _)| obs)
}

/// Fixes every unresolved category of `pivot` except the first to zero.
fn place_references(
    state: &mut ResolutionState,
    membership: &Membership,
    ordering: &ObservationOrdering,
    pivot: usize,
) -> usize {
    let mut spared = false;
    let mut placed = 0;
    for dimension in 0..membership.n_dims() {
        if state.done[[pivot, dimension]] {
            continue;
        }
        if !spared {
            spared = true;
            continue;
        }
        let category = membership.category(pivot, dimension);
        state.resolve(ordering, dimension, category, 0.0);
        state.is_reference[dimension][category] = true;
        state.reference_counts[dimension] += 1;
        placed += 1;
    }
    placed
}

/// Sweeps the worklist until it stops shrinking. Returns the sweep count and
/// whether the sweep cap ended the loop. Cancellation is polled once per sweep.
#[allow(clippy::too_many_arguments)]
fn propagate<P>(
    state: &mut ResolutionState,
    membership: &Membership,
    sum_fe: ArrayView1<'_, f64>,
    ordering: &ObservationOrdering,
    worklist: &mut Vec<usize>,
    max_sweeps: usize,
    pass: usize,
    progress: &P,
) -> Result<(usize, bool), RecoveryError>
where
    P: RecoveryObserver,
{
    let n_dims = membership.n_dims();
    let mut next = Vec::with_capacity(worklist.len());
    let mut sweeps = 0;

    loop {
        if progress.is_cancelled() {
            return Err(RecoveryError::Interrupted {
                stage: RecoveryStage::Propagation,
                pass,
            });
        }
        if sweeps == max_sweeps {
            return Ok((sweeps, true));
        }
        sweeps += 1;

        next.clear();
        for &obs in worklist.iter() {
            let rowsum = state.rowsums[obs];
            if rowsum + 1 < n_dims {
                next.push(obs);
            } else if rowsum + 1 == n_dims {
                let Some(target) = (0..n_dims).find(|&q| !state.done[[obs, q]]) else {
                    continue;
                };
                let known: f64 = (0..n_dims)
                    .filter(|&q| q != target)
                    .map(|q| state.values[q][membership.category(obs, q)])
                    .sum();
                let category = membership.category(obs, target);
                state.resolve(ordering, target, category, sum_fe[obs] - known);
            }
        }

        let fixpoint = next.len() == worklist.len();
        std::mem::swap(worklist, &mut next);
        if fixpoint || worklist.is_empty() {
            return Ok((sweeps, false));
        }
    }
}
