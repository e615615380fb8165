//! # Two-Way Coefficient Recovery
//!
//! Fast path for models with exactly two fixed-effect dimensions. The
//! connectivity graph is bipartite, so every connected component is identified
//! up to one additive constant. The recoverer walks each component
//! breadth-first from a reference category of the second dimension (fixed to
//! zero) and alternates frontiers between the two dimensions:
//!
//! `coef(first) = sumFE(edge) - coef(second)` and vice versa.
//!
//! References are picked by a forward scan over the second dimension, so the
//! result is fully determined by the input order.

use crate::config::RecoveryConfig;
use crate::progress::{NoopRecoveryProgress, RecoveryObserver, RecoveryStage};
use crate::shared::index::CrossIndex;
use crate::types::{
    CoefficientRow, InputError, Membership, RecoveryError, RecoveryStatus,
    check_observation_vector,
};
use ndarray::{Array1, ArrayView1};

/// The two cross indexes of a two-way structure.
#[derive(Debug, Clone)]
pub struct BipartiteInput {
    first: CrossIndex,
    second: CrossIndex,
}

impl BipartiteInput {
    /// `first` lists, per category of dimension 0, the dimension-1 categories
    /// it meets; `second` is the mirror view.
    pub fn new(first: CrossIndex, second: CrossIndex) -> Result<Self, InputError> {
        if first.n_opposite() != second.n_categories() {
            return Err(InputError::MalformedIndex {
                dimension: 0,
                reason: format!(
                    "refers to {} opposite categories but dimension 1 has {}",
                    first.n_opposite(),
                    second.n_categories()
                ),
            });
        }
        if second.n_opposite() != first.n_categories() {
            return Err(InputError::MalformedIndex {
                dimension: 1,
                reason: format!(
                    "refers to {} opposite categories but dimension 0 has {}",
                    second.n_opposite(),
                    first.n_categories()
                ),
            });
        }
        if first.n_edges() != second.n_edges() {
            return Err(InputError::MalformedIndex {
                dimension: 1,
                reason: format!(
                    "holds {} edges but dimension 0 holds {}",
                    second.n_edges(),
                    first.n_edges()
                ),
            });
        }
        check_mirrored(&first, &second)?;
        Ok(Self { first, second })
    }

    /// Builds both cross indexes from a two-column membership and the
    /// observation-level `sumFE`.
    pub fn from_observations(
        membership: &Membership,
        sum_fe: ArrayView1<'_, f64>,
    ) -> Result<Self, InputError> {
        membership.require_dims(2)?;
        check_observation_vector("sum_fe", sum_fe, membership.n_obs())?;

        let sizes = membership.sizes();
        let mut first_edges = Vec::with_capacity(membership.n_obs());
        let mut second_edges = Vec::with_capacity(membership.n_obs());
        for (obs, &value) in sum_fe.iter().enumerate() {
            let i = membership.category(obs, 0);
            let j = membership.category(obs, 1);
            first_edges.push((i, j, value));
            second_edges.push((j, i, value));
        }

        let first = CrossIndex::from_edges(0, sizes[0], sizes[1], first_edges)?;
        let second = CrossIndex::from_edges(1, sizes[1], sizes[0], second_edges)?;
        Self::new(first, second)
    }

    pub fn n_first(&self) -> usize {
        self.first.n_categories()
    }

    pub fn n_second(&self) -> usize {
        self.second.n_categories()
    }
}

/// Both indexes must hold the same `(i, j, sumFE)` edges, one seen from each
/// side. Compared as sorted multisets.
fn check_mirrored(first: &CrossIndex, second: &CrossIndex) -> Result<(), InputError> {
    let by_endpoints = |a: &(usize, usize, f64), b: &(usize, usize, f64)| {
        (a.0, a.1).cmp(&(b.0, b.1)).then(a.2.total_cmp(&b.2))
    };
    let mut forward: Vec<_> = first.iter_edges().collect();
    let mut backward: Vec<_> = second.iter_edges().map(|(j, i, v)| (i, j, v)).collect();
    forward.sort_by(by_endpoints);
    backward.sort_by(by_endpoints);

    match forward.iter().zip(&backward).find(|(a, b)| a != b) {
        Some(((i, j, value), _)) => Err(InputError::MalformedIndex {
            dimension: 1,
            reason: format!(
                "edge ({i}, {j}) with sumFE {value} of dimension 0 has no mirror in dimension 1"
            ),
        }),
        None => Ok(()),
    }
}

/// Coefficient table for both dimensions.
#[derive(Debug, Clone)]
pub struct BipartiteRecovery {
    rows: Vec<CoefficientRow>,
    n_first: usize,
    pub status: RecoveryStatus,
}

impl BipartiteRecovery {
    /// Dimension 0 rows first, then dimension 1, each in category order.
    pub fn rows(&self) -> &[CoefficientRow] {
        &self.rows
    }

    pub fn values(&self, dimension: usize) -> Array1<f64> {
        self.dimension_rows(dimension).iter().map(|row| row.value).collect()
    }

    pub fn reference_counts(&self) -> [usize; 2] {
        [0, 1].map(|dimension| {
            self.dimension_rows(dimension)
                .iter()
                .filter(|row| row.is_reference)
                .count()
        })
    }

    fn dimension_rows(&self, dimension: usize) -> &[CoefficientRow] {
        match dimension {
            0 => &self.rows[..self.n_first],
            _ => &self.rows[self.n_first..],
        }
    }
}

pub fn recover_bipartite(
    input: &BipartiteInput,
    config: &RecoveryConfig,
) -> Result<BipartiteRecovery, RecoveryError> {
    recover_bipartite_with_progress(input, config, &mut NoopRecoveryProgress)
}

pub fn recover_bipartite_with_progress<P>(
    input: &BipartiteInput,
    config: &RecoveryConfig,
    progress: &mut P,
) -> Result<BipartiteRecovery, RecoveryError>
where
    P: RecoveryObserver,
{
    let n_i = input.n_first();
    let n_j = input.n_second();
    let total = n_i + n_j;

    log::info!(
        "Recovering two-way fixed effects: {} + {} categories, {} observations",
        n_i,
        n_j,
        input.first.n_edges()
    );

    let mut coef_i = vec![0.0; n_i];
    let mut coef_j = vec![0.0; n_j];
    let mut visited_i = vec![false; n_i];
    let mut visited_j = vec![false; n_j];
    let mut is_ref_j = vec![false; n_j];
    let mut frontier_i: Vec<usize> = Vec::with_capacity(n_i);
    let mut frontier_j: Vec<usize> = Vec::with_capacity(n_j);

    let mut n_done = 0usize;
    let mut scan_start = 0usize;
    let mut passes = 0usize;
    let mut sweeps = 0usize;
    let mut max_sweeps = 0usize;
    let mut converged = true;

    progress.on_stage_start(RecoveryStage::Propagation, total);
    while n_done < total {
        if progress.is_cancelled() {
            return Err(RecoveryError::Interrupted {
                stage: RecoveryStage::Propagation,
                pass: passes,
            });
        }

        if frontier_j.is_empty() {
            if passes == config.max_passes {
                log::warn!(
                    "Two-way recovery stopped at the pass cap ({}) with {} categories unresolved.",
                    config.max_passes,
                    total - n_done
                );
                converged = false;
                break;
            }

            let Some(j) = (scan_start..n_j).find(|&j| !visited_j[j]) else {
                return Err(RecoveryError::Stalled {
                    stage: RecoveryStage::ReferenceSelection,
                    unresolved: total - n_done,
                });
            };
            scan_start = j + 1;
            visited_j[j] = true;
            is_ref_j[j] = true;
            coef_j[j] = 0.0;
            n_done += 1;
            frontier_j.push(j);

            passes += 1;
            sweeps = 0;
            log::debug!("Pass {passes}: dimension 1 category {j} set as reference");
        }

        frontier_i.clear();
        for &j in &frontier_j {
            let (neighbours, sums) = input.second.edges(j);
            for (&i, &sum_fe) in neighbours.iter().zip(sums) {
                if !visited_i[i] {
                    coef_i[i] = sum_fe - coef_j[j];
                    visited_i[i] = true;
                    n_done += 1;
                    frontier_i.push(i);
                }
            }
        }

        frontier_j.clear();
        for &i in &frontier_i {
            let (neighbours, sums) = input.first.edges(i);
            for (&j, &sum_fe) in neighbours.iter().zip(sums) {
                if !visited_j[j] {
                    coef_j[j] = sum_fe - coef_i[i];
                    visited_j[j] = true;
                    n_done += 1;
                    frontier_j.push(j);
                }
            }
        }

        sweeps += 1;
        max_sweeps = max_sweeps.max(sweeps);
        progress.on_stage_advance(RecoveryStage::Propagation, n_done);
    }
    progress.on_stage_finish(RecoveryStage::Propagation);

    log::info!(
        "Two-way recovery finished: {} references (one per component), converged: {}",
        passes,
        converged
    );

    let rows = coef_i
        .iter()
        .enumerate()
        .map(|(category, &value)| CoefficientRow {
            dimension: 0,
            category,
            value,
            is_reference: false,
        })
        .chain(
            coef_j
                .iter()
                .zip(&is_ref_j)
                .enumerate()
                .map(|(category, (&value, &is_reference))| CoefficientRow {
                    dimension: 1,
                    category,
                    value,
                    is_reference,
                }),
        )
        .collect();

    Ok(BipartiteRecovery {
        rows,
        n_first: n_i,
        status: RecoveryStatus {
            passes,
            max_sweeps,
            converged,
        },
    })
}
