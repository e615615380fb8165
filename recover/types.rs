//! # Core Types for Fixed-Effect Recovery
//!
//! This module owns the validated representation of the incidence structure
//! shared by every recoverer: which category each observation touches along
//! each fixed-effect dimension. All validation happens here, once, so the hot
//! loops in `bipartite`, `general` and `deriv` can index without re-checking.
//!
//! - Zero-based everywhere: category ids run from `0` to `sizes[q] - 1`.
//!   External 1-based ids are translated by `Membership::from_one_based` and
//!   nowhere else.
//! - Malformed input is rejected upfront with an `InputError`. Iteration caps
//!   are not errors; they are reported through `RecoveryStatus`.

use crate::progress::RecoveryStage;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

/// Errors raised while validating the inputs of a recovery or solver call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("At least one observation is required.")]
    NoObservations,

    #[error("At least one fixed-effect dimension is required.")]
    NoDimensions,

    #[error(
        "The membership matrix has {columns} columns but {sizes} category sizes were declared."
    )]
    DimensionMismatch { columns: usize, sizes: usize },

    #[error("This recoverer requires exactly {expected} fixed-effect dimensions, found {found}.")]
    WrongDimensionCount { expected: usize, found: usize },

    #[error(
        "Observation {observation} refers to category {category} in dimension {dimension}, but that dimension only has {size} categories."
    )]
    CategoryOutOfRange {
        observation: usize,
        dimension: usize,
        category: usize,
        size: usize,
    },

    #[error(
        "Observation {observation} uses id 0 in dimension {dimension}; one-based ids must start at 1."
    )]
    ZeroOneBasedId { observation: usize, dimension: usize },

    #[error("Category {category} of dimension {dimension} has no observations.")]
    EmptyCategory { dimension: usize, category: usize },

    #[error("The '{name}' vector has length {found}, expected {expected}.")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("The '{name}' vector contains a non-finite value at position {index}.")]
    NonFinite { name: &'static str, index: usize },

    #[error(
        "Category {category} of dimension {dimension} has a zero sum of second derivatives; its update is undefined."
    )]
    DegenerateCurvature { dimension: usize, category: usize },

    #[error("Malformed index for dimension {dimension}: {reason}")]
    MalformedIndex { dimension: usize, reason: String },
}

/// Errors raised by the recoverers and the fixed-point solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("Interrupted during {stage} at pass {pass}.")]
    Interrupted { stage: RecoveryStage, pass: usize },

    #[error(
        "{stage} made no progress with {unresolved} categories still unresolved; the incidence structure is malformed."
    )]
    Stalled {
        stage: RecoveryStage,
        unresolved: usize,
    },
}

/// Convergence bookkeeping returned alongside every recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStatus {
    /// Outer passes performed (one per reference batch or component).
    pub passes: usize,
    /// Largest number of propagation sweeps used inside a single pass.
    pub max_sweeps: usize,
    /// `false` when an iteration cap stopped the run before a fixpoint.
    pub converged: bool,
}

/// One entry of the published coefficient table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientRow {
    pub dimension: usize,
    pub category: usize,
    pub value: f64,
    pub is_reference: bool,
}

/// Validated observation-by-dimension category matrix.
#[derive(Debug, Clone)]
pub struct Membership {
    ids: Array2<usize>,
    sizes: Vec<usize>,
}

impl Membership {
    /// Validates a zero-based `N x Q` membership matrix against the declared
    /// per-dimension category counts.
    pub fn new(ids: Array2<usize>, sizes: Vec<usize>) -> Result<Self, InputError> {
        if ids.nrows() == 0 {
            return Err(InputError::NoObservations);
        }
        if sizes.is_empty() {
            return Err(InputError::NoDimensions);
        }
        if ids.ncols() != sizes.len() {
            return Err(InputError::DimensionMismatch {
                columns: ids.ncols(),
                sizes: sizes.len(),
            });
        }

        let out_of_range = ids
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .find_map_first(|(observation, row)| {
                row.iter()
                    .zip(sizes.iter())
                    .enumerate()
                    .find(|(_, (category, size))| **category >= **size)
                    .map(|(dimension, (category, size))| InputError::CategoryOutOfRange {
                        observation,
                        dimension,
                        category: *category,
                        size: *size,
                    })
            });
        if let Some(err) = out_of_range {
            return Err(err);
        }

        for (dimension, column) in ids.axis_iter(Axis(1)).enumerate() {
            let mut seen = vec![false; sizes[dimension]];
            for &category in column.iter() {
                seen[category] = true;
            }
            if let Some(category) = seen.iter().position(|present| !present) {
                return Err(InputError::EmptyCategory {
                    dimension,
                    category,
                });
            }
        }

        Ok(Self { ids, sizes })
    }

    /// Translates 1-based external ids (as produced by R-style factor codes)
    /// into the internal zero-based convention, then validates.
    pub fn from_one_based(ids: Array2<usize>, sizes: Vec<usize>) -> Result<Self, InputError> {
        if let Some(((observation, dimension), _)) =
            ids.indexed_iter().find(|(_, category)| **category == 0)
        {
            return Err(InputError::ZeroOneBasedId {
                observation,
                dimension,
            });
        }
        Self::new(ids.mapv(|category| category - 1), sizes)
    }

    pub fn n_obs(&self) -> usize {
        self.ids.nrows()
    }

    pub fn n_dims(&self) -> usize {
        self.sizes.len()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn total_categories(&self) -> usize {
        self.sizes.iter().sum()
    }

    #[inline]
    pub fn category(&self, observation: usize, dimension: usize) -> usize {
        self.ids[[observation, dimension]]
    }

    pub fn row(&self, observation: usize) -> ArrayView1<'_, usize> {
        self.ids.row(observation)
    }

    pub fn column(&self, dimension: usize) -> ArrayView1<'_, usize> {
        self.ids.column(dimension)
    }

    pub fn ids(&self) -> ArrayView2<'_, usize> {
        self.ids.view()
    }

    /// Fails unless the membership has exactly `expected` dimensions.
    pub fn require_dims(&self, expected: usize) -> Result<(), InputError> {
        if self.n_dims() != expected {
            return Err(InputError::WrongDimensionCount {
                expected,
                found: self.n_dims(),
            });
        }
        Ok(())
    }
}

/// Checks that an observation-level vector has length `expected` and only
/// finite entries. The scan is data-parallel when the view is contiguous.
pub fn check_observation_vector(
    name: &'static str,
    values: ArrayView1<'_, f64>,
    expected: usize,
) -> Result<(), InputError> {
    if values.len() != expected {
        return Err(InputError::LengthMismatch {
            name,
            expected,
            found: values.len(),
        });
    }
    let first_bad = match values.as_slice() {
        Some(slice) => slice.par_iter().position_first(|v| !v.is_finite()),
        None => values.iter().position(|v| !v.is_finite()),
    };
    match first_bad {
        Some(index) => Err(InputError::NonFinite { name, index }),
        None => Ok(()),
    }
}

/// Sum of the touched categories' coefficients for every observation. For a
/// fully resolved recovery this reproduces the `sumFE` it was computed from.
pub fn reconstruct_sum_fe(membership: &Membership, coefficients: &[Array1<f64>]) -> Array1<f64> {
    membership
        .ids()
        .outer_iter()
        .map(|row| {
            row.iter()
                .zip(coefficients)
                .map(|(&category, values)| values[category])
                .sum::<f64>()
        })
        .collect()
}
