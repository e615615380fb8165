//! Offset-table indexes over the incidence structure.
//!
//! Each index answers "which observations (or edges) touch category `c`" in
//! O(1) through an explicit `offsets` table: the bucket of category `c` is
//! `offsets[c]..offsets[c + 1]`. Buckets of one dimension are stored in one
//! owned vector per dimension; no buffer is shared across dimensions.

use crate::types::{InputError, Membership, check_observation_vector};
use ndarray::{ArrayView1, Axis};

/// Observations grouped by category for a single dimension.
#[derive(Debug, Clone)]
pub struct CategoryBuckets {
    offsets: Vec<usize>,
    observations: Vec<usize>,
}

impl CategoryBuckets {
    /// Stable counting sort of the observations by category id.
    fn from_column(column: ArrayView1<'_, usize>, size: usize) -> Self {
        let mut offsets = vec![0usize; size + 1];
        for &category in column.iter() {
            offsets[category + 1] += 1;
        }
        for c in 0..size {
            offsets[c + 1] += offsets[c];
        }

        let mut cursor = offsets[..size].to_vec();
        let mut observations = vec![0usize; column.len()];
        for (obs, &category) in column.iter().enumerate() {
            observations[cursor[category]] = obs;
            cursor[category] += 1;
        }

        Self {
            offsets,
            observations,
        }
    }

    pub fn n_categories(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn bucket(&self, category: usize) -> &[usize] {
        &self.observations[self.offsets[category]..self.offsets[category + 1]]
    }
}

/// Per-dimension ordering of observations grouped by category.
#[derive(Debug, Clone)]
pub struct ObservationOrdering {
    dims: Vec<CategoryBuckets>,
}

impl ObservationOrdering {
    pub fn from_membership(membership: &Membership) -> Self {
        let dims = membership
            .ids()
            .axis_iter(Axis(1))
            .zip(membership.sizes())
            .map(|(column, &size)| CategoryBuckets::from_column(column, size))
            .collect();
        Self { dims }
    }

    /// Builds the index from caller-supplied orderings, one per dimension.
    ///
    /// Each ordering must be a permutation of `0..N` that lists observations
    /// grouped by ascending category id (what a stable sort of the membership
    /// column produces). Order inside a category is preserved as given.
    pub fn from_orders(
        membership: &Membership,
        orders: Vec<Vec<usize>>,
    ) -> Result<Self, InputError> {
        if orders.len() != membership.n_dims() {
            return Err(InputError::DimensionMismatch {
                columns: orders.len(),
                sizes: membership.n_dims(),
            });
        }

        let n_obs = membership.n_obs();
        let mut dims = Vec::with_capacity(orders.len());
        for (dimension, order) in orders.into_iter().enumerate() {
            if order.len() != n_obs {
                return Err(InputError::LengthMismatch {
                    name: "observation ordering",
                    expected: n_obs,
                    found: order.len(),
                });
            }

            let size = membership.sizes()[dimension];
            let mut seen = vec![false; n_obs];
            let mut offsets = vec![0usize; size + 1];
            let mut previous = 0usize;
            for &obs in &order {
                if obs >= n_obs || seen[obs] {
                    return Err(InputError::MalformedIndex {
                        dimension,
                        reason: format!("observation {obs} is out of range or repeated"),
                    });
                }
                seen[obs] = true;

                let category = membership.category(obs, dimension);
                if category < previous {
                    return Err(InputError::MalformedIndex {
                        dimension,
                        reason: format!(
                            "observation {obs} (category {category}) appears after category {previous}"
                        ),
                    });
                }
                previous = category;
                offsets[category + 1] += 1;
            }
            for c in 0..size {
                offsets[c + 1] += offsets[c];
            }

            dims.push(CategoryBuckets {
                offsets,
                observations: order,
            });
        }

        Ok(Self { dims })
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn observations(&self, dimension: usize, category: usize) -> &[usize] {
        self.dims[dimension].bucket(category)
    }

    /// Checks that this ordering was built for `membership`: same shape, and
    /// every observation listed under category `c` of dimension `q` really
    /// belongs to `c` in that dimension.
    pub fn check_against(&self, membership: &Membership) -> Result<(), InputError> {
        if self.n_dims() != membership.n_dims() {
            return Err(InputError::DimensionMismatch {
                columns: self.n_dims(),
                sizes: membership.n_dims(),
            });
        }
        for (dimension, (buckets, &size)) in self.dims.iter().zip(membership.sizes()).enumerate()
        {
            if buckets.n_categories() != size || buckets.observations.len() != membership.n_obs()
            {
                return Err(InputError::MalformedIndex {
                    dimension,
                    reason: format!(
                        "built for {} categories and {} observations, data has {} and {}",
                        buckets.n_categories(),
                        buckets.observations.len(),
                        size,
                        membership.n_obs()
                    ),
                });
            }

            for category in 0..size {
                let misplaced = buckets.bucket(category).iter().find(|&&obs| {
                    obs >= membership.n_obs() || membership.category(obs, dimension) != category
                });
                if let Some(&obs) = misplaced {
                    return Err(InputError::MalformedIndex {
                        dimension,
                        reason: format!(
                            "observation {obs} is listed under category {category} but does not belong to it"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Cross index for one side of a two-way structure: for every category of
/// this dimension, the opposite-dimension categories it is connected to and
/// the `sumFE` carried by each connecting observation.
#[derive(Debug, Clone)]
pub struct CrossIndex {
    offsets: Vec<usize>,
    opposite: Vec<usize>,
    sum_fe: Vec<f64>,
    n_opposite: usize,
}

impl CrossIndex {
    /// Builds from cumulative count tables: `cumulative[c]` is the end offset
    /// of category `c`'s bucket, the start being `cumulative[c - 1]` (or 0).
    pub fn from_cumulative(
        dimension: usize,
        cumulative: &[usize],
        opposite: Vec<usize>,
        sum_fe: Vec<f64>,
        n_opposite: usize,
    ) -> Result<Self, InputError> {
        if cumulative.is_empty() {
            return Err(InputError::NoObservations);
        }
        check_observation_vector("sum_fe", ArrayView1::from(&sum_fe), opposite.len())?;

        let mut offsets = Vec::with_capacity(cumulative.len() + 1);
        offsets.push(0);
        for (category, &end) in cumulative.iter().enumerate() {
            let start = offsets[category];
            if end < start {
                return Err(InputError::MalformedIndex {
                    dimension,
                    reason: format!("cumulative table decreases at category {category}"),
                });
            }
            if end == start {
                return Err(InputError::EmptyCategory {
                    dimension,
                    category,
                });
            }
            offsets.push(end);
        }
        if offsets[cumulative.len()] != opposite.len() {
            return Err(InputError::MalformedIndex {
                dimension,
                reason: format!(
                    "cumulative table ends at {} but {} edges were supplied",
                    offsets[cumulative.len()],
                    opposite.len()
                ),
            });
        }

        if let Some((edge, &category)) = opposite
            .iter()
            .enumerate()
            .find(|(_, category)| **category >= n_opposite)
        {
            return Err(InputError::CategoryOutOfRange {
                observation: edge,
                dimension: 1 - dimension.min(1),
                category,
                size: n_opposite,
            });
        }

        Ok(Self {
            offsets,
            opposite,
            sum_fe,
            n_opposite,
        })
    }

    /// Builds from `(category, opposite, sumFE)` edges in row order. Buckets
    /// are sorted by opposite category; ties keep row order.
    pub fn from_edges(
        dimension: usize,
        n_categories: usize,
        n_opposite: usize,
        mut edges: Vec<(usize, usize, f64)>,
    ) -> Result<Self, InputError> {
        edges.sort_by_key(|&(category, opposite, _)| (category, opposite));

        let mut cumulative = vec![0usize; n_categories];
        for &(category, _, _) in &edges {
            if category >= n_categories {
                return Err(InputError::MalformedIndex {
                    dimension,
                    reason: format!("edge category {category} exceeds {n_categories} categories"),
                });
            }
            cumulative[category] += 1;
        }
        for c in 1..n_categories {
            cumulative[c] += cumulative[c - 1];
        }

        let (opposite, sum_fe): (Vec<usize>, Vec<f64>) =
            edges.into_iter().map(|(_, o, v)| (o, v)).unzip();
        Self::from_cumulative(dimension, &cumulative, opposite, sum_fe, n_opposite)
    }

    pub fn n_categories(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn n_opposite(&self) -> usize {
        self.n_opposite
    }

    pub fn n_edges(&self) -> usize {
        self.opposite.len()
    }

    /// Every edge as `(category, opposite, sumFE)`, in bucket order.
    pub fn iter_edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_categories()).flat_map(move |category| {
            let (opposite, sums) = self.edges(category);
            opposite
                .iter()
                .zip(sums)
                .map(move |(&other, &value)| (category, other, value))
        })
    }

    /// Opposite categories and `sumFE` values of the edges of `category`.
    #[inline]
    pub fn edges(&self, category: usize) -> (&[usize], &[f64]) {
        let range = self.offsets[category]..self.offsets[category + 1];
        (&self.opposite[range.clone()], &self.sum_fe[range])
    }
}
