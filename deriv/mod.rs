// Derivatives of the fixed effects with respect to the other model parameters.
pub mod solver;
pub use solver::{
    FixedPointSolution, solve_cluster_derivative, solve_cluster_derivative_with_progress,
};
