#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod bipartite;
pub mod config;
pub mod data;
pub mod general;
pub mod progress;
pub mod types;
#[path = "../shared/index.rs"]
pub mod shared_index;
pub mod shared {
    pub use super::shared_index as index;
}

#[path = "../deriv/mod.rs"]
pub mod deriv;

pub use bipartite::{BipartiteInput, BipartiteRecovery, recover_bipartite};
pub use config::{FixedPointConfig, RecoveryConfig, Settings};
pub use general::{GeneralRecovery, recover_general};
pub use shared::index::{CrossIndex, ObservationOrdering};
pub use types::{CoefficientRow, InputError, Membership, RecoveryError, RecoveryStatus};
