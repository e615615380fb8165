use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages reported while recovering coefficients or solving for derivatives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecoveryStage {
    ReferenceSelection,
    Propagation,
    FixedPoint,
}

impl RecoveryStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::ReferenceSelection => "reference selection",
            Self::Propagation => "coefficient propagation",
            Self::FixedPoint => "cluster-derivative fixed point",
        }
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for incremental progress and cooperative cancellation.
///
/// `is_cancelled` is polled once per outer iteration of every long-running
/// loop. Returning `true` makes the running call unwind with
/// `RecoveryError::Interrupted`; no partial result is surfaced.
pub trait RecoveryObserver {
    fn on_stage_start(&mut self, stage: RecoveryStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: RecoveryStage, done: usize) {
        let _ = (stage, done);
    }
    fn on_stage_finish(&mut self, stage: RecoveryStage) {
        let _ = stage;
    }
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct NoopRecoveryProgress;

impl RecoveryObserver for NoopRecoveryProgress {}

/// Shared cancellation flag. Clones observe the same flag, so one clone can be
/// handed to another thread (or a signal handler) while the other drives the
/// computation.
#[derive(Clone, Default, Debug)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl RecoveryObserver for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_cancellation_flag() {
        let token = CancellationToken::new();
        let remote = token.clone();
        assert!(!token.is_cancelled());
        remote.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn stages_have_readable_names() {
        assert_eq!(RecoveryStage::Propagation.to_string(), "coefficient propagation");
        assert!(!NoopRecoveryProgress.is_cancelled());
    }
}
