pub mod gemini;
pub mod ledger;
pub mod lifecycle;
pub mod reward_calculator;

pub use gemini::GeminiSuggester;
pub use ledger::RewardLedgerService;
pub use lifecycle::TaskLifecycle;
pub use reward_calculator::{RewardCalculator, RewardSuggester};

/// How strictly actor identity is checked on lifecycle and reward writes.
///
/// Strict is the default. Relaxed lets a creator accept and complete their
/// own task and pay someone other than the assignee; it exists for test
/// setups that drive the whole flow with a single account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnershipPolicy {
    pub relaxed: bool,
}

impl OwnershipPolicy {
    pub fn strict() -> Self {
        Self { relaxed: false }
    }

    pub fn relaxed() -> Self {
        Self { relaxed: true }
    }
}
