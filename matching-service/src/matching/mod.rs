//! Pure scoring and decision logic. Nothing in here touches the store or the network.

pub mod conflict;
pub mod coverage;
pub mod normalize;
pub mod partner;
pub mod transaction;

pub use conflict::{resolve_partner_conflict, Resolution};
pub use coverage::Coverage;
pub use partner::{build_directory, rank_partners, score_partner, PartnerInput, PartnerMatch};
pub use transaction::{rank_transactions, score_transaction, ScoreBreakdown, TransactionInput, TransactionMatch};

/// Thresholds and limits used by the scorers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    pub partner_auto_threshold: u8,
    pub transaction_auto_threshold: u8,
    pub suggestion_threshold: u8,
    pub partner_suggestion_limit: usize,
    pub transaction_suggestion_limit: usize,
    pub window_days_before: i64,
    pub window_days_after: i64,
    /// Candidates fetched when the document carries no date.
    pub recent_transaction_limit: i64,
    /// Fraction of a transaction's amount that may stay uncovered.
    pub coverage_tolerance: f64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            partner_auto_threshold: 89,
            transaction_auto_threshold: 85,
            suggestion_threshold: 50,
            partner_suggestion_limit: 3,
            transaction_suggestion_limit: 5,
            window_days_before: 30,
            window_days_after: 60,
            recent_transaction_limit: 100,
            coverage_tolerance: 0.10,
        }
    }
}
