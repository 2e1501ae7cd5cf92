use serde::{Deserialize, Serialize};

/// Messages passed between pipeline stages. Every handler is idempotent, so redelivery and
/// manual replays from the recovery sweep are safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ExtractionCompleted { document_id: String },
    PartnerMatchRequested { document_id: String },
    TransactionMatchRequested { document_id: String },
    PartnerUpdated { partner_id: String },
    PartnerDeactivated { partner_id: String },
    DocumentDeactivated { document_id: String },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ExtractionCompleted { .. } => "extraction_completed",
            PipelineEvent::PartnerMatchRequested { .. } => "partner_match_requested",
            PipelineEvent::TransactionMatchRequested { .. } => "transaction_match_requested",
            PipelineEvent::PartnerUpdated { .. } => "partner_updated",
            PipelineEvent::PartnerDeactivated { .. } => "partner_deactivated",
            PipelineEvent::DocumentDeactivated { .. } => "document_deactivated",
        }
    }

    /// The document this event is about, if any.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::ExtractionCompleted { document_id }
            | PipelineEvent::PartnerMatchRequested { document_id }
            | PipelineEvent::TransactionMatchRequested { document_id }
            | PipelineEvent::DocumentDeactivated { document_id } => Some(document_id),
            PipelineEvent::PartnerUpdated { .. } | PipelineEvent::PartnerDeactivated { .. } => None,
        }
    }

    pub fn partner_match(document_id: impl Into<String>) -> Self {
        PipelineEvent::PartnerMatchRequested {
            document_id: document_id.into(),
        }
    }

    pub fn transaction_match(document_id: impl Into<String>) -> Self {
        PipelineEvent::TransactionMatchRequested {
            document_id: document_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// A match was committed.
    Matched,
    /// Candidates were found but none was committed.
    Suggested,
    NoMatch,
    /// Upstream data absent.
    NoSignals,
    /// A user decision already stands.
    Kept,
    /// Document missing, unmatchable or not ready.
    Skipped,
    /// Internal failure caught at the stage boundary; the stage was still completed.
    Failed(String),
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Matched => "matched",
            StageOutcome::Suggested => "suggested",
            StageOutcome::NoMatch => "no_match",
            StageOutcome::NoSignals => "no_signals",
            StageOutcome::Kept => "kept",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub outcome: StageOutcome,
    pub follow_ups: Vec<PipelineEvent>,
}

impl StageReport {
    pub fn skipped() -> Self {
        Self {
            outcome: StageOutcome::Skipped,
            follow_ups: Vec::new(),
        }
    }
}
