//! Decides which side wins when a document and a linked transaction name different partners.

use crate::models::{MatchMethod, MatchSource, PartnerAssignment};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NoChange,
    /// Copy the transaction's partner onto the document.
    AssignToDocument(PartnerAssignment),
    /// Overwrite the transaction's partner, keeping what it had before for audit.
    AssignToTransaction {
        assignment: PartnerAssignment,
        previous: Option<PartnerAssignment>,
    },
}

type Rule = fn(Option<&PartnerAssignment>, Option<&PartnerAssignment>) -> Option<Resolution>;

/// Evaluated in order; the first rule with an opinion decides.
const RULES: &[Rule] = &[
    nothing_to_sync,
    already_agree,
    transaction_user_choice_wins,
    document_unassigned,
    document_wins,
];

fn nothing_to_sync(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Option<Resolution> {
    (document.is_none() && transaction.is_none()).then_some(Resolution::NoChange)
}

fn already_agree(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Option<Resolution> {
    let (d, t) = (document?, transaction?);
    (d.partner_id == t.partner_id).then_some(Resolution::NoChange)
}

fn transaction_user_choice_wins(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Option<Resolution> {
    let t = transaction.filter(|t| t.is_user_choice())?;
    match document {
        Some(d) if d.is_user_choice() => Some(Resolution::NoChange),
        _ => Some(Resolution::AssignToDocument(propagated(t))),
    }
}

fn document_unassigned(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Option<Resolution> {
    match (document, transaction) {
        (None, Some(t)) => Some(Resolution::AssignToDocument(propagated(t))),
        _ => None,
    }
}

fn document_wins(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Option<Resolution> {
    let d = document?;
    Some(Resolution::AssignToTransaction {
        assignment: PartnerAssignment {
            matched_by: MatchMethod::Auto,
            ..d.clone()
        },
        previous: transaction.cloned(),
    })
}

fn propagated(from: &PartnerAssignment) -> PartnerAssignment {
    PartnerAssignment::new(
        from.partner_id.clone(),
        from.partner_type,
        MatchMethod::Auto,
        from.confidence,
        MatchSource::Transaction,
    )
}

pub fn resolve_partner_conflict(
    document: Option<&PartnerAssignment>,
    transaction: Option<&PartnerAssignment>,
) -> Resolution {
    RULES
        .iter()
        .find_map(|rule| rule(document, transaction))
        .unwrap_or(Resolution::NoChange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartnerType;

    fn assignment(id: &str, method: MatchMethod) -> PartnerAssignment {
        PartnerAssignment::new(id, PartnerType::User, method, 90, MatchSource::Name)
    }

    #[test]
    fn test_empty_and_agreeing_sides_do_nothing() {
        assert_eq!(resolve_partner_conflict(None, None), Resolution::NoChange);
        let a = assignment("p1", MatchMethod::Auto);
        let b = assignment("p1", MatchMethod::Manual);
        assert_eq!(resolve_partner_conflict(Some(&a), Some(&b)), Resolution::NoChange);
    }

    #[test]
    fn test_manual_transaction_is_never_overwritten() {
        let doc = assignment("p-doc", MatchMethod::Auto);
        let txn = assignment("p-txn", MatchMethod::Manual);
        match resolve_partner_conflict(Some(&doc), Some(&txn)) {
            Resolution::AssignToDocument(a) => {
                assert_eq!(a.partner_id, "p-txn");
                assert_eq!(a.matched_by, MatchMethod::Auto);
                assert_eq!(a.source, MatchSource::Transaction);
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_two_user_choices_both_stand() {
        let doc = assignment("p-doc", MatchMethod::Manual);
        let txn = assignment("p-txn", MatchMethod::Suggestion);
        assert_eq!(resolve_partner_conflict(Some(&doc), Some(&txn)), Resolution::NoChange);
    }

    #[test]
    fn test_unassigned_document_takes_transaction_partner() {
        let txn = assignment("p-txn", MatchMethod::Auto);
        assert!(matches!(
            resolve_partner_conflict(None, Some(&txn)),
            Resolution::AssignToDocument(a) if a.partner_id == "p-txn"
        ));
    }

    #[test]
    fn test_document_wins_and_keeps_previous() {
        let doc = assignment("p-doc", MatchMethod::Manual);
        let txn = assignment("p-txn", MatchMethod::Auto);
        match resolve_partner_conflict(Some(&doc), Some(&txn)) {
            Resolution::AssignToTransaction { assignment, previous } => {
                assert_eq!(assignment.partner_id, "p-doc");
                assert_eq!(previous.unwrap().partner_id, "p-txn");
            }
            other => panic!("unexpected resolution: {:?}", other),
        }

        match resolve_partner_conflict(Some(&doc), None) {
            Resolution::AssignToTransaction { previous, .. } => assert!(previous.is_none()),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }
}
