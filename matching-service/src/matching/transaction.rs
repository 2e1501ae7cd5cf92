//! Transaction scoring: independently capped sub-scores summed into one confidence.

use super::normalize::{
    extract_invoice_numbers, name_similarity, normalize_iban, normalize_name,
    reference_contained, significant_words, wildcard_matches, word_overlap,
};
use super::MatchSettings;
use crate::models::{Document, OwnerProfile, Partner, Transaction};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashSet;

pub const AMOUNT_MAX: u8 = 40;
pub const DATE_MAX: u8 = 25;
pub const PARTNER_MAX: u8 = 25;
pub const IBAN_SCORE: u8 = 10;
pub const REFERENCE_SCORE: u8 = 5;
pub const REFERENCE_DATE_BONUS: u8 = 10;
pub const INVOICE_NUMBER_SCORE: u8 = 25;
pub const INVOICE_NUMBER_DATE_BONUS: u8 = 15;

/// Transaction-relevant document signals.
#[derive(Debug, Clone, Default)]
pub struct TransactionInput {
    pub document_id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub partner_id: Option<String>,
    /// Assigned partner's name and aliases, or the extracted name when unassigned.
    pub partner_names: Vec<String>,
    pub iban: Option<String>,
    pub reference: Option<String>,
    pub invoice_numbers: Vec<String>,
    pub connected: HashSet<String>,
}

impl TransactionInput {
    pub fn from_document(
        document: &Document,
        partner: Option<&Partner>,
        owner: Option<&OwnerProfile>,
    ) -> Self {
        let fields = &document.fields;
        let partner_names = match partner {
            Some(p) => p.names().map(str::to_string).collect(),
            None => fields.partner_name.iter().cloned().collect(),
        };
        let own_ibans: HashSet<String> = owner
            .map(|o| o.own_ibans.iter().map(|i| normalize_iban(i)).collect())
            .unwrap_or_default();

        Self {
            document_id: document.id.clone(),
            amount: fields.amount,
            currency: fields.currency.as_ref().map(|c| c.trim().to_uppercase()),
            date: fields.date,
            partner_id: document.partner_id().map(str::to_string),
            partner_names,
            iban: fields
                .iban
                .as_deref()
                .map(normalize_iban)
                .filter(|i| !i.is_empty() && !own_ibans.contains(i)),
            reference: fields.reference.clone().filter(|r| !r.trim().is_empty()),
            invoice_numbers: extract_invoice_numbers(&document.file_name),
            connected: document.transaction_ids.iter().cloned().collect(),
        }
    }
}

/// Per-candidate sub-scores and the names of the signals that fired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub amount: u8,
    pub date: u8,
    pub partner: u8,
    pub iban: u8,
    pub reference: u8,
    pub invoice_number: u8,
    pub total: u8,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMatch {
    pub transaction_id: String,
    pub confidence: u8,
    pub signals: Vec<String>,
    /// Absolute day distance, `i64::MAX` when the document has no date.
    pub day_distance: i64,
}

/// 40 for an exact amount, stepping down by relative difference. Halved across currencies.
pub fn amount_score(
    document_amount: i64,
    document_currency: Option<&str>,
    transaction_amount: i64,
    transaction_currency: &str,
) -> u8 {
    let a = (document_amount as i128).abs();
    let b = (transaction_amount as i128).abs();
    let diff = (a - b).abs();
    let larger = a.max(b);

    let base = if diff == 0 {
        AMOUNT_MAX
    } else if diff * 100 <= larger {
        38
    } else if diff * 100 <= larger * 5 {
        30
    } else if diff * 100 <= larger * 10 {
        20
    } else {
        0
    };

    let mismatch = document_currency
        .map(|c| !c.eq_ignore_ascii_case(transaction_currency.trim()))
        .unwrap_or(false);
    if mismatch {
        base / 2
    } else {
        base
    }
}

pub fn date_score(days: i64) -> u8 {
    match days.abs() {
        0 => DATE_MAX,
        1..=3 => 22,
        4..=7 => 15,
        8..=14 => 8,
        15..=30 => 3,
        _ => 0,
    }
}

/// Counterparty agreement, strongest applicable tier.
pub fn partner_score(input: &TransactionInput, transaction: &Transaction) -> (u8, Option<&'static str>) {
    if let (Some(doc), Some(txn)) = (input.partner_id.as_deref(), transaction.partner_id()) {
        if doc == txn {
            return (PARTNER_MAX, Some("partner_id"));
        }
    }

    let counterparty = transaction.partner_name.as_deref().unwrap_or("");
    let text = format!("{} {}", counterparty, transaction.description);
    let normalized_text = format!(" {} ", normalize_name(&text));

    let best = input
        .partner_names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|name| {
            if name.contains('*') {
                let hit = wildcard_matches(name, counterparty)
                    || wildcard_matches(name, &transaction.description);
                return if hit { 18 } else { 0 };
            }
            let normalized = normalize_name(name);
            if normalized.is_empty() {
                return 0;
            }
            if !counterparty.is_empty() && normalized == normalize_name(counterparty) {
                return PARTNER_MAX;
            }
            if !counterparty.is_empty() && name_similarity(name, counterparty) >= 90 {
                return 22;
            }
            if normalized.chars().count() >= 4
                && normalized_text.contains(&format!(" {} ", normalized))
            {
                return 18;
            }
            match word_overlap(name, &text) {
                0 => 0,
                1 if significant_words(name).len() <= 2 => 12,
                1 => 0,
                _ => 15,
            }
        })
        .max()
        .unwrap_or(0);

    if best > 0 {
        (best, Some("partner_name"))
    } else {
        (0, None)
    }
}

fn digit_runs(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .map(|run| run.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|run| run.len() >= 5)
        .collect()
}

pub fn score_transaction(input: &TransactionInput, transaction: &Transaction) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::default();
    let mut signals: Vec<&str> = Vec::new();

    if let Some(amount) = input.amount {
        breakdown.amount = amount_score(
            amount,
            input.currency.as_deref(),
            transaction.amount,
            &transaction.currency,
        );
        if breakdown.amount > 0 {
            signals.push("amount");
        }
    }

    if let Some(date) = input.date {
        breakdown.date = date_score((transaction.date - date).num_days());
        if breakdown.date > 0 {
            signals.push("date");
        }
    }

    let (partner, partner_signal) = partner_score(input, transaction);
    breakdown.partner = partner;
    signals.extend(partner_signal);

    if let Some(iban) = input.iban.as_deref() {
        let matches = transaction
            .partner_iban
            .as_deref()
            .map(|t| normalize_iban(t) == iban)
            .unwrap_or(false);
        if matches {
            breakdown.iban = IBAN_SCORE;
            signals.push("iban");
        }
    }

    if let Some(reference) = input.reference.as_deref() {
        let hit = transaction
            .reference
            .as_deref()
            .map(|r| reference_contained(reference, r))
            .unwrap_or(false)
            || reference_contained(reference, &transaction.description);
        if hit {
            breakdown.reference = REFERENCE_SCORE;
            breakdown.date = (breakdown.date + REFERENCE_DATE_BONUS).min(DATE_MAX);
            signals.push("reference");
        }
    }

    if !input.invoice_numbers.is_empty() {
        let text = format!(
            "{} {} {}",
            transaction.description,
            transaction.reference.as_deref().unwrap_or(""),
            transaction.partner_name.as_deref().unwrap_or("")
        );
        let mut found = extract_invoice_numbers(&text);
        found.extend(digit_runs(&text));
        if input.invoice_numbers.iter().any(|n| found.contains(n)) {
            breakdown.invoice_number = INVOICE_NUMBER_SCORE;
            breakdown.date = (breakdown.date + INVOICE_NUMBER_DATE_BONUS).min(DATE_MAX);
            signals.push("invoice_number");
        }
    }

    // Recurring invoices from one payee differ only by month.
    if breakdown.partner >= 15 {
        if breakdown.date <= 3 {
            breakdown.partner /= 3;
        } else if breakdown.date >= 15 {
            breakdown.date = (breakdown.date as u16 * 3 / 2).min(DATE_MAX as u16) as u8;
        }
    }

    let total = breakdown.amount as u16
        + breakdown.date as u16
        + breakdown.partner as u16
        + breakdown.iban as u16
        + breakdown.reference as u16
        + breakdown.invoice_number as u16;
    breakdown.total = total.min(100) as u8;
    breakdown.signals = signals.into_iter().map(str::to_string).collect();
    breakdown
}

/// Candidates at or above the suggestion threshold, best first.
///
/// Already connected transactions and those that rejected this document are never returned.
pub fn rank_transactions(
    input: &TransactionInput,
    candidates: &[Transaction],
    settings: &MatchSettings,
) -> Vec<TransactionMatch> {
    let mut matches: Vec<TransactionMatch> = candidates
        .iter()
        .filter(|t| !t.deleted)
        .filter(|t| !input.connected.contains(&t.id))
        .filter(|t| !t.document_ids.iter().any(|d| *d == input.document_id))
        .filter(|t| !t.has_rejected(&input.document_id))
        .filter_map(|t| {
            let score = score_transaction(input, t);
            (score.total >= settings.suggestion_threshold).then(|| TransactionMatch {
                transaction_id: t.id.clone(),
                confidence: score.total,
                signals: score.signals,
                day_distance: input
                    .date
                    .map(|d| (t.date - d).num_days().abs())
                    .unwrap_or(i64::MAX),
            })
        })
        .collect();

    matches.sort_by(compare_matches);
    matches
}

fn compare_matches(a: &TransactionMatch, b: &TransactionMatch) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then(a.day_distance.cmp(&b.day_distance))
        .then(a.transaction_id.cmp(&b.transaction_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input(amount: i64, currency: &str, date: NaiveDate) -> TransactionInput {
        TransactionInput {
            document_id: "doc-1".to_string(),
            amount: Some(amount),
            currency: Some(currency.to_string()),
            date: Some(date),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_amount_same_day_is_65() {
        let txn = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 15), "Card payment");
        let score = score_transaction(&input(10_000, "EUR", day(2024, 3, 15)), &txn);
        assert_eq!(score.amount, 40);
        assert_eq!(score.date, 25);
        assert_eq!(score.total, 65);
        assert_eq!(score.signals, vec!["amount", "date"]);
    }

    #[test]
    fn test_currency_mismatch_halves_amount() {
        let txn = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 15), "");
        let score = score_transaction(&input(10_000, "USD", day(2024, 3, 15)), &txn);
        assert_eq!(score.amount, 20);
    }

    #[test]
    fn test_amount_tiers() {
        assert_eq!(amount_score(10_000, None, 10_000, "EUR"), 40);
        assert_eq!(amount_score(10_000, None, 9_950, "EUR"), 38);
        assert_eq!(amount_score(10_000, None, 9_600, "EUR"), 30);
        assert_eq!(amount_score(10_000, None, 9_100, "EUR"), 20);
        assert_eq!(amount_score(10_000, None, 5_000, "EUR"), 0);
    }

    #[test]
    fn test_date_tiers() {
        assert_eq!(date_score(0), 25);
        assert_eq!(date_score(-3), 22);
        assert_eq!(date_score(7), 15);
        assert_eq!(date_score(14), 8);
        assert_eq!(date_score(30), 3);
        assert_eq!(date_score(31), 0);
    }

    #[test]
    fn test_partner_name_tiers() {
        let mut txn = Transaction::new("owner-1", -100, "EUR", day(2024, 1, 1), "SEPA HETZNER ONLINE 998877");
        let mut doc = input(100, "EUR", day(2024, 1, 1));

        doc.partner_names = vec!["Hetzner Online GmbH".to_string()];
        txn.partner_name = Some("Hetzner Online GmbH".to_string());
        assert_eq!(partner_score(&doc, &txn).0, 25);

        txn.partner_name = None;
        assert_eq!(partner_score(&doc, &txn).0, 18);

        txn.description = "Online services Hetzner order".to_string();
        assert_eq!(partner_score(&doc, &txn).0, 15);

        doc.partner_names = vec!["Hetzner".to_string()];
        txn.description = "Payment to hetzner cloud".to_string();
        assert_eq!(partner_score(&doc, &txn).0, 18);

        doc.partner_names = vec!["Hetzner Cloud".to_string()];
        txn.description = "Payment hetzner".to_string();
        assert_eq!(partner_score(&doc, &txn).0, 12);
    }

    #[test]
    fn test_partner_id_agreement() {
        use crate::models::{MatchMethod, MatchSource, PartnerAssignment, PartnerType};
        let mut txn = Transaction::new("owner-1", -100, "EUR", day(2024, 1, 1), "");
        txn.partner = Some(PartnerAssignment::new(
            "p1",
            PartnerType::User,
            MatchMethod::Auto,
            90,
            MatchSource::Name,
        ));
        let mut doc = input(100, "EUR", day(2024, 1, 1));
        doc.partner_id = Some("p1".to_string());
        assert_eq!(partner_score(&doc, &txn), (25, Some("partner_id")));
    }

    #[test]
    fn test_same_month_rule_penalizes_wrong_month() {
        let mut doc = input(4_900, "EUR", day(2024, 3, 1));
        doc.partner_names = vec!["Netflix".to_string()];

        let mut right = Transaction::new("owner-1", -4_900, "EUR", day(2024, 3, 4), "NETFLIX.COM");
        right.partner_name = Some("Netflix".to_string());
        let mut wrong = right.clone();
        wrong.id = "wrong".to_string();
        wrong.date = day(2024, 3, 28);

        let right_score = score_transaction(&doc, &right);
        let wrong_score = score_transaction(&doc, &wrong);
        assert_eq!(right_score.date, 25);
        assert_eq!(wrong_score.partner, 8);
        assert!(right_score.total >= 85);
        assert!(wrong_score.total < 85);
    }

    #[test]
    fn test_reference_lifts_date() {
        let mut doc = input(10_000, "EUR", day(2024, 3, 1));
        doc.reference = Some("RF18 5390 0754 7034".to_string());
        let mut txn = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 12), "Transfer");
        txn.reference = Some("RF18539007547034".to_string());

        let score = score_transaction(&doc, &txn);
        assert_eq!(score.reference, 5);
        assert_eq!(score.date, 18);
        assert!(score.signals.contains(&"reference".to_string()));
    }

    #[test]
    fn test_invoice_number_in_transaction_text() {
        let mut doc = input(10_000, "EUR", day(2024, 3, 1));
        doc.invoice_numbers = vec!["20240012".to_string()];
        let txn = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 20), "Payment RE 2024-0012");

        let score = score_transaction(&doc, &txn);
        assert_eq!(score.invoice_number, 25);
        assert_eq!(score.date, 18);
        assert_eq!(score.total, 83);
    }

    #[test]
    fn test_rank_excludes_rejected_and_connected() {
        let date = day(2024, 3, 15);
        let plain = Transaction::new("owner-1", -10_000, "EUR", date, "");
        let mut rejected = Transaction::new("owner-1", -10_000, "EUR", date, "");
        rejected.rejected_document_ids.push("doc-1".to_string());
        let connected = Transaction::new("owner-1", -10_000, "EUR", date, "");

        let mut doc = input(10_000, "EUR", date);
        doc.connected.insert(connected.id.clone());

        let ranked = rank_transactions(
            &doc,
            &[plain.clone(), rejected, connected],
            &MatchSettings::default(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].transaction_id, plain.id);
    }

    #[test]
    fn test_rank_breaks_ties_on_date_distance() {
        let mut near = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 16), "");
        near.id = "b".to_string();
        let mut far = Transaction::new("owner-1", -10_000, "EUR", day(2024, 3, 13), "");
        far.id = "a".to_string();

        let ranked = rank_transactions(
            &input(10_000, "EUR", day(2024, 3, 15)),
            &[far, near],
            &MatchSettings::default(),
        );
        assert_eq!(ranked[0].transaction_id, "b");
        assert_eq!(ranked[1].transaction_id, "a");
    }
}
