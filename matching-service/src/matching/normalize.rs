//! Normalization and similarity helpers shared by the partner and transaction scorers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Legal-form tokens stripped from the end of company names before comparison.
const LEGAL_SUFFIXES: &[&str] = &[
    "gmbh", "mbh", "ag", "kg", "og", "ohg", "ug", "gbr", "eu", "se", "ev", "kgaa", "ltd",
    "limited", "llc", "llp", "inc", "incorporated", "corp", "corporation", "co", "company",
    "plc", "sa", "sas", "sarl", "srl", "spa", "bv", "nv", "ab", "as", "asa", "oy", "kft",
    "sro", "sp", "zoo", "pty", "lp",
];

/// Suffixes that on their own mark a name as a registered legal entity.
const ENTITY_MARKERS: &[&str] = &[
    "gmbh", "mbh", "ag", "kg", "og", "ohg", "ug", "gbr", "eu", "se", "kgaa", "ltd", "limited",
    "llc", "llp", "inc", "incorporated", "corp", "corporation", "plc", "sa", "sas", "sarl",
    "srl", "spa", "bv", "nv", "ab", "asa", "oy", "kft", "sro", "pty",
];

const PUBLIC_MAIL_DOMAINS: &[&str] = &[
    "gmail.com", "googlemail.com", "outlook.com", "hotmail.com", "live.com", "msn.com",
    "yahoo.com", "icloud.com", "me.com", "gmx.at", "gmx.de", "gmx.net", "web.de", "aon.at",
    "proton.me", "protonmail.com", "t-online.de",
];

/// Senders that deliver invoices on behalf of other companies.
const BILLING_DOMAINS: &[&str] = &[
    "stripe.com", "paypal.com", "paddle.com", "chargebee.com", "recurly.com", "fastspring.com",
    "zuora.com", "braintreepayments.com", "squareup.com", "invoice2go.com", "quickbooks.com",
    "intuit.com", "xero.com", "freshbooks.com", "sevdesk.de", "lexoffice.de", "billomat.com",
    "amazonses.com", "sendgrid.net", "mailgun.org", "mandrillapp.com",
];

const STOPWORDS: &[&str] = &["the", "and", "und", "der", "die", "das", "for", "von", "www", "com"];

static INVOICE_PREFIXED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:invoice|inv|rechnung|rg|re|receipt|beleg|bill)(?:[\s.#:-]*(?:no|nr|number))?[\s.#:-]*(\d[\d-]{2,}\d)\b",
    )
    .expect("invoice number pattern is valid")
});

static RECEIPT_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4}-\d{4})\b").expect("receipt number pattern is valid"));

pub fn normalize_iban(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Strip everything but letters and digits, uppercase. `ATU 123-456.78` -> `ATU12345678`.
pub fn normalize_vat(value: &str) -> String {
    normalize_iban(value)
}

/// Splits a normalized VAT id into country prefix and number.
pub fn split_vat(vat: &str) -> Option<(String, String)> {
    let vat = normalize_vat(vat);
    if vat.len() < 4 || !vat[..2].chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((vat[..2].to_string(), vat[2..].to_string()))
}

/// Reduces a URL, host or email address to a bare lowercase domain.
pub fn normalize_domain(value: &str) -> Option<String> {
    let mut domain = value.trim().to_lowercase();
    if let Some(at) = domain.rfind('@') {
        domain = domain[at + 1..].to_string();
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = domain.strip_prefix(scheme) {
            domain = rest.to_string();
        }
    }
    if let Some(rest) = domain.strip_prefix("www.") {
        domain = rest.to_string();
    }
    if let Some(end) = domain.find(['/', '?', '#', ':']) {
        domain.truncate(end);
    }
    let domain = domain.trim_matches('.').to_string();

    if domain.contains('.') && !domain.contains(char::is_whitespace) {
        Some(domain)
    } else {
        None
    }
}

/// Same domain, or one is a subdomain of the other.
pub fn domains_related(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!(".{}", b)) || b.ends_with(&format!(".{}", a))
}

pub fn is_public_mail_domain(domain: &str) -> bool {
    PUBLIC_MAIL_DOMAINS.iter().any(|d| domains_related(domain, d))
}

pub fn is_billing_domain(domain: &str) -> bool {
    BILLING_DOMAINS.iter().any(|d| domains_related(domain, d))
}

/// A domain that can identify a counterparty at all.
pub fn is_identifying_domain(domain: &str) -> bool {
    !is_public_mail_domain(domain) && !is_billing_domain(domain)
}

fn tokens(value: &str) -> Vec<String> {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Lowercase, punctuation-free company name with trailing legal forms removed.
pub fn normalize_name(value: &str) -> String {
    let mut parts = tokens(value);
    while parts.len() > 1
        && parts
            .last()
            .map(|t| LEGAL_SUFFIXES.contains(&t.as_str()))
            .unwrap_or(false)
    {
        parts.pop();
    }
    parts.join(" ")
}

/// True when the name carries a registered legal-entity form (`GmbH`, `Ltd`, `S.A.`, ...).
pub fn has_legal_suffix(value: &str) -> bool {
    tokens(value)
        .iter()
        .skip(1)
        .any(|t| ENTITY_MARKERS.contains(&t.as_str()))
}

/// Edit-distance similarity of two company names, 0-100.
///
/// Names are compared after normalization. Whole-word containment of one name in the other
/// lifts the score to at least 85, plain substring containment to at least 75.
pub fn name_similarity(a: &str, b: &str) -> u8 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0;
    }
    if na == nb {
        return 100;
    }

    let mut score = strsim::normalized_levenshtein(&na, &nb) * 100.0;

    let (shorter, longer) = if na.len() <= nb.len() {
        (&na, &nb)
    } else {
        (&nb, &na)
    };
    if shorter.chars().count() >= 4 {
        if format!(" {} ", longer).contains(&format!(" {} ", shorter)) {
            score = score.max(85.0);
        } else if longer.contains(shorter.as_str()) {
            score = score.max(75.0);
        }
    }

    score.round().clamp(0.0, 100.0) as u8
}

/// Best similarity of `query` against any of `names`.
pub fn best_name_similarity<'a>(query: &str, names: impl IntoIterator<Item = &'a str>) -> u8 {
    names
        .into_iter()
        .map(|name| name_similarity(query, name))
        .max()
        .unwrap_or(0)
}

/// Words long enough to carry meaning.
pub fn significant_words(value: &str) -> Vec<String> {
    let normalized = normalize_name(value);
    let mut words: Vec<String> = normalized
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect();
    words.dedup();
    words
}

/// Number of significant words `name` shares with `text`.
pub fn word_overlap(name: &str, text: &str) -> usize {
    let text_words = significant_words(text);
    significant_words(name)
        .iter()
        .filter(|w| text_words.contains(w))
        .count()
}

/// Case-insensitive glob match where `*` spans any run of characters.
pub fn wildcard_matches(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    let body = pattern
        .trim()
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{}$", body))
        .map(|re| re.is_match(text.trim()))
        .unwrap_or(false)
}

/// Invoice and receipt numbers found in free text, digits only.
pub fn extract_invoice_numbers(text: &str) -> Vec<String> {
    let text = text.replace('_', " ");
    let mut numbers: Vec<String> = INVOICE_PREFIXED
        .captures_iter(&text)
        .chain(RECEIPT_PAIR.captures_iter(&text))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|n| n.len() >= 5)
        .collect();
    numbers.sort();
    numbers.dedup();
    numbers
}

/// The document's reference appears verbatim (ignoring case and spacing) in `haystack`.
pub fn reference_contained(reference: &str, haystack: &str) -> bool {
    let compact = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let needle = compact(reference);
    needle.chars().count() >= 4 && compact(haystack).contains(&needle)
}
