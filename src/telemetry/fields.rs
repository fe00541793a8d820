//! Field extraction, amount normalization and redaction helpers.
//!
//! Every logical field is read through an ordered [`Candidates`] list: the
//! first key holding a present, non-null, non-empty value wins.

use super::body::ParsedBody;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Ordered list of keys that may carry one logical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidates(&'static [&'static str]);

/// Login identifier keys in the body.
pub const IDENTIFIER: Candidates = Candidates(&["username", "user", "email", "login", "uid"]);

/// Login identifier keys in the query string.
pub const QUERY_IDENTIFIER: Candidates = Candidates(&["username", "user", "email"]);

/// External user id keys.
pub const EXTERNAL_ID: Candidates = Candidates(&["uuid", "userId", "id"]);

/// Transaction amount keys.
pub const AMOUNT: Candidates = Candidates(&["amount", "sum", "value", "amt"]);

/// Keys that mark a transaction even when no amount is present.
pub const TRANSACTION_HINT: Candidates =
    Candidates(&["toAccount", "beneficiary", "payeeValue", "iban", "accountTo"]);

pub const PAYEE_VALUE: Candidates = Candidates(&[
    "payeeValue",
    "toAccount",
    "beneficiary",
    "dest",
    "iban",
    "accountTo",
]);

pub const PAYER_VALUE: Candidates =
    Candidates(&["payerValue", "fromAccount", "source", "accountFrom"]);

pub const PAYEE_NAME: Candidates =
    Candidates(&["payeeName", "beneficiaryName", "toName", "recipient"]);

pub const PAYEE_BANK_CODE: Candidates =
    Candidates(&["payeeBankCode", "bankCode", "swift", "bic", "branchCode"]);

impl Candidates {
    /// First present value among the candidate keys of a structured body.
    pub fn pick(&self, body: &ParsedBody) -> Option<String> {
        self.0
            .iter()
            .find_map(|key| body.get(key).and_then(value_text))
    }

    /// First non-empty value among the candidate keys of a raw query string.
    ///
    /// Only the first occurrence of each key is considered.
    pub fn pick_query(&self, query: &str) -> Option<String> {
        self.0.iter().find_map(|key| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k.as_ref() == *key)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        })
    }
}

/// Text form of a field value; null and empty strings are absent.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Normalize a free-form amount into a number.
///
/// Everything except digits, `,`, `.` and `-` is dropped. With both
/// separators present the right-most one is the decimal point. A lone comma
/// is a decimal point only when exactly two digits follow it at the end;
/// otherwise it is a thousands separator.
pub fn normalize_amount(raw: &str) -> Option<f64> {
    let s: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();

    let has_comma = s.contains(',');
    let cleaned = if has_comma && s.contains('.') {
        if s.rfind('.') > s.rfind(',') {
            s.replace(',', "")
        } else {
            s.replace('.', "").replacen(',', ".", 1)
        }
    } else if has_comma && has_two_decimal_comma(&s) {
        s.replacen(',', ".", 1)
    } else {
        s.replace(',', "")
    };

    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// `,` followed by exactly two digits at the end of the string.
fn has_two_decimal_comma(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 3 && b[b.len() - 3] == b',' && b[b.len() - 2..].iter().all(u8::is_ascii_digit)
}

/// Mask account-like values.
///
/// With whitespace removed, a value holding a run of six or more digits
/// becomes `****` plus its last four characters. Anything else is returned
/// unchanged.
pub fn mask_account(value: &str) -> String {
    let compact: Vec<char> = value.chars().filter(|c| !c.is_whitespace()).collect();
    if longest_digit_run(&compact) < 6 {
        return value.to_string();
    }
    let tail: String = compact[compact.len().saturating_sub(4)..].iter().collect();
    format!("****{tail}")
}

fn longest_digit_run(chars: &[char]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for c in chars {
        if c.is_ascii_digit() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

/// One-way hash of a login identifier: hex SHA-256 of the trimmed,
/// lower-cased value.
pub fn hash_identifier(identifier: &str) -> String {
    let normalized = identifier.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_body(value: Value) -> ParsedBody {
        ParsedBody::Json(value)
    }

    #[test]
    fn test_pick_respects_candidate_order() {
        let body = json_body(json!({"email": "e@x.io", "user": "bob"}));
        assert_eq!(IDENTIFIER.pick(&body), Some("bob".to_string()));
    }

    #[test]
    fn test_pick_skips_null_and_empty() {
        let body = json_body(json!({"username": null, "user": "", "email": "e@x.io"}));
        assert_eq!(IDENTIFIER.pick(&body), Some("e@x.io".to_string()));
    }

    #[test]
    fn test_pick_stringifies_scalars() {
        let body = json_body(json!({"id": 42, "amount": 12.5}));
        assert_eq!(EXTERNAL_ID.pick(&body), Some("42".to_string()));
        assert_eq!(AMOUNT.pick(&body), Some("12.5".to_string()));
    }

    #[test]
    fn test_pick_on_text_body_is_none() {
        let body = ParsedBody::Text("username=bob".to_string());
        assert_eq!(IDENTIFIER.pick(&body), None);
    }

    #[test]
    fn test_pick_query_uses_first_occurrence() {
        assert_eq!(
            QUERY_IDENTIFIER.pick_query("user=&email=a%40b.c&email=z"),
            Some("a@b.c".to_string())
        );
        assert_eq!(QUERY_IDENTIFIER.pick_query("page=2"), None);
        assert_eq!(QUERY_IDENTIFIER.pick_query(""), None);
    }

    #[test]
    fn test_normalize_amount() {
        assert_eq!(normalize_amount("1.234,56"), Some(1234.56));
        assert_eq!(normalize_amount("1,234.56"), Some(1234.56));
        assert_eq!(normalize_amount("42"), Some(42.0));
        assert_eq!(normalize_amount("abc"), None);
    }

    #[test]
    fn test_normalize_amount_lone_comma() {
        assert_eq!(normalize_amount("12,50"), Some(12.5));
        assert_eq!(normalize_amount("1,500"), Some(1500.0));
        assert_eq!(normalize_amount("1,5"), Some(15.0));
    }

    #[test]
    fn test_normalize_amount_strips_noise() {
        assert_eq!(normalize_amount(" $ 1 000.25 USD"), Some(1000.25));
        assert_eq!(normalize_amount("-7.5"), Some(-7.5));
        assert_eq!(normalize_amount("--"), None);
        assert_eq!(normalize_amount("1,234,56"), None);
    }

    #[test]
    fn test_mask_account() {
        assert_eq!(mask_account("12345678"), "****5678");
        assert_eq!(mask_account("DE89 3704 0044 0532 0130 00"), "****3000");
        assert_eq!(mask_account("ABC"), "ABC");
        assert_eq!(mask_account("12 34 56"), "****3456");
        assert_eq!(mask_account("12-34-56"), "12-34-56");
    }

    #[test]
    fn test_hash_identifier_is_normalized_and_opaque() {
        let hash = hash_identifier("  Alice@Example.com ");
        assert_eq!(hash, hash_identifier("alice@example.com"));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, "alice@example.com");
        assert_eq!(
            hash_identifier(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
