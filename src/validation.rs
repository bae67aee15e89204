//! InputValidator — the syntactic gate in front of everything else
//! (spec.md §4.1).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

use crate::error::{EngineError, ValidationErrorKind};

const MAX_BYTES: usize = 5000;
const MAX_TOKEN_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityFlag {
    SqlInjection,
    CommandInjection,
    PathTraversal,
    ScriptInjection,
    PiiEmail,
    PiiPhone,
    PiiCreditCard,
    PiiSsn,
}

impl SecurityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityFlag::SqlInjection => "sql_injection",
            SecurityFlag::CommandInjection => "command_injection",
            SecurityFlag::PathTraversal => "path_traversal",
            SecurityFlag::ScriptInjection => "script_injection",
            SecurityFlag::PiiEmail => "pii_email",
            SecurityFlag::PiiPhone => "pii_phone",
            SecurityFlag::PiiCreditCard => "pii_credit_card",
            SecurityFlag::PiiSsn => "pii_ssn",
        }
    }

    pub fn is_pii(&self) -> bool {
        matches!(
            self,
            SecurityFlag::PiiEmail
                | SecurityFlag::PiiPhone
                | SecurityFlag::PiiCreditCard
                | SecurityFlag::PiiSsn
        )
    }
}

/// Sanitized text plus the security flags a caller may want to act on.
/// A non-empty `security_flags` does not mean the message was rejected —
/// only SQL-injection forms are ever rejected outright, and that rejection
/// happens at the agent layer (see orchestrator.rs), not here.
#[derive(Debug, Clone)]
pub struct ValidatedText {
    pub text: String,
    pub security_flags: HashSet<SecurityFlag>,
}

impl ValidatedText {
    pub fn has_sql_injection(&self) -> bool {
        self.security_flags.contains(&SecurityFlag::SqlInjection)
    }
}

static SQL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(select\s+.+\s+from|drop\s+table|union\s+select)\b|'\s*or\s+|--").unwrap()
});

static CMD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&&|;|`|\$\(|\||^/[a-zA-Z0-9_./-]+").unwrap());

static PATH_TRAVERSAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\./|\.\.%2f|%2e%2e/").unwrap());

static SCRIPT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<script|on\w+\s*=|javascript:").unwrap());

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\+?\d{1,3}[-.\s]?)?(\(?\d{3}\)?[-.\s]?)\d{3}[-.\s]?\d{4}\b").unwrap());

static CREDIT_CARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap());

static SSN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

/// Syntactic gate described in spec.md §4.1.
pub struct InputValidator;

impl InputValidator {
    /// Validate and sanitize raw input text.
    pub fn validate(raw: &str) -> Result<ValidatedText, EngineError> {
        if raw.as_bytes().is_empty() || raw.as_bytes().len() > MAX_BYTES {
            return Err(EngineError::Validation {
                kind: if raw.is_empty() {
                    ValidationErrorKind::TooShort
                } else {
                    ValidationErrorKind::TooLong
                },
                detail: format!("byte length {} outside [1, {}]", raw.len(), MAX_BYTES),
            });
        }

        if raw.contains('\0')
            || raw.chars().any(|c| {
                c.is_control() && c != '\t' && c != '\n' && c != '\r'
            })
        {
            return Err(EngineError::Validation {
                kind: ValidationErrorKind::BadEncoding,
                detail: "text contains null bytes or disallowed control characters".to_string(),
            });
        }

        for token in raw.split_whitespace() {
            if token.chars().count() > MAX_TOKEN_CHARS {
                return Err(EngineError::Validation {
                    kind: ValidationErrorKind::TokenTooLong,
                    detail: format!("token exceeds {MAX_TOKEN_CHARS} characters"),
                });
            }
        }

        let sanitized = sanitize(raw);

        // Re-check after sanitization: prevents the whitespace-only bypass
        // spec.md §4.1 and §9 call out as an open issue in the source.
        if sanitized.trim().is_empty() {
            return Err(EngineError::Validation {
                kind: ValidationErrorKind::TooShort,
                detail: "visible length is zero after sanitization".to_string(),
            });
        }

        let mut flags = HashSet::new();
        if SQL_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::SqlInjection);
        }
        if CMD_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::CommandInjection);
        }
        if PATH_TRAVERSAL_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::PathTraversal);
        }
        if SCRIPT_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::ScriptInjection);
        }
        if EMAIL_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::PiiEmail);
        }
        if PHONE_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::PiiPhone);
        }
        if CREDIT_CARD_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::PiiCreditCard);
        }
        if SSN_PATTERN.is_match(&sanitized) {
            flags.insert(SecurityFlag::PiiSsn);
        }

        Ok(ValidatedText {
            text: sanitized,
            security_flags: flags,
        })
    }

    /// Derive the context-insensitive normalized key used by L3/L4 cache
    /// lookups (spec.md §4.3): lowercased, diacritics folded.
    pub fn normalize_for_cache_key(text: &str) -> String {
        text.nfd()
            .filter(|c| !is_combining_mark(*c))
            .collect::<String>()
            .to_lowercase()
    }

    /// Replace detected PII spans with `[REDACTED:<kind>]` placeholders
    /// before persistence (spec.md §9 / SPEC_FULL.md §4.17).
    pub fn scrub_pii(text: &str) -> (String, bool) {
        let mut scrubbed = text.to_string();
        let mut any = false;
        for (pattern, label) in [
            (&*EMAIL_PATTERN, "email"),
            (&*PHONE_PATTERN, "phone"),
            (&*CREDIT_CARD_PATTERN, "credit_card"),
            (&*SSN_PATTERN, "ssn"),
        ] {
            if pattern.is_match(&scrubbed) {
                any = true;
                scrubbed = pattern
                    .replace_all(&scrubbed, format!("[REDACTED:{label}]"))
                    .into_owned();
            }
        }
        (scrubbed, any)
    }
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF
    )
}

/// Trim, collapse internal whitespace runs, strip null bytes, NFC-normalize.
fn sanitize(raw: &str) -> String {
    let no_nulls: String = raw.chars().filter(|&c| c != '\0').collect();
    let collapsed = no_nulls
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.nfc().collect()
}
