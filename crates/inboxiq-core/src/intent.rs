//! Best-effort extraction of what a permission request wants to do.
//!
//! This is a narrow pattern matcher over a handful of known phrasings, not
//! language understanding. Anything it cannot place becomes
//! `ParsedIntent::Unknown` with the raw description, which the UI still
//! offers for approval.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SEND_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsend(?:\s+an?)?\s+e-?mails?\b|\bsend_email\b").expect("valid regex")
});
static SEARCH_EMAILS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\b(?:search|retrieve|read|fetch|list|find)(?:_|\b).*?(?:e-?mails?|inbox|messages?)\b",
    )
    .expect("valid regex")
});
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*""#).expect("valid regex"));
static RECIPIENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bto\s+([^\s,;"]+)"#).expect("valid regex"));
static SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bsubject\s*:?\s*"([^"]*)""#).expect("valid regex"));
static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bbody\s*:?\s*"([^"]*)""#).expect("valid regex"));
static SINGLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)'").expect("valid regex"));
static DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsedIntent {
    SendEmail {
        to: Option<String>,
        subject: Option<String>,
        body: Option<String>,
    },
    SearchEmails {
        query: Option<String>,
    },
    Unknown {
        raw: String,
    },
}

impl ParsedIntent {
    /// One-line description for the permission prompt.
    pub fn summary(&self) -> String {
        match self {
            ParsedIntent::SendEmail { to, subject, .. } => {
                let mut text = String::from("Send an email");
                if let Some(to) = to {
                    text.push_str(&format!(" to {}", to));
                }
                if let Some(subject) = subject {
                    text.push_str(&format!(" (subject: {})", subject));
                }
                text
            }
            ParsedIntent::SearchEmails { query: Some(query) } => {
                format!("Search emails for '{}'", query)
            }
            ParsedIntent::SearchEmails { query: None } => "Search emails".to_string(),
            ParsedIntent::Unknown { raw } => raw.clone(),
        }
    }
}

pub fn parse_intent(description: &str) -> ParsedIntent {
    if SEND_EMAIL.is_match(description) {
        // Blank out quoted text so a "to" inside the subject or body is not
        // mistaken for the recipient.
        let unquoted = QUOTED.replace_all(description, "\"\"");
        let to = RECIPIENT
            .captures(&unquoted)
            .map(|c| c[1].trim_end_matches(['.', ',', ';', ':']).to_string())
            .filter(|s| !s.is_empty());

        return ParsedIntent::SendEmail {
            to,
            subject: capture(&SUBJECT, description),
            body: capture(&BODY, description),
        };
    }

    if SEARCH_EMAILS.is_match(description) {
        return ParsedIntent::SearchEmails {
            query: capture(&SINGLE_QUOTED, description)
                .or_else(|| capture(&DOUBLE_QUOTED, description)),
        };
    }

    ParsedIntent::Unknown {
        raw: description.to_string(),
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].to_string())
}
