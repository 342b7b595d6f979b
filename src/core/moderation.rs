//! Chat content moderation
//!
//! Profanity is masked outright. Contact details (phone numbers, emails,
//! links, social handles) are only flagged: the message is still delivered,
//! and the flag feeds the abuse log.

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::Result;

const PROFANITY: &[&str] = &[
    "fuck",
    "fucking",
    "fucker",
    "motherfucker",
    "shit",
    "bullshit",
    "bitch",
    "asshole",
    "bastard",
    "dick",
    "cunt",
    "whore",
    "slut",
    "wanker",
    "twat",
    "prick",
];

const PHONE_PATTERN: &str = r"(?:\+?\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b";
const EMAIL_PATTERN: &str = r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b";
const URL_PATTERN: &str =
    r"(?i)(?:\bhttps?://\S+|\bwww\.\S+|\b[a-z0-9-]+\.(?:com|net|org|io|me|gg|co|ly|app|xyz)\b)";
const SOCIAL_PATTERN: &str = r"(?i)\b(?:instagram|insta|snapchat|snap|discord|telegram|whatsapp|tiktok|twitter|facebook|kik)\b|(?:^|\s)@[a-z0-9_.]{2,}";

/// Why a message was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Profanity,
    PhoneNumber,
    Email,
    Url,
    SocialHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationResult {
    /// Text to deliver, with profanity masked
    pub content: String,
    pub flagged: bool,
    pub original: String,
    pub reasons: Vec<FlagReason>,
}

/// Stateless filter; compiled once and shared
pub struct ModerationFilter {
    profanity: Regex,
    detectors: Vec<(FlagReason, Regex)>,
}

impl ModerationFilter {
    pub fn new() -> Result<Self> {
        Self::with_extra_words(&[])
    }

    /// Built-in word list extended with `extra_words`
    pub fn with_extra_words(extra_words: &[String]) -> Result<Self> {
        let words: Vec<String> = PROFANITY
            .iter()
            .map(|word| word.to_string())
            .chain(
                extra_words
                    .iter()
                    .map(|word| word.trim().to_lowercase())
                    .filter(|word| !word.is_empty()),
            )
            .map(|word| regex::escape(&word))
            .collect();

        let profanity = Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|")))?;

        let detectors = vec![
            (FlagReason::PhoneNumber, Regex::new(PHONE_PATTERN)?),
            (FlagReason::Email, Regex::new(EMAIL_PATTERN)?),
            (FlagReason::Url, Regex::new(URL_PATTERN)?),
            (FlagReason::SocialHandle, Regex::new(SOCIAL_PATTERN)?),
        ];

        Ok(Self {
            profanity,
            detectors,
        })
    }

    pub fn moderate(&self, text: &str) -> ModerationResult {
        let content = self
            .profanity
            .replace_all(text, |caps: &Captures| "*".repeat(caps[0].chars().count()))
            .into_owned();

        let mut reasons = Vec::new();
        if content != text {
            reasons.push(FlagReason::Profanity);
        }
        for (reason, pattern) in &self.detectors {
            if pattern.is_match(text) {
                reasons.push(*reason);
            }
        }

        ModerationResult {
            content,
            flagged: !reasons.is_empty(),
            original: text.to_string(),
            reasons,
        }
    }
}
