//! Keyword relevance filter.

use regex::{Regex, RegexBuilder};

use crate::{domain::Message, errors::Error, Result};

/// Immutable, case-insensitive keyword matcher.
///
/// All keywords are folded into one alternation so each message is scanned once.
/// An empty set matches nothing.
#[derive(Clone, Debug)]
pub struct KeywordSet {
    keywords: Vec<String>,
    matcher: Option<Regex>,
}

impl KeywordSet {
    /// Keywords are plain substrings; regex metacharacters match literally.
    pub fn literal(keywords: &[String]) -> Result<Self> {
        let escaped = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| regex::escape(&k.to_lowercase()))
            .collect::<Vec<_>>();
        Self::build(keywords, escaped)
    }

    /// Keywords are regex fragments, joined with `|`.
    pub fn patterns(keywords: &[String]) -> Result<Self> {
        let fragments = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| format!("(?:{k})"))
            .collect::<Vec<_>>();
        Self::build(keywords, fragments)
    }

    fn build(keywords: &[String], alternatives: Vec<String>) -> Result<Self> {
        let matcher = if alternatives.is_empty() {
            None
        } else {
            let re = RegexBuilder::new(&alternatives.join("|"))
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Config(format!("invalid keyword pattern: {e}")))?;
            Some(re)
        };
        Ok(Self {
            keywords: keywords.to_vec(),
            matcher,
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn matches(&self, text: &str) -> bool {
        let Some(re) = &self.matcher else {
            return false;
        };
        !text.is_empty() && re.is_match(&text.to_lowercase())
    }
}

/// Keep the messages whose body mentions any keyword. Order is preserved.
pub fn classify(messages: &[Message], keywords: &KeywordSet) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.body().is_some_and(|body| keywords.matches(body)))
        .cloned()
        .collect()
}
