//! Parsing of free-text queries into term classes.
//!
//! Grammar: `"quoted phrases"`, `+required`, `-excluded`, `wild*cards` and plain words. Plain,
//! required and excluded chunks go through [`tokenizer::split`], so `+foo-bar` requires both
//! `foo` and `bar`.

use crate::tokenizer::{self, fold, normalize};
use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

lazy_static! {
    static ref CHUNK: Regex = Regex::new(r#""[^"]+"|[+-]?\S+"#).expect("valid regex");
}

/// SQL `LIKE` style pattern where `%` matches any run of characters.
#[derive(Debug, Clone)]
pub struct LikePattern {
    source: String,
    prefix: String,
    regex: Regex,
}

impl LikePattern {
    /// Returns `None` for patterns without any literal character, which would match every word.
    pub fn parse(source: &str) -> Option<Self> {
        let parts: Vec<&str> = source.split('%').collect();
        if parts.iter().all(|p| p.is_empty()) {
            return None;
        }
        let body = parts.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join(".*");
        let regex = Regex::new(&format!("^{body}$")).ok()?;
        Some(Self { source: source.to_string(), prefix: parts[0].to_string(), regex })
    }

    /// Characters before the first `%`; every matching word starts with them.
    pub fn literal_prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of non-wildcard characters.
    pub fn literal_len(&self) -> usize {
        self.source.chars().filter(|&c| c != '%').count()
    }

    pub fn matches(&self, word: &str) -> bool {
        self.regex.is_match(word)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for LikePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone)]
pub struct Phrase {
    pub words: Vec<String>,
    pub pattern: Regex,
}

impl Phrase {
    fn parse(inner: &str, locale: &str) -> Result<Option<Self>> {
        let words = tokenizer::split(inner, locale);
        if words.is_empty() {
            return Ok(None);
        }
        let body = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join(r"[^\p{L}\p{N}]+");
        let pattern = Regex::new(&format!(r"(?i)\b{body}\b"))?;
        Ok(Some(Self { words, pattern }))
    }

    /// Match against raw stored text; the text is folded the way the phrase words were.
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(&fold(text))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub phrases: Vec<Phrase>,
    pub keywords: Vec<String>,
    pub required: Vec<String>,
    pub excluded: Vec<String>,
    pub wildcards: Vec<LikePattern>,
    /// `+wild*` chunks: wildcards that stay mandatory in OR mode.
    pub required_wildcards: Vec<LikePattern>,
    pub locale: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub fuzzy: bool,
    pub min_length: usize,
}

impl ParsedQuery {
    pub fn parse(raw: &str, locale: &str, options: ParseOptions) -> Result<Self> {
        let normalized = normalize(raw);
        if normalized.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let mut query = ParsedQuery { locale: locale.to_string(), ..Default::default() };
        let mut seen = HashSet::new();
        let long_enough = |w: &String| options.min_length == 0 || w.chars().count() >= options.min_length;

        for chunk in CHUNK.find_iter(&normalized).map(|m| m.as_str()) {
            if !seen.insert(chunk) {
                continue;
            }
            if chunk.len() >= 2 && chunk.starts_with('"') && chunk.ends_with('"') {
                if let Some(phrase) = Phrase::parse(&chunk[1..chunk.len() - 1], locale)? {
                    query.phrases.push(phrase);
                }
            } else if let Some(rest) = chunk.strip_prefix('-') {
                query.excluded.extend(tokenizer::split(rest, locale).into_iter().filter(long_enough));
            } else if let Some(pattern) = wildcard(chunk.strip_prefix('+').unwrap_or(chunk)) {
                if options.min_length == 0 || pattern.literal_len() >= options.min_length {
                    if chunk.starts_with('+') {
                        query.required_wildcards.push(pattern);
                    } else {
                        query.wildcards.push(pattern);
                    }
                }
            } else if let Some(rest) = chunk.strip_prefix('+') {
                query.required.extend(tokenizer::split(rest, locale).into_iter().filter(long_enough));
            } else {
                query.keywords.extend(tokenizer::split(chunk, locale).into_iter().filter(long_enough));
            }
        }

        if options.fuzzy {
            for keyword in std::mem::take(&mut query.keywords) {
                if let Some(pattern) = LikePattern::parse(&format!("%{keyword}%")) {
                    query.wildcards.push(pattern);
                }
            }
        }

        dedup(&mut query.keywords);
        dedup(&mut query.required);
        dedup(&mut query.excluded);

        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        Ok(query)
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
            && self.keywords.is_empty()
            && self.required.is_empty()
            && self.excluded.is_empty()
            && self.wildcards.is_empty()
            && self.required_wildcards.is_empty()
    }

    /// Whether `word` is one of the positive terms of the query.
    pub fn wants(&self, word: &str) -> bool {
        self.keywords.iter().any(|k| k == word)
            || self.required.iter().any(|k| k == word)
            || self.phrases.iter().any(|p| p.words.iter().any(|w| w == word))
            || self.wildcards.iter().chain(&self.required_wildcards).any(|p| p.matches(word))
    }

    /// Words of `text` that match a positive term, in order of first appearance. `language` is
    /// the language the text was indexed in, so its words split the way its postings did.
    pub fn matched_terms(&self, text: &str, language: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        tokenizer::split(text, language)
            .into_iter()
            .filter(|w| self.wants(w))
            .filter(|w| seen.insert(w.clone()))
            .collect()
    }
}

fn wildcard(chunk: &str) -> Option<LikePattern> {
    if chunk.chars().count() < 2 || !(chunk.starts_with('*') || chunk.ends_with('*')) {
        return None;
    }
    LikePattern::parse(&chunk.replace('*', "%"))
}

fn dedup(words: &mut Vec<String>) {
    let mut seen = HashSet::new();
    words.retain(|w| seen.insert(w.clone()));
}
