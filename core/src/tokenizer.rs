use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD: Regex =
        Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}\p{M}]*(?:['’_][\p{L}\p{N}][\p{L}\p{N}\p{M}]*)*").expect("valid regex");
    static ref ELISION: Regex =
        Regex::new(r"^(?:l|d|j|m|n|s|t|c|qu|jusqu|lorsqu|puisqu|quoiqu|dell|all|dall|nell|sull|coll|un)'").expect("valid regex");
}

/// Per-language word rules, picked from the primary subtag of a locale ("fr-CH" -> "fr").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rules {
    /// Leading elided articles ("l'", "d'", "dell'") are split off and dropped.
    Elision,
    Plain,
}

impl Rules {
    fn for_locale(locale: &str) -> Self {
        let language = locale.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
        match language.as_str() {
            "fr" | "it" | "ca" => Rules::Elision,
            _ => Rules::Plain,
        }
    }

    fn finish(self, token: &str) -> Option<String> {
        let token = token.replace('’', "'");
        let word = match self {
            Rules::Elision => ELISION.replace(&token, "").into_owned(),
            Rules::Plain => token,
        };
        if word.is_empty() {
            None
        } else {
            Some(word)
        }
    }
}

/// Split text into lowercase words using NFKC normalization and locale word rules.
/// Punctuation and whitespace are boundaries and never appear in the output.
pub fn split(text: &str, locale: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let rules = Rules::for_locale(locale);
    WORD.find_iter(&normalized).filter_map(|m| rules.finish(m.as_str())).collect()
}

/// NFKC + lowercase without splitting, for query chunks and wildcard literals.
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// The character-level form words take in [`split`]: normalized, with typographic apostrophes
/// turned into `'`. Phrase patterns are matched against text in this form.
pub fn fold(text: &str) -> String {
    normalize(text).replace('’', "'")
}
