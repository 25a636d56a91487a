use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Search defaults shared by the binaries. Every field falls back to its default when absent
/// from the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Query words shorter than this (in characters) are ignored. 0 disables the check.
    pub min_word_length: usize,
    /// Locale used to split query terms when the caller supplies none.
    pub default_locale: String,
    pub or_search: bool,
    pub fuzzy: bool,
    pub per_page: usize,
    pub max_per_page: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_word_length: 0,
            default_locale: "en".to_string(),
            or_search: false,
            fuzzy: false,
            per_page: 10,
            max_per_page: 100,
        }
    }
}

impl SearchConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Clamp a caller supplied page size into `1..=max_per_page`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.per_page).clamp(1, self.max_per_page.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_word_length": 3, "fuzzy": true}}"#).unwrap();
        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.min_word_length, 3);
        assert!(config.fuzzy);
        assert_eq!(config.default_locale, "en");
        assert_eq!(config.per_page, 10);
    }

    #[test]
    fn page_size_is_clamped() {
        let config = SearchConfig::default();
        assert_eq!(config.page_size(None), 10);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(1000)), 100);
    }
}
