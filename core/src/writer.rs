use crate::extract::extract;
use crate::index::{DocumentRecord, IndexStore};
use crate::tokenizer;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A rendered page handed over for indexing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    /// Falls back to the page's `<title>` when empty.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub groups: Vec<u64>,
    #[serde(default)]
    pub pid: u64,
    #[serde(default = "default_language")]
    pub language: String,
    pub content: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Skip,
}

/// Called for every page after extraction and before anything is written. Hooks may rewrite
/// the record (its checksum is recomputed afterwards) or skip the page.
pub trait IndexHook: Send + Sync {
    fn before_write(&self, content: &str, page: &PageData, record: &mut DocumentRecord) -> HookOutcome;
}

pub struct Indexer {
    store: Arc<dyn IndexStore>,
    hooks: Vec<Box<dyn IndexHook>>,
}

impl Indexer {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store, hooks: Vec::new() }
    }

    pub fn with_hook<H: IndexHook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Index one page. Returns `false` when nothing was written: the page opted out, a hook
    /// skipped it, or the same content is already indexed under an equally canonical URL.
    pub fn index_page(&self, page: &PageData) -> Result<bool> {
        let extracted = extract(&page.content);
        if extracted.noindex {
            info!(url = %page.url, "page is marked noindex");
            self.remove_entry(&page.url)?;
            return Ok(false);
        }

        let title = if page.title.trim().is_empty() { extracted.title.clone() } else { page.title.clone() };
        let text = extracted.indexed_text(&title);
        let mut record = DocumentRecord {
            id: 0,
            pid: page.pid,
            url: page.url.clone(),
            title,
            protected: page.protected,
            groups: page.groups.clone(),
            filesize: extracted.filesize,
            language: page.language.clone(),
            text,
            checksum: String::new(),
            tstamp: time::OffsetDateTime::now_utc().unix_timestamp(),
        };

        for hook in &self.hooks {
            if hook.before_write(&page.content, page, &mut record) == HookOutcome::Skip {
                info!(url = %page.url, "page skipped by index hook");
                return Ok(false);
            }
        }
        record.checksum = checksum(&record.text);

        if let Some(existing) = self.store.find_by_checksum(record.pid, &record.checksum)? {
            if existing.url != record.url {
                match canonical_order(&record.url, &existing.url) {
                    Ordering::Less => {
                        debug!(old = %existing.url, new = %record.url, "replacing less canonical url");
                        self.store.delete_document(existing.id)?;
                    }
                    Ordering::Greater => {
                        debug!(kept = %existing.url, new = %record.url, "content already indexed under a more canonical url");
                        if let Some(stale) = self.store.find_by_url(&record.url)? {
                            self.store.delete_document(stale.id)?;
                        }
                        record.url = existing.url.clone();
                    }
                    Ordering::Equal => {
                        info!(url = %record.url, indexed = %existing.url, "content already indexed under another url");
                        return Ok(false);
                    }
                }
            }
        }

        record.id = match self.store.find_by_url(&record.url)? {
            Some(existing) => existing.id,
            None => self.store.allocate_id()?,
        };
        self.store.save_document(&record)?;

        let words = count_words(&record.text, &record.language);
        self.store.replace_postings(record.id, &record.language, &words)?;
        debug!(id = record.id, url = %record.url, words = words.len(), "indexed page");
        Ok(true)
    }

    /// Drop the record stored for `url`. Returns whether there was one.
    pub fn remove_entry(&self, url: &str) -> Result<bool> {
        match self.store.find_by_url(url)? {
            Some(record) => {
                self.store.delete_document(record.id)?;
                info!(%url, "removed search entry");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn purge(&self) -> Result<()> {
        self.store.purge()?;
        info!("search index purged");
        Ok(())
    }
}

pub fn checksum(text: &str) -> String {
    format!("{:x}", Sha1::digest(text.as_bytes()))
}

fn count_words(text: &str, language: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for word in tokenizer::split(text, language) {
        *counts.entry(word).or_insert(0) += 1;
    }
    counts
}

/// Compare two URLs for the same content; `Less` means `a` is more canonical. A URL without a
/// query string beats one with, then the shorter one wins, then the one with more path segments.
/// `Equal` is a tie no rule decides.
pub fn canonical_order(a: &str, b: &str) -> Ordering {
    canonical_key(a).cmp(&canonical_key(b))
}

fn canonical_key(url: &str) -> (bool, usize, Reverse<usize>) {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segments = path.split('/').filter(|s| !s.is_empty()).count();
    (url.contains('?'), url.len(), Reverse(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::SledStore;

    fn page(url: &str, body: &str) -> PageData {
        PageData {
            url: url.to_string(),
            title: "Title".into(),
            pid: 1,
            language: "en".into(),
            content: format!("<html><head></head><body>{body}</body></html>"),
            ..Default::default()
        }
    }

    fn indexer() -> Indexer {
        Indexer::new(Arc::new(SledStore::temporary().unwrap()))
    }

    #[test]
    fn canonical_order_prefers_clean_short_urls() {
        assert_eq!(canonical_order("/a", "/a?x=1"), Ordering::Less);
        assert_eq!(canonical_order("/about", "/a/b"), Ordering::Greater);
        assert_eq!(canonical_order("/a/b", "/abc"), Ordering::Less);
        assert_eq!(canonical_order("/a/c", "/a/b"), Ordering::Equal);
    }

    #[test]
    fn equal_ranked_duplicate_is_refused() {
        let indexer = indexer();
        assert!(indexer.index_page(&page("/a/b", "same")).unwrap());
        assert!(!indexer.index_page(&page("/a/c", "same")).unwrap());
        assert!(indexer.store().find_by_url("/a/c").unwrap().is_none());
    }

    #[test]
    fn checksum_is_hex_sha1() {
        assert_eq!(checksum("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn title_falls_back_to_title_element() {
        let indexer = indexer();
        let mut p = page("/t", "body");
        p.title.clear();
        p.content = "<head><title>Element</title></head><body>body</body>".into();
        indexer.index_page(&p).unwrap();
        assert_eq!(indexer.store().find_by_url("/t").unwrap().unwrap().title, "Element");
    }

    struct SkipDrafts;

    impl IndexHook for SkipDrafts {
        fn before_write(&self, _content: &str, page: &PageData, record: &mut DocumentRecord) -> HookOutcome {
            if page.url.contains("draft") {
                return HookOutcome::Skip;
            }
            record.text.push_str(" hooked");
            HookOutcome::Continue
        }
    }

    #[test]
    fn hooks_can_skip_or_rewrite() {
        let indexer = indexer().with_hook(SkipDrafts);
        assert!(!indexer.index_page(&page("/draft", "x")).unwrap());
        assert!(indexer.index_page(&page("/live", "x")).unwrap());
        let record = indexer.store().find_by_url("/live").unwrap().unwrap();
        assert!(record.text.ends_with("hooked"));
        assert_eq!(record.checksum, checksum(&record.text));
        assert_eq!(indexer.store().document_frequency("hooked").unwrap(), 1);
    }

    #[test]
    fn noindex_page_removes_previous_entry() {
        let indexer = indexer();
        assert!(indexer.index_page(&page("/n", "x")).unwrap());
        let mut p = page("/n", "x");
        p.content = r#"<head><meta name="robots" content="noindex"></head><body>x</body>"#.into();
        assert!(!indexer.index_page(&p).unwrap());
        assert!(indexer.store().find_by_url("/n").unwrap().is_none());
    }
}
