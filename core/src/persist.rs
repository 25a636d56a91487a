use crate::index::{DocId, DocumentRecord, IndexStats, IndexStore, Posting};
use crate::query::LikePattern;
use crate::Result;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;

const DOCUMENTS: &str = "documents";
const URLS: &str = "urls";
const CHECKSUMS: &str = "checksums";
const POSTINGS: &str = "postings";
const DOC_WORDS: &str = "doc_words";
const TERMS: &str = "terms";
const META: &str = "meta";
const DOCUMENT_COUNT: &[u8] = b"document_count";

/// [`IndexStore`] on top of an embedded sled database.
///
/// `postings` keys are `word 0x00 doc_id`, so all postings of a word sit under one prefix.
/// `doc_words` holds the reverse direction and drives posting replacement. `meta` keeps the
/// document count so query planning never scans the document tree.
pub struct SledStore {
    db: Db,
    documents: Tree,
    urls: Tree,
    checksums: Tree,
    postings: Tree,
    doc_words: Tree,
    terms: Tree,
    meta: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Store that lives in memory and disappears on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let store = Self {
            documents: db.open_tree(DOCUMENTS)?,
            urls: db.open_tree(URLS)?,
            checksums: db.open_tree(CHECKSUMS)?,
            postings: db.open_tree(POSTINGS)?,
            doc_words: db.open_tree(DOC_WORDS)?,
            terms: db.open_tree(TERMS)?,
            meta: db.open_tree(META)?,
            db,
        };
        // indexes written before the counter existed get it once, from a full count
        if store.meta.get(DOCUMENT_COUNT)?.is_none() {
            let count = store.documents.len() as u64;
            store.meta.insert(DOCUMENT_COUNT, &count.to_be_bytes()[..])?;
        }
        Ok(store)
    }

    fn adjust_document_count(&self, delta: i64) -> Result<()> {
        self.meta.fetch_and_update(DOCUMENT_COUNT, |old| {
            let current = old.and_then(decode_id).unwrap_or(0) as i64;
            Some(((current + delta).max(0) as u64).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn id_at(&self, tree: &Tree, key: &[u8]) -> Result<Option<DocId>> {
        Ok(tree.get(key)?.and_then(|v| decode_id(&v)))
    }

    fn delete_postings(&self, id: DocId) -> Result<()> {
        if let Some(bytes) = self.doc_words.remove(id.to_be_bytes())? {
            let words: Vec<(String, u32)> = bincode::deserialize(&bytes)?;
            for (word, _) in words {
                self.postings.remove(posting_key(&word, id))?;
                self.adjust_frequency(&word, -1)?;
            }
        }
        Ok(())
    }

    fn adjust_frequency(&self, word: &str, delta: i64) -> Result<()> {
        self.terms.fetch_and_update(word.as_bytes(), |old| {
            let next = old.map(decode_u32).unwrap_or(0) as i64 + delta;
            if next <= 0 {
                None
            } else {
                Some((next as u32).to_be_bytes().to_vec())
            }
        })?;
        Ok(())
    }
}

impl IndexStore for SledStore {
    fn allocate_id(&self) -> Result<DocId> {
        // sled ids start at 0; keep 0 free so it never names a stored document
        Ok(self.db.generate_id()? + 1)
    }

    fn document(&self, id: DocId) -> Result<Option<DocumentRecord>> {
        match self.documents.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn documents(&self, ids: &[DocId]) -> Result<HashMap<DocId, DocumentRecord>> {
        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(record) = self.document(id)? {
                out.insert(id, record);
            }
        }
        Ok(out)
    }

    fn find_by_url(&self, url: &str) -> Result<Option<DocumentRecord>> {
        match self.id_at(&self.urls, url.as_bytes())? {
            Some(id) => self.document(id),
            None => Ok(None),
        }
    }

    fn find_by_checksum(&self, pid: u64, checksum: &str) -> Result<Option<DocumentRecord>> {
        match self.id_at(&self.checksums, &checksum_key(pid, checksum))? {
            Some(id) => self.document(id),
            None => Ok(None),
        }
    }

    fn save_document(&self, record: &DocumentRecord) -> Result<()> {
        let id_bytes = record.id.to_be_bytes();
        let new_checksum = checksum_key(record.pid, &record.checksum);
        match self.document(record.id)? {
            Some(old) => {
                if old.url != record.url && self.id_at(&self.urls, old.url.as_bytes())? == Some(record.id) {
                    self.urls.remove(old.url.as_bytes())?;
                }
                let old_checksum = checksum_key(old.pid, &old.checksum);
                if old_checksum != new_checksum && self.id_at(&self.checksums, &old_checksum)? == Some(record.id) {
                    self.checksums.remove(old_checksum)?;
                }
            }
            None => self.adjust_document_count(1)?,
        }
        self.documents.insert(id_bytes, bincode::serialize(record)?)?;
        self.urls.insert(record.url.as_bytes(), &id_bytes[..])?;
        self.checksums.insert(new_checksum, &id_bytes[..])?;
        Ok(())
    }

    fn delete_document(&self, id: DocId) -> Result<()> {
        self.delete_postings(id)?;
        if let Some(bytes) = self.documents.remove(id.to_be_bytes())? {
            self.adjust_document_count(-1)?;
            let record: DocumentRecord = bincode::deserialize(&bytes)?;
            if self.id_at(&self.urls, record.url.as_bytes())? == Some(id) {
                self.urls.remove(record.url.as_bytes())?;
            }
            let checksum = checksum_key(record.pid, &record.checksum);
            if self.id_at(&self.checksums, &checksum)? == Some(id) {
                self.checksums.remove(checksum)?;
            }
        }
        Ok(())
    }

    fn replace_postings(&self, id: DocId, language: &str, words: &HashMap<String, u32>) -> Result<()> {
        self.delete_postings(id)?;
        let mut entries: Vec<(String, u32)> = words.iter().map(|(w, f)| (w.clone(), *f)).collect();
        entries.sort();
        for (word, frequency) in &entries {
            let posting = Posting { frequency: *frequency, language: language.to_string() };
            self.postings.insert(posting_key(word, id), bincode::serialize(&posting)?)?;
            self.adjust_frequency(word, 1)?;
        }
        self.doc_words.insert(id.to_be_bytes(), bincode::serialize(&entries)?)?;
        Ok(())
    }

    fn postings(&self, word: &str) -> Result<Vec<(DocId, Posting)>> {
        let mut prefix = word.as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.postings.scan_prefix(&prefix) {
            let (key, value) = item?;
            if let Some(id) = decode_id(&key[prefix.len()..]) {
                out.push((id, bincode::deserialize(&value)?));
            }
        }
        Ok(out)
    }

    fn document_terms(&self, id: DocId) -> Result<Vec<(String, u32)>> {
        match self.doc_words.get(id.to_be_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn document_frequency(&self, word: &str) -> Result<u32> {
        Ok(self.terms.get(word.as_bytes())?.map(|v| decode_u32(&v)).unwrap_or(0))
    }

    fn words_like(&self, pattern: &LikePattern) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for item in self.terms.scan_prefix(pattern.literal_prefix().as_bytes()) {
            let (key, _) = item?;
            if let Ok(word) = std::str::from_utf8(&key) {
                if pattern.matches(word) {
                    out.push(word.to_string());
                }
            }
        }
        Ok(out)
    }

    fn document_count(&self) -> Result<u64> {
        Ok(self.meta.get(DOCUMENT_COUNT)?.and_then(|v| decode_id(&v)).unwrap_or(0))
    }

    fn document_ids(&self, pids: Option<&[u64]>) -> Result<Vec<DocId>> {
        let mut out = Vec::new();
        for item in self.documents.iter() {
            let (key, value) = item?;
            let Some(id) = decode_id(&key) else { continue };
            if let Some(pids) = pids {
                let record: DocumentRecord = bincode::deserialize(&value)?;
                if !pids.contains(&record.pid) {
                    continue;
                }
            }
            out.push(id);
        }
        Ok(out)
    }

    fn purge(&self) -> Result<()> {
        for tree in [&self.documents, &self.urls, &self.checksums, &self.postings, &self.doc_words, &self.terms] {
            tree.clear()?;
        }
        self.meta.insert(DOCUMENT_COUNT, &0u64.to_be_bytes()[..])?;
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            documents: self.document_count()?,
            words: self.terms.len() as u64,
            postings: self.postings.len() as u64,
        })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn posting_key(word: &str, id: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(word.len() + 9);
    key.extend_from_slice(word.as_bytes());
    key.push(0);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn checksum_key(pid: u64, checksum: &str) -> Vec<u8> {
    let mut key = pid.to_be_bytes().to_vec();
    key.extend_from_slice(checksum.as_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Option<DocId> {
    <[u8; 8]>::try_from(bytes).ok().map(DocId::from_be_bytes)
}

fn decode_u32(bytes: &[u8]) -> u32 {
    <[u8; 4]>::try_from(bytes).map(u32::from_be_bytes).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(store: &SledStore, url: &str, checksum: &str) -> DocumentRecord {
        DocumentRecord {
            id: store.allocate_id().unwrap(),
            pid: 1,
            url: url.to_string(),
            title: "Title".into(),
            protected: false,
            groups: vec![],
            filesize: 0.5,
            language: "en".into(),
            text: "Title body".into(),
            checksum: checksum.to_string(),
            tstamp: 0,
        }
    }

    fn words(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(w, f)| (w.to_string(), *f)).collect()
    }

    #[test]
    fn lookups_follow_url_and_checksum_changes() {
        let store = SledStore::temporary().unwrap();
        let mut doc = record(&store, "/a", "c1");
        store.save_document(&doc).unwrap();
        assert_eq!(store.find_by_url("/a").unwrap().unwrap().id, doc.id);

        doc.url = "/b".into();
        doc.checksum = "c2".into();
        store.save_document(&doc).unwrap();
        assert!(store.find_by_url("/a").unwrap().is_none());
        assert!(store.find_by_checksum(1, "c1").unwrap().is_none());
        assert_eq!(store.find_by_checksum(1, "c2").unwrap().unwrap().url, "/b");
        assert!(store.find_by_checksum(2, "c2").unwrap().is_none());
    }

    #[test]
    fn replacing_postings_keeps_frequencies_in_step() {
        let store = SledStore::temporary().unwrap();
        let first = record(&store, "/a", "c1");
        let second = record(&store, "/b", "c2");
        store.save_document(&first).unwrap();
        store.save_document(&second).unwrap();
        store.replace_postings(first.id, "en", &words(&[("rust", 2), ("search", 1)])).unwrap();
        store.replace_postings(second.id, "en", &words(&[("rust", 1)])).unwrap();
        assert_eq!(store.document_frequency("rust").unwrap(), 2);

        store.replace_postings(first.id, "en", &words(&[("index", 3)])).unwrap();
        assert_eq!(store.document_frequency("rust").unwrap(), 1);
        assert_eq!(store.document_frequency("search").unwrap(), 0);
        let postings = store.postings("index").unwrap();
        assert_eq!(postings, vec![(first.id, Posting { frequency: 3, language: "en".into() })]);

        store.delete_document(second.id).unwrap();
        assert_eq!(store.document_frequency("rust").unwrap(), 0);
        assert!(store.find_by_url("/b").unwrap().is_none());
        assert_eq!(store.stats().unwrap(), IndexStats { documents: 1, words: 1, postings: 1 });
    }

    #[test]
    fn postings_prefix_does_not_leak_into_longer_words() {
        let store = SledStore::temporary().unwrap();
        let doc = record(&store, "/a", "c1");
        store.save_document(&doc).unwrap();
        store.replace_postings(doc.id, "en", &words(&[("run", 1), ("runner", 1)])).unwrap();
        assert_eq!(store.postings("run").unwrap().len(), 1);
        let like = LikePattern::parse("run%").unwrap();
        assert_eq!(store.words_like(&like).unwrap(), vec!["run".to_string(), "runner".to_string()]);
    }

    #[test]
    fn document_count_follows_inserts_updates_and_deletes() {
        let store = SledStore::temporary().unwrap();
        let mut a = record(&store, "/a", "c1");
        let b = record(&store, "/b", "c2");
        store.save_document(&a).unwrap();
        store.save_document(&b).unwrap();
        assert_eq!(store.document_count().unwrap(), 2);

        a.title = "Renamed".into();
        store.save_document(&a).unwrap();
        assert_eq!(store.document_count().unwrap(), 2);

        store.delete_document(b.id).unwrap();
        store.delete_document(b.id).unwrap();
        assert_eq!(store.document_count().unwrap(), 1);
        assert_eq!(store.stats().unwrap().documents, 1);

        store.purge().unwrap();
        assert_eq!(store.document_count().unwrap(), 0);
        store.save_document(&a).unwrap();
        assert_eq!(store.document_count().unwrap(), 1);
    }

    #[test]
    fn reopened_index_counts_existing_documents() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledStore::from_db(db.clone()).unwrap();
        let a = record(&store, "/a", "c1");
        store.save_document(&a).unwrap();
        db.open_tree(META).unwrap().remove(DOCUMENT_COUNT).unwrap();

        let reopened = SledStore::from_db(db).unwrap();
        assert_eq!(reopened.document_count().unwrap(), 1);
    }

    #[test]
    fn document_ids_filter_by_pid() {
        let store = SledStore::temporary().unwrap();
        let a = record(&store, "/a", "c1");
        let mut b = record(&store, "/b", "c2");
        b.pid = 7;
        store.save_document(&a).unwrap();
        store.save_document(&b).unwrap();
        assert_eq!(store.document_ids(None).unwrap().len(), 2);
        assert_eq!(store.document_ids(Some(&[7][..])).unwrap(), vec![b.id]);
        store.purge().unwrap();
        assert_eq!(store.document_count().unwrap(), 0);
    }
}
