//! Query planning and ranking.
//!
//! A query is turned into a [`QueryPlan`]: one [`TermClause`] per distinct scoring word and a set
//! of [`Requirement`]s deciding whether a document qualifies at all. Relevance is a cosine
//! similarity between the query and document vectors with log-scaled term frequencies and
//! `ln((N + 1) / df)` as inverse document frequency.

use crate::config::SearchConfig;
use crate::index::{DocId, IndexStore};
use crate::query::{ParseOptions, ParsedQuery, Phrase};
use crate::result::{ResultRow, SearchResult};
use crate::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub keywords: String,
    pub or_search: bool,
    /// Restrict hits to these page tree roots.
    pub pids: Option<Vec<u64>>,
    /// 0 returns everything.
    pub limit: usize,
    pub offset: usize,
    pub fuzzy: bool,
    pub min_length: usize,
    pub locale: String,
}

impl SearchRequest {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            or_search: false,
            pids: None,
            limit: 0,
            offset: 0,
            fuzzy: false,
            min_length: 0,
            locale: "en".to_string(),
        }
    }

    pub fn from_config(keywords: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            or_search: config.or_search,
            fuzzy: config.fuzzy,
            min_length: config.min_word_length,
            locale: config.default_locale.clone(),
            ..Self::new(keywords)
        }
    }

    pub fn or_search(mut self, enabled: bool) -> Self {
        self.or_search = enabled;
        self
    }

    pub fn with_pids(mut self, pids: Vec<u64>) -> Self {
        self.pids = Some(pids);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct TermClause {
    pub word: String,
    pub idf: f64,
}

/// A condition a document has to meet.
#[derive(Debug, Clone)]
pub enum Requirement {
    Word(String),
    /// At least one of the words a wildcard expanded to.
    AnyWord(Vec<String>),
    Phrase(Phrase),
}

impl Requirement {
    fn satisfied(&self, matched: &HashSet<&str>, text: &str) -> bool {
        match self {
            Requirement::Word(word) => matched.contains(word.as_str()),
            Requirement::AnyWord(words) => words.iter().any(|w| matched.contains(w.as_str())),
            Requirement::Phrase(phrase) => phrase.is_match(text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub clauses: Vec<TermClause>,
    /// Every one of these must hold.
    pub mandatory: Vec<Requirement>,
    /// Best effort; in OR mode a document needs at least one positive requirement.
    pub optional: Vec<Requirement>,
    /// A document containing any of these is dropped.
    pub vetoes: Vec<String>,
    pub document_count: u64,
}

impl QueryPlan {
    /// Euclidean length of the query vector.
    pub fn query_length(&self) -> f64 {
        self.clauses.iter().map(|c| c.idf * c.idf).sum::<f64>().sqrt()
    }

    fn has_positive_terms(&self) -> bool {
        !self.mandatory.is_empty() || !self.optional.is_empty()
    }

    fn admits(&self, matched: &HashSet<&str>, text: &str) -> bool {
        if !self.mandatory.iter().all(|r| r.satisfied(matched, text)) {
            return false;
        }
        if !self.has_positive_terms() {
            return true;
        }
        !self.mandatory.is_empty() || self.optional.iter().any(|r| r.satisfied(matched, text))
    }
}

pub struct Searcher {
    store: Arc<dyn IndexStore>,
}

impl Searcher {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let options = ParseOptions { fuzzy: request.fuzzy, min_length: request.min_length };
        let query = ParsedQuery::parse(&request.keywords, &request.locale, options)?;
        let plan = self.plan(&query, request.or_search)?;
        let rows = self.execute(&plan, request.pids.as_deref())?;

        let total = rows.len();
        let limit = if request.limit == 0 { usize::MAX } else { request.limit };
        let rows: Vec<(DocId, ResultRow)> = rows.into_iter().skip(request.offset).take(limit).collect();
        debug!(query = %request.keywords, total, returned = rows.len(), "search executed");
        Ok(SearchResult::new(self.store.clone(), query, rows))
    }

    pub fn plan(&self, query: &ParsedQuery, or_search: bool) -> Result<QueryPlan> {
        let mut plan = QueryPlan { document_count: self.store.document_count()?, ..Default::default() };

        let mut scoring: Vec<String> = Vec::new();
        for word in query.required.iter() {
            plan.mandatory.push(Requirement::Word(word.clone()));
            scoring.push(word.clone());
        }
        for pattern in query.required_wildcards.iter() {
            let words = self.store.words_like(pattern)?;
            scoring.extend(words.iter().cloned());
            plan.mandatory.push(Requirement::AnyWord(words));
        }
        let positive = if or_search { &mut plan.optional } else { &mut plan.mandatory };
        for word in query.keywords.iter() {
            positive.push(Requirement::Word(word.clone()));
            scoring.push(word.clone());
        }
        for pattern in query.wildcards.iter() {
            let words = self.store.words_like(pattern)?;
            scoring.extend(words.iter().cloned());
            positive.push(Requirement::AnyWord(words));
        }
        for phrase in query.phrases.iter() {
            positive.push(Requirement::Phrase(phrase.clone()));
            scoring.extend(phrase.words.iter().cloned());
        }
        plan.vetoes = query.excluded.clone();

        let mut seen = HashSet::new();
        for word in scoring {
            if !seen.insert(word.clone()) {
                continue;
            }
            let idf = idf(plan.document_count, self.store.document_frequency(&word)?);
            plan.clauses.push(TermClause { word, idf });
        }
        Ok(plan)
    }

    /// Score every admitted document, best first.
    pub fn execute(&self, plan: &QueryPlan, pids: Option<&[u64]>) -> Result<Vec<(DocId, ResultRow)>> {
        // document -> (clause index, term frequency)
        let mut hits: HashMap<DocId, Vec<(usize, u32)>> = HashMap::new();
        for (index, clause) in plan.clauses.iter().enumerate() {
            for (id, posting) in self.store.postings(&clause.word)? {
                hits.entry(id).or_default().push((index, posting.frequency));
            }
        }

        let mut vetoed = HashSet::new();
        for word in &plan.vetoes {
            vetoed.extend(self.store.postings(word)?.into_iter().map(|(id, _)| id));
        }

        let candidates: Vec<DocId> = if plan.has_positive_terms() {
            hits.keys().copied().filter(|id| !vetoed.contains(id)).collect()
        } else {
            self.store.document_ids(pids)?.into_iter().filter(|id| !vetoed.contains(id)).collect()
        };
        let documents = self.store.documents(&candidates)?;

        let query_length = plan.query_length();
        let mut idf_cache: HashMap<String, f64> =
            plan.clauses.iter().map(|c| (c.word.clone(), c.idf)).collect();
        let mut rows = Vec::new();
        for id in candidates {
            let Some(document) = documents.get(&id) else { continue };
            if let Some(pids) = pids {
                if !pids.contains(&document.pid) {
                    continue;
                }
            }
            let terms = hits.get(&id).map(Vec::as_slice).unwrap_or(&[]);
            let matched: HashSet<&str> = terms.iter().map(|(i, _)| plan.clauses[*i].word.as_str()).collect();
            if !plan.admits(&matched, &document.text) {
                continue;
            }

            let numerator: f64 = terms
                .iter()
                .map(|(i, tf)| log_tf(*tf) * plan.clauses[*i].idf * plan.clauses[*i].idf)
                .sum();
            let relevance = if numerator == 0.0 {
                0.0
            } else {
                let document_length = self.document_length(id, plan.document_count, &mut idf_cache)?;
                if document_length == 0.0 || query_length == 0.0 {
                    0.0
                } else {
                    numerator / (document_length * query_length)
                }
            };
            let matches: BTreeSet<String> = matched.into_iter().map(str::to_string).collect();
            rows.push((id, ResultRow { relevance, matches: matches.into_iter().collect() }));
        }

        rows.sort_by(|a, b| b.1.relevance.total_cmp(&a.1.relevance).then(a.0.cmp(&b.0)));
        Ok(rows)
    }

    fn document_length(&self, id: DocId, document_count: u64, cache: &mut HashMap<String, f64>) -> Result<f64> {
        let mut sum = 0.0;
        for (word, tf) in self.store.document_terms(id)? {
            let idf = match cache.get(&word) {
                Some(idf) => *idf,
                None => {
                    let idf = idf(document_count, self.store.document_frequency(&word)?);
                    cache.insert(word, idf);
                    idf
                }
            };
            let weight = log_tf(tf) * idf;
            sum += weight * weight;
        }
        Ok(sum.sqrt())
    }
}

fn idf(document_count: u64, document_frequency: u32) -> f64 {
    if document_frequency == 0 {
        return 0.0;
    }
    ((document_count as f64 + 1.0) / document_frequency as f64).ln()
}

fn log_tf(tf: u32) -> f64 {
    if tf == 0 {
        0.0
    } else {
        1.0 + (tf as f64).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_shrinks_with_document_frequency() {
        assert!(idf(10, 1) > idf(10, 5));
        assert_eq!(idf(10, 0), 0.0);
        assert!(idf(10, 10) > 0.0);
    }

    #[test]
    fn log_tf_dampens_repetition() {
        assert_eq!(log_tf(0), 0.0);
        assert_eq!(log_tf(1), 1.0);
        assert!(log_tf(10) < 10.0);
    }

    #[test]
    fn or_plan_needs_one_positive_match() {
        let plan = QueryPlan {
            optional: vec![Requirement::Word("a".into()), Requirement::Word("b".into())],
            ..Default::default()
        };
        assert!(plan.admits(&HashSet::from(["b"]), ""));
        assert!(!plan.admits(&HashSet::new(), ""));
    }

    #[test]
    fn veto_only_plan_admits_everything() {
        let plan = QueryPlan { vetoes: vec!["spam".into()], ..Default::default() };
        assert!(plan.admits(&HashSet::new(), "anything"));
    }
}
