//! Site search: page text extraction, an inverted word index and ranked queries over it.
//!
//! Pages go through [`extract`](extract::extract) and the [`tokenizer`] into an [`IndexStore`]
//! via the [`Indexer`]; queries are parsed, planned and ranked by the [`Searcher`] and come back
//! as a lazily hydrated [`SearchResult`].

pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod persist;
pub mod query;
pub mod result;
pub mod search;
pub mod tokenizer;
pub mod writer;

pub use config::SearchConfig;
pub use error::{Error, Result};
pub use index::{DocId, DocumentRecord, IndexStats, IndexStore, Posting};
pub use persist::SledStore;
pub use query::{LikePattern, ParsedQuery};
pub use result::{ResultRow, SearchHit, SearchResult};
pub use search::{QueryPlan, SearchRequest, Searcher};
pub use writer::{HookOutcome, IndexHook, Indexer, PageData};
