use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sitesearch_core::{Indexer, IndexStore, PageData, SearchConfig, SearchRequest, Searcher, SledStore};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// One line of a `.jsonl` page dump. Missing fields fall back to the command line defaults.
#[derive(Debug, Deserialize)]
struct PageDump {
    url: String,
    #[serde(default)]
    title: String,
    content: String,
    language: Option<String>,
    pid: Option<u64>,
    protected: Option<bool>,
    groups: Option<Vec<u64>>,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Maintain the site search index", long_about = None)]
struct Cli {
    /// Index database directory
    #[arg(long, global = true, default_value = "./index")]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index rendered pages from a directory of .html files or .jsonl page dumps
    Index {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Page tree root the pages belong to
        #[arg(long, default_value_t = 0)]
        pid: u64,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value_t = false)]
        protected: bool,
        /// Comma separated member group ids
        #[arg(long, value_delimiter = ',')]
        groups: Vec<u64>,
    },
    /// Remove the entry indexed under a URL
    Remove {
        #[arg(long)]
        url: String,
    },
    /// Delete every document and posting
    Purge,
    /// Print document, word and posting counts
    Stats,
    /// Run a query against the index
    Query {
        #[arg(long)]
        q: String,
        /// Optional JSON file with search defaults
        #[arg(long)]
        config: Option<String>,
        #[arg(long = "or", default_value_t = false)]
        or_search: bool,
        #[arg(long, default_value_t = false)]
        fuzzy: bool,
        #[arg(long)]
        pid: Vec<u64>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Locale used to split the query words
        #[arg(long)]
        locale: Option<String>,
        /// Ignore query words shorter than this
        #[arg(long)]
        min_length: Option<usize>,
    },
}

struct Defaults {
    pid: u64,
    language: String,
    protected: bool,
    groups: Vec<u64>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let store = Arc::new(SledStore::open(&cli.db).with_context(|| format!("opening index at {}", cli.db))?);

    match cli.command {
        Commands::Index { input, pid, language, protected, groups } => {
            let defaults = Defaults { pid, language, protected, groups };
            index_input(&Indexer::new(store.clone()), &input, &defaults)?;
        }
        Commands::Remove { url } => {
            let removed = Indexer::new(store.clone()).remove_entry(&url)?;
            println!("{}", if removed { "removed" } else { "not indexed" });
        }
        Commands::Purge => Indexer::new(store.clone()).purge()?,
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        Commands::Query { q, config, or_search, fuzzy, pid, limit, locale, min_length } => {
            let config = match config {
                Some(path) => SearchConfig::load(&path).with_context(|| format!("loading {path}"))?,
                None => SearchConfig::default(),
            };
            let mut request = SearchRequest::from_config(q, &config).with_limit(limit);
            request.or_search |= or_search;
            request.fuzzy |= fuzzy;
            if !pid.is_empty() {
                request = request.with_pids(pid);
            }
            if let Some(locale) = locale {
                request = request.with_locale(locale);
            }
            if let Some(min_length) = min_length {
                request = request.with_min_length(min_length);
            }
            let result = Searcher::new(store.clone()).search(&request)?;
            for hit in result.results(0, 0)? {
                println!("{:.4}\t{}\t{}\t[{}]", hit.relevance, hit.document.url, hit.document.title, hit.highlights.join(", "));
            }
        }
    }
    store.flush()?;
    Ok(())
}

fn index_input(indexer: &Indexer, input: &str, defaults: &Defaults) -> Result<()> {
    let input_path = Path::new(input);
    let mut written = 0usize;
    let mut skipped = 0usize;
    let mut tally = |indexed: bool| if indexed { written += 1 } else { skipped += 1 };

    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if !p.is_file() {
                continue;
            }
            match p.extension().and_then(|s| s.to_str()) {
                Some("html" | "htm") => tally(index_html(indexer, input_path, p, defaults)?),
                Some("jsonl") => index_jsonl(indexer, p, defaults, &mut tally)?,
                _ => {}
            }
        }
    } else if input_path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        index_jsonl(indexer, input_path, defaults, &mut tally)?;
    } else if input_path.is_file() {
        let root = input_path.parent().unwrap_or(Path::new(""));
        tally(index_html(indexer, root, input_path, defaults)?);
    }

    tracing::info!(written, skipped, "indexing complete");
    Ok(())
}

fn index_html(indexer: &Indexer, root: &Path, file: &Path, defaults: &Defaults) -> Result<bool> {
    let content = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let relative = file.strip_prefix(root).unwrap_or(file);
    let url = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
    let page = PageData {
        url,
        title: String::new(),
        protected: defaults.protected,
        groups: defaults.groups.clone(),
        pid: defaults.pid,
        language: defaults.language.clone(),
        content,
    };
    Ok(indexer.index_page(&page)?)
}

fn index_jsonl(indexer: &Indexer, file: &Path, defaults: &Defaults, tally: &mut impl FnMut(bool)) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let dump: PageDump = serde_json::from_str(&line)?;
        let page = PageData {
            url: dump.url,
            title: dump.title,
            protected: dump.protected.unwrap_or(defaults.protected),
            groups: dump.groups.unwrap_or_else(|| defaults.groups.clone()),
            pid: dump.pid.unwrap_or(defaults.pid),
            language: dump.language.unwrap_or_else(|| defaults.language.clone()),
            content: dump.content,
        };
        tally(indexer.index_page(&page)?);
    }
    Ok(())
}
