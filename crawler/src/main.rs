mod robots;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use reqwest::{header, Client, Url};
use robots::RobotsCache;
use scraper::{Html, Selector};
use sitesearch_core::{Indexer, IndexStore, PageData, SledStore};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl a site and feed every page into the search index, respecting robots.txt")]
struct Cli {
    /// Path to a file with seed URLs (one per line)
    #[arg(long)]
    seeds: String,
    /// Index database directory
    #[arg(long, default_value = "./index")]
    db: String,
    /// Page tree root the crawled pages are filed under
    #[arg(long, default_value_t = 0)]
    pid: u64,
    /// Language used when a page has no <html lang>
    #[arg(long, default_value = "en")]
    language: String,
    /// Maximum number of pages to index
    #[arg(long, default_value_t = 10_000)]
    max_docs: usize,
    /// Maximum pages to crawl per host (politeness)
    #[arg(long, default_value_t = 1_000)]
    max_per_host: usize,
    /// Concurrency (number of workers)
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// User-Agent string to use for robots.txt and crawling
    #[arg(long, default_value = "sitesearch-bot/0.1")]
    user_agent: String,
    /// If true, only follow links that remain on the same host as the page
    #[arg(long, default_value_t = true)]
    same_host_only: bool,
}

/// URLs already scheduled and the number of pages taken from each host.
#[derive(Default)]
struct Seen {
    urls: HashSet<String>,
    per_host: HashMap<String, usize>,
}

impl Seen {
    fn admit(&mut self, url: &Url, max_per_host: usize) -> bool {
        if !self.urls.insert(without_fragment(url)) {
            return false;
        }
        let Some(host) = url.host_str() else { return true };
        let taken = self.per_host.entry(host.to_string()).or_insert(0);
        if *taken >= max_per_host {
            return false;
        }
        *taken += 1;
        true
    }
}

#[derive(Clone)]
struct Selectors {
    html: Selector,
    links: Selector,
}

/// What a worker brings back from one URL.
struct FetchedPage {
    url: String,
    html: String,
    language: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let store = Arc::new(SledStore::open(&args.db).with_context(|| format!("opening index at {}", args.db))?);
    let indexer = Indexer::new(store.clone());

    let client = Client::builder()
        .user_agent(args.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let seeds = fs::read_to_string(&args.seeds).with_context(|| format!("reading seeds from {}", args.seeds))?;
    let mut frontier = parse_seeds(&seeds);
    if frontier.is_empty() {
        return Err(anyhow!("no valid seeds in {}", args.seeds));
    }
    tracing::info!(seeds = frontier.len(), max_docs = args.max_docs, concurrency = args.concurrency, "crawl started");

    let selectors = Selectors {
        html: Selector::parse("html").map_err(|e| anyhow!("invalid selector: {e:?}"))?,
        links: Selector::parse("a[href]").map_err(|e| anyhow!("invalid selector: {e:?}"))?,
    };
    let robots = RobotsCache::default();
    let mut seen = Seen::default();
    let mut inflight: JoinSet<(Option<FetchedPage>, Vec<Url>)> = JoinSet::new();
    let (mut indexed, mut skipped) = (0usize, 0usize);

    while indexed < args.max_docs && (!frontier.is_empty() || !inflight.is_empty()) {
        while inflight.len() < args.concurrency && indexed + inflight.len() < args.max_docs {
            let Some(url) = frontier.pop_front() else { break };
            if seen.admit(&url, args.max_per_host) {
                inflight.spawn(fetch(client.clone(), robots.clone(), selectors.clone(), url));
            }
        }

        let Some(joined) = inflight.join_next().await else { break };
        let (page, links) = match joined {
            Ok(done) => done,
            Err(err) => {
                tracing::warn!(error = %err, "fetch task failed");
                continue;
            }
        };
        let Some(page) = page else { continue };

        let page_host = Url::parse(&page.url).ok().and_then(|u| u.host_str().map(str::to_string));
        for l in links {
            if args.same_host_only && l.host_str().map(str::to_string) != page_host { continue; }
            frontier.push_back(l);
        }

        let data = PageData {
            url: page.url,
            title: String::new(),
            protected: false,
            groups: Vec::new(),
            pid: args.pid,
            language: page.language.unwrap_or_else(|| args.language.clone()),
            content: page.html,
        };
        // sled writes block the calling thread
        match tokio::task::block_in_place(|| indexer.index_page(&data)) {
            Ok(true) => indexed += 1,
            Ok(false) => skipped += 1,
            Err(err) => tracing::error!(url = %data.url, error = %err, "indexing failed"),
        }
        let processed = indexed + skipped;
        if processed > 0 && processed % 100 == 0 {
            tracing::info!(indexed, skipped, visited = seen.urls.len(), frontier = frontier.len(), "progress");
        }
    }

    inflight.abort_all();
    store.flush()?;
    tracing::info!(indexed, skipped, visited = seen.urls.len(), frontier = frontier.len(), db = %args.db, "crawl done");
    Ok(())
}

async fn fetch(client: Client, robots: RobotsCache, selectors: Selectors, url: Url) -> (Option<FetchedPage>, Vec<Url>) {
    let Some(rules) = robots.rules_for(&client, &url).await else { return (None, vec![]) };
    if !rules.allows(url.path()) {
        tracing::debug!(%url, "disallowed by robots.txt");
        return (None, vec![]);
    }
    if let Some(delay) = rules.crawl_delay {
        sleep(delay).await;
    }

    let resp = match client.get(url.clone()).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        _ => return (None, vec![]),
    };
    if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
        if let Ok(v) = ct.to_str() { if !v.starts_with("text/html") { return (None, vec![]); } }
    }
    let bytes = match resp.bytes().await { Ok(b) => b, Err(_) => return (None, vec![]) };
    if bytes.len() > 2 * 1024 * 1024 { return (None, vec![]); }
    let body = String::from_utf8_lossy(&bytes).to_string();

    let (language, links) = parse_page(&body, &url, &selectors);
    (Some(FetchedPage { url: without_fragment(&url), html: body, language }), links)
}

/// One URL per line; `#` starts a comment and bare hosts get `https://`.
fn parse_seeds(text: &str) -> VecDeque<Url> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| Url::parse(line).or_else(|_| Url::parse(&format!("https://{line}"))).ok())
        .collect()
}

/// `<html lang>` and the absolute http(s) links of a page.
fn parse_page(body: &str, url: &Url, selectors: &Selectors) -> (Option<String>, Vec<Url>) {
    let doc = Html::parse_document(body);
    let language = doc
        .select(&selectors.html)
        .next()
        .and_then(|n| n.value().attr("lang"))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    let mut links = Vec::new();
    for a in doc.select(&selectors.links) {
        if a.value().attr("rel").is_some_and(|r| r.contains("nofollow")) { continue; }
        if let Some(h) = a.value().attr("href") {
            if let Ok(u) = Url::parse(h).or_else(|_| url.join(h)) {
                if u.scheme().starts_with("http") { links.push(u); }
            }
        }
    }
    (language, links)
}

fn without_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_skip_comments_and_default_to_https() {
        let seeds = parse_seeds("# sites\nexample.com\n\nhttp://docs.example.org/start\n");
        let urls: Vec<String> = seeds.iter().map(Url::to_string).collect();
        assert_eq!(urls, vec!["https://example.com/", "http://docs.example.org/start"]);
    }

    #[test]
    fn hosts_are_capped_and_urls_seen_once() {
        let mut seen = Seen::default();
        let a = Url::parse("https://example.com/a#top").unwrap();
        let b = Url::parse("https://example.com/b").unwrap();
        assert!(seen.admit(&a, 1));
        assert!(!seen.admit(&Url::parse("https://example.com/a").unwrap(), 1));
        assert!(!seen.admit(&b, 1));
    }

    #[test]
    fn page_language_and_links() {
        let selectors = Selectors {
            html: Selector::parse("html").unwrap(),
            links: Selector::parse("a[href]").unwrap(),
        };
        let base = Url::parse("https://example.com/dir/page").unwrap();
        let body = r#"<html lang="de"><body><a href="other">x</a><a href="mailto:a@b">m</a><a rel="nofollow" href="/skip">s</a></body></html>"#;
        let (language, links) = parse_page(body, &base, &selectors);
        assert_eq!(language.as_deref(), Some("de"));
        assert_eq!(links, vec![Url::parse("https://example.com/dir/other").unwrap()]);
    }
}
