//! robots.txt rules for the `*` user agent, cached per host.

use parking_lot::RwLock;
use reqwest::{header, Client, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_CRAWL_DELAY_SECS: f64 = 60.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Robots {
    pub allows: Vec<String>,
    pub disallows: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

impl Robots {
    pub fn parse(txt: &str) -> Self {
        let mut robots = Robots::default();
        let mut in_wildcard_group = false;
        for line in txt.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else { continue };
            let value = value.trim();
            match field.trim().to_ascii_lowercase().as_str() {
                "user-agent" => in_wildcard_group = value == "*",
                _ if !in_wildcard_group => {}
                "allow" => robots.allows.push(value.to_string()),
                // an empty Disallow permits everything
                "disallow" if !value.is_empty() => robots.disallows.push(value.to_string()),
                "crawl-delay" => {
                    robots.crawl_delay = value
                        .parse::<f64>()
                        .ok()
                        .filter(|secs| secs.is_finite() && *secs >= 0.0)
                        .map(|secs| Duration::from_secs_f64(secs.min(MAX_CRAWL_DELAY_SECS)));
                }
                _ => {}
            }
        }
        robots
    }

    /// Longest matching rule decides; Allow wins a tie.
    pub fn allows(&self, path: &str) -> bool {
        let longest = |rules: &[String]| rules.iter().filter(|r| path.starts_with(r.as_str())).map(String::len).max();
        match (longest(&self.allows), longest(&self.disallows)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }
}

#[derive(Clone, Default)]
pub struct RobotsCache {
    hosts: Arc<RwLock<HashMap<String, Robots>>>,
}

impl RobotsCache {
    /// Rules for the host of `url`, fetched once per host. An unreachable robots.txt allows everything.
    pub async fn rules_for(&self, client: &Client, url: &Url) -> Option<Robots> {
        let host = url.host_str()?;
        let cached = self.hosts.read().get(host).cloned();
        if cached.is_some() {
            return cached;
        }
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        let body = match client.get(&robots_url).header(header::ACCEPT, "text/plain").send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            _ => String::new(),
        };
        let rules = Robots::parse(&body);
        tracing::debug!(%host, disallows = rules.disallows.len(), "robots.txt loaded");
        self.hosts.write().insert(host.to_string(), rules.clone());
        Some(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_for_the_wildcard_group() {
        let robots = Robots::parse("User-agent: other\nDisallow: /\n\nUser-agent: *\nDisallow: /private\nAllow: /private/open\nCrawl-delay: 0.5\n");
        assert_eq!(robots.disallows, vec!["/private"]);
        assert_eq!(robots.crawl_delay, Some(Duration::from_millis(500)));
        assert!(robots.allows("/"));
        assert!(!robots.allows("/private/x"));
        assert!(robots.allows("/private/open/x"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let robots = Robots::parse("User-agent: *\nDisallow:\n");
        assert!(robots.allows("/anything"));
    }

    #[test]
    fn missing_robots_file_allows_everything() {
        assert!(Robots::parse("").allows("/x"));
    }
}
