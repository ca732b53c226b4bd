//! Grounding context from ranked search results

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Snippet length kept per result, in characters
const SNIPPET_CHARS: usize = 500;

/// One ranked search result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub published_date: Option<String>,
}

/// Rendered sources plus the URLs their `[n]` markers refer to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grounding {
    pub context: String,
    /// `urls[n - 1]` is the target of citation `[n]`
    pub urls: Vec<String>,
}

/// Render the first `count` results as numbered source lines.
///
/// Each line reads `[n] domain (date): title: snippet`; the date part is
/// omitted when unknown.
pub fn build_grounding(results: &[SearchResult], count: usize) -> Grounding {
    let mut lines = Vec::new();
    let mut urls = Vec::new();

    for (i, result) in results.iter().take(count).enumerate() {
        let date = result
            .published_date
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        let snippet: String = result.content.chars().take(SNIPPET_CHARS).collect();
        lines.push(format!(
            "[{}] {}{}: {}: {}",
            i + 1,
            domain(&result.url),
            date,
            result.title,
            snippet
        ));
        urls.push(result.url.clone());
    }

    Grounding {
        context: lines.join("\n"),
        urls,
    }
}

/// Host and port of a URL, empty when it does not parse
fn domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}
