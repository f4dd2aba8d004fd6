//! The example snippet catalogue: fetching, retrying and parsing.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sanitize::escape_for_display;

/// Catalogue shipped with the crate.
pub const BUILTIN_CATALOGUE: &str = include_str!("../assets/examples.md");

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^##[ \t]+(.*)$").unwrap());
static BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A\s*```mermaid[ \t]*\r?\n(.*?)```").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleSnippet {
    pub title: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("failed to fetch examples after {attempts} attempts: {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("no examples found in catalogue")]
    Empty,
}

#[async_trait]
pub trait CatalogueSource: Send + Sync {
    async fn fetch(&self) -> io::Result<String>;

    fn describe(&self) -> String;
}

/// Reads the catalogue from a file on every fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogueSource for FileSource {
    async fn fetch(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serves a fixed catalogue body.
#[derive(Debug, Clone)]
pub struct StaticSource {
    body: String,
}

impl StaticSource {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_CATALOGUE)
    }
}

#[async_trait]
impl CatalogueSource for StaticSource {
    async fn fetch(&self) -> io::Result<String> {
        Ok(self.body.clone())
    }

    fn describe(&self) -> String {
        "built-in catalogue".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Attempt `n` (1-based) waits `backoff * n` before the next try.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct ExamplesStore {
    source: Box<dyn CatalogueSource>,
    retry: RetryPolicy,
}

impl ExamplesStore {
    pub fn new(source: Box<dyn CatalogueSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    pub async fn load(&self) -> Result<Vec<ExampleSnippet>, CatalogueError> {
        let body = self.fetch_with_retry().await?;
        let snippets = parse_catalogue(&body);
        if snippets.is_empty() {
            return Err(CatalogueError::Empty);
        }
        debug!(count = snippets.len(), "loaded examples");
        Ok(snippets)
    }

    async fn fetch_with_retry(&self) -> Result<String, CatalogueError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.fetch().await {
                Ok(body) => return Ok(body),
                Err(source) if attempt >= attempts => {
                    return Err(CatalogueError::Fetch { attempts, source });
                }
                Err(err) => {
                    warn!(
                        source = %self.source.describe(),
                        attempt,
                        %err,
                        "examples fetch failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Parses `## title` headings each followed by a ```` ```mermaid ```` block.
///
/// Sections without a mermaid block, with an empty title or with empty code
/// are skipped.
pub fn parse_catalogue(input: &str) -> Vec<ExampleSnippet> {
    let headings: Vec<_> = HEADING_RE.captures_iter(input).collect();
    let mut snippets = Vec::new();
    for (idx, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(title)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headings
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(input.len(), |m| m.start());
        let title = title.as_str().trim();
        let section = &input[whole.end()..end];
        let code = BLOCK_RE
            .captures(section)
            .and_then(|block| block.get(1))
            .map(|code| code.as_str().trim_end());

        match code {
            Some(code) if !title.is_empty() && !code.trim().is_empty() => {
                snippets.push(ExampleSnippet {
                    title: title.to_string(),
                    code: code.to_string(),
                });
            }
            _ => warn!(%title, "skipping malformed catalogue entry"),
        }
    }
    snippets
}

/// Builds picker entries. Titles are escaped; code never enters markup.
pub fn picker_markup(snippets: &[ExampleSnippet]) -> String {
    let mut out = String::new();
    for (idx, snippet) in snippets.iter().enumerate() {
        out.push_str(&format!(
            "<option value=\"{idx}\">{}</option>",
            escape_for_display(&snippet.title)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TWO_ENTRIES: &str = "# Examples\n\n## Flow\n```mermaid\ngraph TD\n A-->B\n```\n\n## Sequence\n```mermaid\nsequenceDiagram\n  A->>B: hi\n```\n";

    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        body: String,
    }

    #[async_trait]
    impl CatalogueSource for FlakySource {
        async fn fetch(&self) -> io::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "offline"));
            }
            Ok(self.body.clone())
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn parses_entries_in_document_order() {
        let snippets = parse_catalogue(TWO_ENTRIES);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].title, "Flow");
        assert_eq!(snippets[0].code, "graph TD\n A-->B");
        assert_eq!(snippets[1].title, "Sequence");
    }

    #[test]
    fn skips_malformed_entries() {
        let input = "## No block\njust text\n\n## Wrong language\n```js\nx()\n```\n\n## Empty\n```mermaid\n```\n\n## Good\n```mermaid\npie\n \"a\": 1\n```\n";
        let snippets = parse_catalogue(input);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Good");
    }

    #[test]
    fn allows_duplicate_titles() {
        let input = "## Same\n```mermaid\ngraph LR\n A-->B\n```\n## Same\n```mermaid\ngraph LR\n C-->D\n```\n";
        let snippets = parse_catalogue(input);
        assert_eq!(snippets.len(), 2);
        assert_ne!(snippets[0].code, snippets[1].code);
    }

    #[test]
    fn builtin_catalogue_parses() {
        assert!(parse_catalogue(BUILTIN_CATALOGUE).len() >= 3);
    }

    #[test]
    fn picker_escapes_titles() {
        let markup = picker_markup(&[ExampleSnippet {
            title: "<b>A & B</b>".to_string(),
            code: "graph TD\n A-->B".to_string(),
        }]);
        assert_eq!(
            markup,
            "<option value=\"0\">&lt;b&gt;A &amp; B&lt;&#x2F;b&gt;</option>"
        );
    }

    #[tokio::test]
    async fn retries_until_fetch_succeeds() {
        let source = FlakySource {
            failures: 2,
            calls: AtomicU32::new(0),
            body: TWO_ENTRIES.to_string(),
        };
        let store = ExamplesStore::new(Box::new(source), no_wait(3));
        let snippets = store.load().await.unwrap();
        assert_eq!(snippets, parse_catalogue(TWO_ENTRIES));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let source = FlakySource {
            failures: 5,
            calls: AtomicU32::new(0),
            body: TWO_ENTRIES.to_string(),
        };
        let store = ExamplesStore::new(Box::new(source), no_wait(3));
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, CatalogueError::Fetch { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn empty_catalogue_is_reported() {
        let store = ExamplesStore::new(Box::new(StaticSource::new("# nothing here\n")), no_wait(1));
        assert!(matches!(store.load().await, Err(CatalogueError::Empty)));
    }
}
