use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use checkon_core::{CoreError, ProjectUrl};
use reqwest::Client;
use serde::Deserialize;

pub const ENV_LIBRARIESIO_API_KEY: &str = "CHECKON_LIBRARIESIO_API_KEY";

const MAX_PAGE_SIZE: u32 = 100;

/// Where the list of projects to test comes from.
#[async_trait]
pub trait DependentsSource: Send + Sync {
    async fn dependents(&self) -> Result<Vec<ProjectUrl>, CoreError>;
}

pub struct LiteralDependents {
    urls: Vec<ProjectUrl>,
}

impl LiteralDependents {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(ProjectUrl::new).collect(),
        }
    }
}

#[async_trait]
impl DependentsSource for LiteralDependents {
    async fn dependents(&self) -> Result<Vec<ProjectUrl>, CoreError> {
        Ok(self.urls.clone())
    }
}

/// One URL per line; surrounding whitespace and blank lines are ignored.
pub struct FileDependents {
    path: PathBuf,
}

impl FileDependents {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DependentsSource for FileDependents {
    async fn dependents(&self) -> Result<Vec<ProjectUrl>, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|error| {
            CoreError::Configuration(format!(
                "failed to read dependents file '{}': {error}",
                self.path.display()
            ))
        })?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ProjectUrl::from)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct DependentEntry {
    #[serde(default)]
    repository_url: Option<String>,
}

/// Extracts the repository URLs from one page of the libraries.io dependents
/// endpoint, skipping packages without one.
///
/// Returns the page size alongside so callers can detect the last page.
pub fn parse_dependents_page(body: &str) -> Result<(usize, Vec<ProjectUrl>), CoreError> {
    let entries: Vec<DependentEntry> = serde_json::from_str(body).map_err(|error| {
        CoreError::DependencyUnavailable(format!(
            "libraries.io response was malformed JSON: {error}"
        ))
    })?;
    let urls = entries
        .iter()
        .filter_map(|entry| entry.repository_url.as_deref())
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ProjectUrl::from)
        .collect();
    Ok((entries.len(), urls))
}

/// Dependents of a PyPI package, as reported by libraries.io.
pub struct LibrariesIoDependents {
    client: Client,
    api_url: String,
    api_key: String,
    package: String,
    limit: u32,
}

impl LibrariesIoDependents {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        package: impl Into<String>,
        limit: u32,
        request_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CoreError::Configuration(format!(
                "a libraries.io API key is required; pass --api-key or set {ENV_LIBRARIESIO_API_KEY}."
            )));
        }
        let package = package.into();
        if package.trim().is_empty() {
            return Err(CoreError::Configuration(
                "a package name is required to query libraries.io.".to_owned(),
            ));
        }
        if limit == 0 {
            return Err(CoreError::Configuration(
                "dependents limit must be greater than zero.".to_owned(),
            ));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                CoreError::Configuration(format!(
                    "failed to build libraries.io HTTP client: {error}"
                ))
            })?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
            package: package.trim().to_owned(),
            limit,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        format!("{base}/pypi/{}/dependents", self.package)
    }

    fn page_size(&self) -> u32 {
        self.limit.min(MAX_PAGE_SIZE)
    }

    async fn fetch_page(&self, page: u32) -> Result<String, CoreError> {
        let per_page = self.page_size().to_string();
        let page = page.to_string();
        let response = self
            .client
            .get(self.endpoint())
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ])
            .send()
            .await
            .map_err(|error| {
                CoreError::DependencyUnavailable(format!("libraries.io request failed: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            CoreError::DependencyUnavailable(format!("libraries.io response read failed: {error}"))
        })?;

        if !status.is_success() {
            return Err(CoreError::DependencyUnavailable(format!(
                "libraries.io request failed with status {status}: {body}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl DependentsSource for LibrariesIoDependents {
    async fn dependents(&self) -> Result<Vec<ProjectUrl>, CoreError> {
        let mut collector =
            DependentsCollector::new(self.limit as usize, self.page_size() as usize);
        let mut page = 1;
        loop {
            let body = self.fetch_page(page).await?;
            let (page_len, urls) = parse_dependents_page(&body)?;
            tracing::debug!(
                package = %self.package,
                page,
                page_len,
                with_repository = urls.len(),
                "fetched dependents page"
            );
            if !collector.accept(page_len, urls) {
                break;
            }
            page += 1;
        }
        let urls = collector.finish();
        tracing::info!(package = %self.package, dependents = urls.len(), "resolved dependents");
        Ok(urls)
    }
}

/// Accumulates unique URLs across pages and decides when to stop paging.
struct DependentsCollector {
    limit: usize,
    page_size: usize,
    seen: HashSet<ProjectUrl>,
    urls: Vec<ProjectUrl>,
}

impl DependentsCollector {
    fn new(limit: usize, page_size: usize) -> Self {
        Self {
            limit,
            page_size,
            seen: HashSet::new(),
            urls: Vec::new(),
        }
    }

    /// Returns whether another page should be requested.
    fn accept(&mut self, page_len: usize, urls: Vec<ProjectUrl>) -> bool {
        for url in urls {
            if self.urls.len() == self.limit {
                break;
            }
            if self.seen.insert(url.clone()) {
                self.urls.push(url);
            }
        }
        page_len == self.page_size && page_len > 0 && self.urls.len() < self.limit
    }

    fn finish(self) -> Vec<ProjectUrl> {
        self.urls
    }
}
