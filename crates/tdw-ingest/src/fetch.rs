//! Paginated HTTP fetching
//!
//! One [`PaginatingFetcher`] serves one dataset endpoint. For every
//! [`ParameterSet`] it walks pages starting at 1 until a page normalizes to
//! no rows or `maxPages` is exceeded. Non-paginated datasets are fetched once.

use crate::error::{IngestError, Result};
use crate::normalize::normalize;
use crate::params::ParameterSet;
use crate::record::Record;
use crate::schema::PaginationSpec;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Query parameter carrying the page number
pub const PAGE_PARAM: &str = "page";

/// Connection settings shared by every dataset of a source
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `<base_url>/<endpoint>` with exactly one slash between them
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| IngestError::config(format!("Invalid endpoint URL '{}': {}", joined, e)))
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| IngestError::config(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| IngestError::config(format!("Invalid value for header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Records fetched for one parameter set
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBatch {
    pub params: ParameterSet,
    pub records: Vec<Record>,
    /// HTTP requests issued for this parameter set
    pub requests: u32,
}

impl FetchedBatch {
    /// Records with the parameter set's dependency bindings written into them
    pub fn into_bound_records(self) -> Vec<Record> {
        let bindings = self.params.bindings();
        self.records
            .into_iter()
            .map(|mut record| {
                for (column, value) in bindings {
                    record.insert(column.clone(), value.clone());
                }
                record
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Fetching { page: u32 },
    Done,
}

/// Fetches one endpoint across parameter sets and pages
pub struct PaginatingFetcher {
    client: Client,
    url: Url,
    response_path: String,
    pagination: PaginationSpec,
}

impl PaginatingFetcher {
    pub fn new(
        settings: &HttpSettings,
        endpoint: &str,
        response_path: impl Into<String>,
        pagination: PaginationSpec,
    ) -> Result<Self> {
        let url = settings.endpoint_url(endpoint)?;

        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(settings.header_map()?)
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            response_path: response_path.into(),
            pagination,
        })
    }

    /// Fetch every parameter set in order and concatenate the bound records.
    pub async fn fetch_all(&self, sets: &[ParameterSet]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for set in sets {
            let batch = self.fetch(set).await?;
            records.extend(batch.into_bound_records());
        }

        info!(
            url = %self.url,
            parameter_sets = sets.len(),
            rows = records.len(),
            "Fetched dataset"
        );

        Ok(records)
    }

    /// Fetch all pages for a single parameter set.
    pub async fn fetch(&self, set: &ParameterSet) -> Result<FetchedBatch> {
        if !self.pagination.enabled {
            let records = normalize(&self.fetch_page(set, None).await?);
            debug!(url = %self.url, rows = records.len(), "Fetched unpaginated response");
            return Ok(FetchedBatch {
                params: set.clone(),
                records,
                requests: 1,
            });
        }

        let mut records = Vec::new();
        let mut requests = 0;
        let mut state = PageState::Fetching { page: 1 };

        while let PageState::Fetching { page } = state {
            if self.pagination.max_pages.is_some_and(|max| page > max) {
                debug!(url = %self.url, page, "Reached maxPages");
                state = PageState::Done;
                continue;
            }

            let payload = self.fetch_page(set, Some(page)).await?;
            requests += 1;

            let batch = normalize(&payload);
            state = if batch.is_empty() {
                debug!(url = %self.url, page, "Empty page, pagination finished");
                PageState::Done
            } else {
                debug!(url = %self.url, page, rows = batch.len(), "Fetched page");
                records.extend(batch);
                PageState::Fetching { page: page + 1 }
            };
        }

        Ok(FetchedBatch {
            params: set.clone(),
            records,
            requests,
        })
    }

    /// Issue one GET and return the value at the response path.
    ///
    /// A missing response path key yields `null`, which normalizes to no rows.
    async fn fetch_page(&self, set: &ParameterSet, page: Option<u32>) -> Result<Value> {
        let page_label = page.unwrap_or(1);

        let mut query: Vec<(&str, String)> = set
            .params()
            .iter()
            .filter(|(key, _)| page.is_none() || key != PAGE_PARAM)
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        if let Some(page) = page {
            query.push((PAGE_PARAM, page.to_string()));
        }

        let response = self
            .client
            .get(self.url.clone())
            .query(&query)
            .send()
            .await
            .map_err(|e| IngestError::fetch(self.url.as_str(), page_label, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::fetch(self.url.as_str(), page_label, e.to_string()))?;

        if !status.is_success() {
            return Err(IngestError::fetch_with_body(
                self.url.as_str(),
                page_label,
                format!("Request failed with status {}", status),
                body,
            ));
        }

        let mut document: Value = serde_json::from_str(&body).map_err(|e| {
            IngestError::fetch_with_body(
                self.url.as_str(),
                page_label,
                format!("Response is not valid JSON: {}", e),
                body.clone(),
            )
        })?;

        Ok(document
            .get_mut(&self.response_path)
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}
