//! Source and dataset catalog
//!
//! Descriptors are plain data. [`make_pipeline`](crate::pipeline::make_pipeline)
//! turns a descriptor into a runnable pipeline.

use crate::config::RunConfig;
use crate::params::QueryTemplate;
use tracing::debug;

/// How a source's datasets are ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineKind {
    /// Paginated JSON over HTTP GET
    #[default]
    RestApi,
}

/// One ingestible endpoint of a source
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
    pub name: String,
    /// Path relative to the source base URL
    pub endpoint: String,
    /// Dataset whose table drives parameter expansion
    pub dependency: Option<String>,
    pub query_params: QueryTemplate,
    /// Whether the endpoint is expected to paginate. The schema description
    /// decides at runtime.
    pub pagination: bool,
}

impl DatasetDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            dependency: None,
            query_params: QueryTemplate::new(),
            pagination: false,
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn with_query_params(mut self, query_params: QueryTemplate) -> Self {
        self.query_params = query_params;
        self
    }

    pub fn with_pagination(mut self, pagination: bool) -> Self {
        self.pagination = pagination;
        self
    }
}

/// One external API provider
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub kind: PipelineKind,
    /// Header set in the source configuration sent with every request
    pub header_set: String,
    pub datasets: Vec<DatasetDescriptor>,
    pub dependency: Option<String>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, header_set: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PipelineKind::RestApi,
            header_set: header_set.into(),
            datasets: Vec::new(),
            dependency: None,
        }
    }

    pub fn with_dataset(mut self, dataset: DatasetDescriptor) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetDescriptor> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

/// Intervals offered by the Yahoo Finance history endpoint
pub const HISTORY_INTERVALS: [&str; 8] = ["1m", "5m", "15m", "30m", "1d", "1wk", "1mo", "3mo"];

/// Sources known to this build
pub fn builtin_catalog() -> Vec<SourceDescriptor> {
    let mut yahoo = SourceDescriptor::new("rapid_yahoo", "rapidapi").with_dataset(
        DatasetDescriptor::new("tickers", "v2/markets/tickers")
            .with_query_params(QueryTemplate::from_pairs([("type", "STOCKS")])),
    );

    for interval in HISTORY_INTERVALS {
        yahoo = yahoo.with_dataset(
            DatasetDescriptor::new(format!("history_{}", interval), "v1/markets/stock/history")
                .with_dependency("tickers")
                .with_query_params(QueryTemplate::from_pairs([
                    ("symbol", "{symbol}"),
                    ("interval", interval),
                ])),
        );
    }

    vec![yahoo]
}

/// Keep enabled sources, and within them only enabled datasets.
pub fn filter_sources(sources: Vec<SourceDescriptor>, config: &RunConfig) -> Vec<SourceDescriptor> {
    sources
        .into_iter()
        .filter(|source| config.source_enabled(&source.name))
        .map(|mut source| {
            let name = source.name.clone();
            source
                .datasets
                .retain(|dataset| config.dataset_enabled(&name, &dataset.name));
            debug!(source = %name, datasets = source.datasets.len(), "Source enabled");
            source
        })
        .collect()
}

/// Narrow sources to a `<source>.<dataset>` selector.
///
/// A selector without a dot leaves the sources unchanged.
pub fn filter_datasets(sources: Vec<SourceDescriptor>, selector: &str) -> Vec<SourceDescriptor> {
    let Some((source_name, dataset_name)) = selector.split_once('.') else {
        return sources;
    };

    sources
        .into_iter()
        .filter(|source| source.name == source_name)
        .filter_map(|mut source| {
            source.datasets.retain(|dataset| dataset.name == dataset_name);
            (!source.datasets.is_empty()).then_some(source)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::QueryValue;

    fn run_config(yaml: &str) -> RunConfig {
        RunConfig::parse(yaml).unwrap()
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.len(), 1);

        let yahoo = &catalog[0];
        assert_eq!(yahoo.name, "rapid_yahoo");
        assert_eq!(yahoo.datasets.len(), 1 + HISTORY_INTERVALS.len());

        let tickers = yahoo.dataset("tickers").unwrap();
        assert_eq!(tickers.dependency, None);
        assert!(!tickers.query_params.has_placeholders());

        let history = yahoo.dataset("history_1wk").unwrap();
        assert_eq!(history.dependency.as_deref(), Some("tickers"));
        assert_eq!(history.endpoint, "v1/markets/stock/history");
        assert_eq!(
            history.query_params.entries()[0].1,
            QueryValue::Placeholder("symbol".into())
        );
    }

    #[test]
    fn test_filter_sources_by_enabled_flags() {
        let config = run_config(
            r#"
sources:
  rapid_yahoo:
    enabled: true
    datasets:
      tickers: {enabled: true}
      history_1d: {enabled: true}
      history_1m: {enabled: false}
"#,
        );

        let sources = filter_sources(builtin_catalog(), &config);
        assert_eq!(sources.len(), 1);
        let names: Vec<&str> = sources[0].datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["tickers", "history_1d"]);
    }

    #[test]
    fn test_disabled_source_is_dropped() {
        let config = run_config("sources:\n  rapid_yahoo:\n    enabled: false\n");
        assert!(filter_sources(builtin_catalog(), &config).is_empty());
        assert!(filter_sources(builtin_catalog(), &RunConfig::default()).is_empty());
    }

    #[test]
    fn test_filter_datasets_selector() {
        let sources = builtin_catalog();

        let selected = filter_datasets(sources.clone(), "rapid_yahoo.tickers");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].datasets.len(), 1);
        assert_eq!(selected[0].datasets[0].name, "tickers");

        assert!(filter_datasets(sources.clone(), "rapid_yahoo.unknown").is_empty());
        assert!(filter_datasets(sources.clone(), "other.tickers").is_empty());
        assert_eq!(filter_datasets(sources.clone(), "rapid_yahoo"), sources);
    }
}
