use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use crate::feed::{DestinationId, Publication, Source};
use crate::storage::DestinationRepository;
use crate::Result;

/// Where destination filter sets come from
#[async_trait]
pub trait FilterLookup: Send + Sync {
    async fn filters(&self, destination_id: &str) -> Result<BTreeSet<String>>;
}

#[async_trait]
impl FilterLookup for DestinationRepository<'_> {
    async fn filters(&self, destination_id: &str) -> Result<BTreeSet<String>> {
        self.get_filters(destination_id).await
    }
}

/// A publication headed for one destination
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub publication: Publication,
    /// Filters that let the publication through; empty when the destination has none
    pub matched_filters: Vec<String>,
}

/// Destination id to publications, each list ascending by `published_at`
pub type RoutingMap = BTreeMap<DestinationId, Vec<Routed>>;

/// Compiled whole-word, case-insensitive keyword filters.
///
/// A keyword also matches its plural form, so `cat` lets "Cats everywhere"
/// through while `dog` does not match "Dogmatic".
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    patterns: Vec<(String, Regex)>,
}

impl FilterSet {
    pub fn compile(filters: &BTreeSet<String>) -> Self {
        let patterns = filters
            .iter()
            .filter_map(|name| {
                let pattern = format!(r"(?i)\b{}(?:s|es)?\b", regex::escape(name.trim()));
                match Regex::new(&pattern) {
                    Ok(regex) => Some((name.clone(), regex)),
                    Err(e) => {
                        tracing::warn!(filter = %name, "Skipping invalid filter: {}", e);
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Names of the filters matching the publication's title or summary
    pub fn matches(&self, publication: &Publication) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, regex)| {
                regex.is_match(&publication.title) || regex.is_match(&publication.summary)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Fan publications out to their sources' destinations.
///
/// Filter sets are looked up once per destination for the whole run. A
/// destination whose filters cannot be loaded is skipped for this run.
pub async fn route(
    publications: &[Publication],
    sources: &[Source],
    lookup: &dyn FilterLookup,
) -> RoutingMap {
    let by_id: HashMap<Uuid, &Source> = sources.iter().map(|s| (s.id, s)).collect();
    let mut cache: HashMap<DestinationId, Option<FilterSet>> = HashMap::new();
    let mut routing = RoutingMap::new();

    for publication in publications {
        let Some(source) = by_id.get(&publication.source_id) else {
            tracing::warn!(source_id = %publication.source_id, "Publication from unknown source");
            continue;
        };

        for destination in &source.destinations {
            if !cache.contains_key(destination) {
                let filters = match lookup.filters(destination).await {
                    Ok(filters) => Some(FilterSet::compile(&filters)),
                    Err(e) => {
                        tracing::error!(destination_id = %destination, "Failed to load filters: {}", e);
                        None
                    }
                };
                cache.insert(destination.clone(), filters);
            }

            let Some(Some(filters)) = cache.get(destination) else {
                continue;
            };

            let matched_filters = if filters.is_empty() {
                Vec::new()
            } else {
                let matched = filters.matches(publication);
                if matched.is_empty() {
                    continue;
                }
                matched
            };

            routing.entry(destination.clone()).or_default().push(Routed {
                publication: publication.clone(),
                matched_filters,
            });
        }
    }

    routing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFilters {
        filters: HashMap<String, BTreeSet<String>>,
        lookups: AtomicUsize,
    }

    impl StaticFilters {
        fn new(entries: &[(&str, &[&str])]) -> Self {
            let filters = entries
                .iter()
                .map(|(dest, names)| {
                    (dest.to_string(), names.iter().map(|n| n.to_string()).collect())
                })
                .collect();
            Self { filters, lookups: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl FilterLookup for StaticFilters {
        async fn filters(&self, destination_id: &str) -> Result<BTreeSet<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if destination_id == "broken" {
                return Err(Error::Other("lookup failed".to_string()));
            }
            Ok(self.filters.get(destination_id).cloned().unwrap_or_default())
        }
    }

    fn source(destinations: &[&str]) -> Source {
        Source {
            id: Uuid::new_v4(),
            url: "https://example.com/rss".to_string(),
            name: "Example".to_string(),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            cursor: DateTime::<Utc>::default(),
            last_fetched_at: None,
            fetch_error: None,
            created_at: DateTime::<Utc>::default(),
        }
    }

    fn publication(source: &Source, at: i64, title: &str) -> Publication {
        Publication {
            source_id: source.id,
            name: source.name.clone(),
            title: title.to_string(),
            link: format!("https://example.com/{}", at),
            summary: "Nothing to see".to_string(),
            author: None,
            published_at: DateTime::<Utc>::from_timestamp(at, 0).unwrap(),
            image_url: None,
            duplicate_source_names: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_filtered_and_unfiltered_destinations() {
        let src = source(&["cats-only", "everything"]);
        let publications = vec![
            publication(&src, 1, "Cats everywhere"),
            publication(&src, 2, "Dogs everywhere"),
        ];
        let lookup = StaticFilters::new(&[("cats-only", &["cat"][..])]);

        let routing = route(&publications, &[src], &lookup).await;

        let cats = &routing["cats-only"];
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].publication.title, "Cats everywhere");
        assert_eq!(cats[0].matched_filters, vec!["cat"]);

        let everything = &routing["everything"];
        assert_eq!(everything.len(), 2);
        assert!(everything.iter().all(|r| r.matched_filters.is_empty()));

        // One lookup per destination for the whole run
        assert_eq!(lookup.lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_filters_match_whole_words_only() {
        let filters = FilterSet::compile(&BTreeSet::from(["rust".to_string()]));
        let src = source(&["chan"]);

        assert_eq!(filters.matches(&publication(&src, 1, "RUST 2.0 released")).len(), 1);
        assert!(filters.matches(&publication(&src, 1, "Rusty nails")).is_empty());
        assert!(filters.matches(&publication(&src, 1, "Trust issues")).is_empty());

        let mut in_summary = publication(&src, 1, "Weekly digest");
        in_summary.summary = "This week in Rust: async traits".to_string();
        assert_eq!(filters.matches(&in_summary), vec!["rust"]);
    }

    #[test]
    fn test_filter_special_characters_are_literal() {
        let filters = FilterSet::compile(&BTreeSet::from(["c++".to_string()]));
        let src = source(&["chan"]);
        assert!(filters.matches(&publication(&src, 1, "cccc")).is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookup_skips_only_that_destination() {
        let src = source(&["broken", "fine"]);
        let publications = vec![publication(&src, 1, "Hello")];
        let lookup = StaticFilters::new(&[]);

        let routing = route(&publications, &[src], &lookup).await;

        assert!(!routing.contains_key("broken"));
        assert_eq!(routing["fine"].len(), 1);
    }

    #[tokio::test]
    async fn test_no_destinations_drops_publication() {
        let src = source(&[]);
        let publications = vec![publication(&src, 1, "Lonely")];
        let lookup = StaticFilters::new(&[]);

        assert!(route(&publications, &[src], &lookup).await.is_empty());
    }
}
