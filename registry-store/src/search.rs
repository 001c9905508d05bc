//! Catalog queries: ranked search, author filter, recency sort, pagination,
//! plus the name autocomplete and package detail views built on the same
//! catalog snapshot.

use crate::model::{Catalog, PackageDocument, Person, VersionRecord};
use crate::ranking::{RankOptions, Ranker, Searchable};
use crate::version;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Extracts the browsable GitHub URL from a git repository URL.
static GITHUB_REPO_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(https?://.*github\.com/.*/.*)\.git").expect("Invalid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest `latest` publish first.
    Recent,
}

/// Search request as received from a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    /// Fields to rank on. Defaults to `["name"]` when a query is given.
    pub properties: Option<Vec<String>>,
    pub author: Option<String>,
    pub sort: Option<SortOrder>,
    pub start: Option<i64>,
    pub amount: Option<i64>,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    /// True when nothing would narrow or order the catalog.
    pub fn is_unconstrained(&self) -> bool {
        self.query.is_none() && self.author.is_none() && self.sort.is_none()
    }
}

/// Search settings taken from configuration.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub max_results: usize,
    pub threshold: f64,
    pub distance: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 100,
            threshold: 0.6,
            distance: 100,
        }
    }
}

/// Flattened view of a document's `latest` version used for multi-field ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchEntry {
    pub name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub readme: Option<String>,
    pub keywords: Vec<String>,
}

impl SearchEntry {
    pub fn from_document(doc: &PackageDocument) -> Self {
        let latest = doc.latest_version();
        Self {
            name: doc.name.clone(),
            description: latest
                .and_then(|v| v.description.clone())
                .or_else(|| doc.description.clone()),
            author: latest.and_then(author_name),
            readme: latest.and_then(|v| v.readme.clone()),
            keywords: latest.map(|v| v.keywords.clone()).unwrap_or_default(),
        }
    }
}

fn author_name(record: &VersionRecord) -> Option<String> {
    record
        .author
        .as_ref()
        .map(|a| a.name().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| record.publisher_name().map(str::to_string))
}

impl Searchable for SearchEntry {
    fn field(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            "name" => Some(Cow::Borrowed(&self.name)),
            "description" => self.description.as_deref().map(Cow::Borrowed),
            "author" => self.author.as_deref().map(Cow::Borrowed),
            "readme" => self.readme.as_deref().map(Cow::Borrowed),
            "keywords" if !self.keywords.is_empty() => Some(Cow::Owned(self.keywords.join(" "))),
            _ => None,
        }
    }
}

impl Searchable for PackageDocument {
    fn field(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            "name" => Some(Cow::Borrowed(&self.name)),
            _ => None,
        }
    }
}

/// Name autocomplete result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub description: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionTime {
    pub version: String,
    pub time: Option<DateTime<Utc>>,
}

/// One entry of the latest version's `dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub dependency: String,
    /// Requested version range, as published
    pub version: String,
}

/// Human-facing summary of one package at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageDetail {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub readme: Option<String>,
    pub author: Option<Person>,
    pub collaborators: Vec<Person>,
    /// Newest first.
    pub versions: Vec<VersionTime>,
    pub keywords: Vec<String>,
    pub dependencies: Vec<Dependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl PackageDetail {
    /// Detail for `version`, or for `latest` when it is absent or unknown.
    pub fn from_document(doc: &PackageDocument, version: Option<&str>) -> Option<Self> {
        let latest = doc.latest_version()?;
        let release = version
            .and_then(|v| doc.versions.get(v))
            .unwrap_or(latest);

        let mut versions: Vec<String> = doc.versions.keys().cloned().collect();
        version::sort_descending(&mut versions);
        let versions = versions
            .into_iter()
            .map(|v| VersionTime {
                time: doc.time.get(&v).copied(),
                version: v,
            })
            .collect();

        let collaborators = latest
            .maintainers
            .iter()
            .map(|m| Person::new(m.name.clone(), m.email.clone()))
            .collect();

        let repo = latest.repository.as_ref().and_then(|r| {
            GITHUB_REPO_REGEX
                .captures(r.url())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        });

        Some(Self {
            name: doc.name.clone(),
            version: release.version.clone(),
            description: release.description.clone(),
            readme: release.readme.clone(),
            author: release
                .publisher
                .as_ref()
                .map(|p| Person::new(p.name.clone(), p.email.clone())),
            collaborators,
            versions,
            keywords: latest.keywords.clone(),
            dependencies: latest
                .dependencies
                .iter()
                .map(|(dependency, version)| Dependency {
                    dependency: dependency.clone(),
                    version: version.clone(),
                })
                .collect(),
            repo,
        })
    }
}

/// Read-only query layer over a catalog snapshot.
pub struct CatalogSearch {
    ranker: Arc<dyn Ranker>,
    settings: SearchSettings,
}

impl CatalogSearch {
    pub fn new(ranker: Arc<dyn Ranker>, settings: SearchSettings) -> Self {
        Self { ranker, settings }
    }

    pub fn max_results(&self) -> usize {
        self.settings.max_results
    }

    /// Rank, filter, sort and paginate `catalog` for `query`.
    #[instrument(skip(self, catalog), fields(packages = catalog.len()))]
    pub fn search(&self, catalog: &Catalog, query: &SearchQuery) -> Vec<PackageDocument> {
        let mut docs: Vec<&PackageDocument> = catalog.values().collect();

        if let Some(text) = query.query.as_deref() {
            let keys = query
                .properties
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| vec!["name".to_string()]);
            docs = self.rank(docs, text, keys);
        }

        if let Some(author) = query.author.as_deref() {
            docs.retain(|doc| {
                doc.latest_version()
                    .and_then(VersionRecord::publisher_name)
                    .is_some_and(|name| name.eq_ignore_ascii_case(author))
            });
        }

        if query.sort == Some(SortOrder::Recent) {
            // Stable, so ties keep ranked order; undated documents go last
            docs.sort_by(|a, b| b.latest_published_at().cmp(&a.latest_published_at()));
        }

        let (start, amount) = self.window(query);
        let page: Vec<PackageDocument> = docs.into_iter().skip(start).take(amount).cloned().collect();
        debug!(start, amount, returned = page.len(), "Search completed");
        page
    }

    fn rank<'a>(
        &self,
        docs: Vec<&'a PackageDocument>,
        text: &str,
        keys: Vec<String>,
    ) -> Vec<&'a PackageDocument> {
        let options = RankOptions {
            keys,
            threshold: self.settings.threshold,
            distance: self.settings.distance,
        };

        if options.keys.len() == 1 && options.keys[0] == "name" {
            let corpus: Vec<&dyn Searchable> = docs.iter().map(|d| *d as &dyn Searchable).collect();
            return self
                .ranker
                .rank(&corpus, text, &options)
                .into_iter()
                .filter_map(|i| docs.get(i).copied())
                .collect();
        }

        // Index i of the projection is index i of `docs`
        let entries: Vec<SearchEntry> = docs.iter().map(|d| SearchEntry::from_document(d)).collect();
        let corpus: Vec<&dyn Searchable> = entries.iter().map(|e| e as &dyn Searchable).collect();
        self.ranker
            .rank(&corpus, text, &options)
            .into_iter()
            .filter_map(|i| docs.get(i).copied())
            .collect()
    }

    fn window(&self, query: &SearchQuery) -> (usize, usize) {
        let start = query
            .start
            .map_or(0, |s| usize::try_from(s.max(0)).unwrap_or(usize::MAX));
        let max = self.settings.max_results;
        let amount = match query.amount {
            Some(a) if a > 0 => usize::try_from(a).map_or(max, |a| a.min(max)),
            _ => max,
        };
        (start, amount)
    }

    /// Packages whose name starts with `prefix`, ignoring case.
    pub fn autocomplete(&self, catalog: &Catalog, prefix: &str) -> Vec<PackageSummary> {
        let prefix = prefix.to_lowercase();
        catalog
            .values()
            .filter(|doc| doc.name.to_lowercase().starts_with(&prefix))
            .take(self.settings.max_results)
            .map(|doc| PackageSummary {
                name: doc.name.clone(),
                description: doc.description.clone(),
                latest: doc.latest().map(str::to_string),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Repository, LATEST_TAG};
    use crate::ranking::FuzzyRanker;
    use chrono::{Duration, TimeZone};

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn doc(name: &str, publisher: &str, published: i64) -> PackageDocument {
        let mut record = VersionRecord::new(name, "1.0.0");
        record.description = Some(format!("the {} package", name));
        record.publisher = Some(Person::new(publisher, None));
        let mut doc = PackageDocument::new(name);
        doc.description = record.description.clone();
        doc.versions.insert("1.0.0".to_string(), record);
        doc.dist_tags.insert(LATEST_TAG.to_string(), "1.0.0".to_string());
        doc.time.insert("1.0.0".to_string(), at(published));
        doc
    }

    fn catalog(docs: Vec<PackageDocument>) -> Catalog {
        docs.into_iter().map(|d| (d.name.clone(), d)).collect()
    }

    fn search() -> CatalogSearch {
        CatalogSearch::new(Arc::new(FuzzyRanker), SearchSettings::default())
    }

    fn names(docs: &[PackageDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_name_query_ranks_prefixes_first() {
        let catalog = catalog(vec![
            doc("my-abc", "alice", 0),
            doc("abc-utils", "alice", 1),
            doc("abd", "bob", 2),
            doc("abc", "bob", 3),
            doc("unrelated", "carol", 4),
        ]);
        let query = SearchQuery {
            query: Some("abc".to_string()),
            properties: Some(vec!["name".to_string()]),
            ..Default::default()
        };

        let results = search().search(&catalog, &query);
        assert_eq!(names(&results), ["abc", "abc-utils", "my-abc", "abd"]);
    }

    #[test]
    fn test_multi_field_query_uses_projection() {
        let mut tagged = doc("zeta", "alice", 0);
        if let Some(v) = tagged.versions.get_mut("1.0.0") {
            v.keywords = vec!["parser".to_string(), "yaml".to_string()];
        }
        let catalog = catalog(vec![tagged, doc("yaml", "bob", 1), doc("other", "bob", 2)]);
        let query = SearchQuery {
            query: Some("yaml".to_string()),
            properties: Some(vec!["name".to_string(), "keywords".to_string()]),
            ..Default::default()
        };

        let results = search().search(&catalog, &query);
        assert_eq!(names(&results), ["yaml", "zeta"]);
    }

    #[test]
    fn test_author_filter_is_case_insensitive() {
        let catalog = catalog(vec![
            doc("a", "Alice", 0),
            doc("b", "bob", 1),
            doc("c", "alice", 2),
        ]);
        let query = SearchQuery {
            author: Some("ALICE".to_string()),
            ..Default::default()
        };
        assert_eq!(names(&search().search(&catalog, &query)), ["a", "c"]);
    }

    #[test]
    fn test_recent_sort_orders_by_latest_time() {
        let mut undated = doc("undated", "x", 0);
        undated.time.clear();
        let catalog = catalog(vec![
            doc("old", "x", 1),
            undated,
            doc("new", "x", 9),
            doc("mid", "x", 5),
        ]);
        let query = SearchQuery {
            sort: Some(SortOrder::Recent),
            ..Default::default()
        };
        assert_eq!(
            names(&search().search(&catalog, &query)),
            ["new", "mid", "old", "undated"]
        );
    }

    #[test]
    fn test_pagination_window() {
        let catalog = catalog(
            ["p0", "p1", "p2", "p3", "p4"]
                .into_iter()
                .enumerate()
                .map(|(i, n)| doc(n, "x", i as i64))
                .collect(),
        );
        let base = SearchQuery {
            sort: Some(SortOrder::Recent),
            ..Default::default()
        };
        let all = search().search(
            &catalog,
            &SearchQuery {
                amount: Some(5),
                ..base.clone()
            },
        );
        let page = search().search(
            &catalog,
            &SearchQuery {
                start: Some(2),
                amount: Some(2),
                ..base.clone()
            },
        );
        assert_eq!(names(&page), names(&all[2..4]));

        let negative = search().search(
            &catalog,
            &SearchQuery {
                start: Some(-3),
                amount: Some(0),
                ..base.clone()
            },
        );
        assert_eq!(negative.len(), 5);

        let capped = CatalogSearch::new(
            Arc::new(FuzzyRanker),
            SearchSettings {
                max_results: 3,
                ..SearchSettings::default()
            },
        );
        let too_many = capped.search(
            &catalog,
            &SearchQuery {
                amount: Some(50),
                ..base.clone()
            },
        );
        assert_eq!(too_many.len(), 3);

        let past_end = search().search(
            &catalog,
            &SearchQuery {
                start: Some(10),
                ..base
            },
        );
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_autocomplete_prefix() {
        let catalog = catalog(vec![doc("React", "x", 0), doc("react-dom", "x", 1), doc("preact", "x", 2)]);
        let results = search().autocomplete(&catalog, "reac");
        let names: Vec<&str> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["React", "react-dom"]);
        assert_eq!(results[0].latest.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_package_detail() {
        let mut pkg = doc("foo", "alice", 0);
        let mut v2 = VersionRecord::new("foo", "2.0.0");
        v2.description = Some("second".to_string());
        v2.publisher = Some(Person::new("bob", Some("bob@example.com".to_string())));
        v2.maintainers = vec![Person::new("bob", Some("bob@example.com".to_string()))];
        v2.keywords = vec!["foo".to_string()];
        v2.dependencies.insert("left-pad".to_string(), "^1.0.0".to_string());
        v2.author = Some(Author::Text("Bob".to_string()));
        v2.repository = Some(Repository::Url(
            "git+https://github.com/bob/foo.git".to_string(),
        ));
        pkg.versions.insert("2.0.0".to_string(), v2);
        pkg.dist_tags.insert(LATEST_TAG.to_string(), "2.0.0".to_string());
        pkg.time.insert("2.0.0".to_string(), at(2));

        let latest = PackageDetail::from_document(&pkg, None).expect("should build detail");
        assert_eq!(latest.version, "2.0.0");
        assert_eq!(latest.repo.as_deref(), Some("https://github.com/bob/foo"));
        assert_eq!(
            latest.dependencies,
            [Dependency {
                dependency: "left-pad".to_string(),
                version: "^1.0.0".to_string(),
            }]
        );
        assert_eq!(latest.collaborators[0].name, "bob");
        let listed: Vec<&str> = latest.versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(listed, ["2.0.0", "1.0.0"]);
        assert_eq!(latest.versions[0].time, Some(at(2)));

        let old = PackageDetail::from_document(&pkg, Some("1.0.0")).expect("should build detail");
        assert_eq!(old.description.as_deref(), Some("the foo package"));
        assert_eq!(old.author.map(|a| a.name).as_deref(), Some("alice"));
        assert_eq!(old.keywords, ["foo"]);

        let unknown = PackageDetail::from_document(&pkg, Some("9.9.9")).expect("should build detail");
        assert_eq!(unknown.version, "2.0.0");
    }

    #[test]
    fn test_unconstrained_query() {
        assert!(SearchQuery::default().is_unconstrained());
        assert!(!SearchQuery::text("x").is_unconstrained());
    }
}
