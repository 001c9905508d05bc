//! Fuzzy ranking of catalog entries against a search query.
//!
//! [`CatalogSearch`](crate::search::CatalogSearch) only depends on the
//! [`Ranker`] trait. [`FuzzyRanker`] is the bundled implementation: every
//! item gets a score in `[0, 1]` per key (lower is better), keeps its best
//! key, and items scoring above the threshold are dropped.
//!
//! Score bands, after lowercasing both sides:
//!
//! | match        | score                                   |
//! |--------------|-----------------------------------------|
//! | exact        | `0.0`                                   |
//! | prefix       | below `0.05`, shorter remainder first   |
//! | substring    | `0.1` to `0.2`, earlier position first  |
//! | approximate  | `0.2 + edits / query length`            |
//!
//! A prefix match therefore always outranks any non-prefix match.

use std::borrow::Cow;

/// Something whose named text fields can be ranked.
pub trait Searchable {
    fn field(&self, key: &str) -> Option<Cow<'_, str>>;
}

#[derive(Debug, Clone)]
pub struct RankOptions {
    /// Fields to match against; the best-scoring one counts.
    pub keys: Vec<String>,
    /// Highest score still considered a match.
    pub threshold: f64,
    /// Character position after which substring matches stop losing score.
    pub distance: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            keys: vec!["name".to_string()],
            threshold: 0.6,
            distance: 100,
        }
    }
}

/// Rank a corpus against a query.
pub trait Ranker: Send + Sync {
    /// Indices into `corpus` of the matching items, best first.
    fn rank(&self, corpus: &[&dyn Searchable], query: &str, options: &RankOptions) -> Vec<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FuzzyRanker;

impl FuzzyRanker {
    /// Score one text against an already-lowercased query.
    pub fn score(text: &str, query: &str, distance: usize) -> f64 {
        let text = text.to_lowercase();
        if text == query {
            return 0.0;
        }

        let query_len = query.chars().count();
        if query_len == 0 {
            return 1.0;
        }
        let text_len = text.chars().count();

        if text.starts_with(query) {
            return 0.05 * (1.0 - query_len as f64 / text_len as f64);
        }

        if let Some(byte_pos) = text.find(query) {
            let pos = text[..byte_pos].chars().count();
            let distance = distance.max(1);
            return 0.1 + 0.1 * pos.min(distance) as f64 / distance as f64;
        }

        let edits = best_window_distance(&text, query);
        (0.2 + edits as f64 / query_len as f64).min(1.0)
    }
}

impl Ranker for FuzzyRanker {
    fn rank(&self, corpus: &[&dyn Searchable], query: &str, options: &RankOptions) -> Vec<usize> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return (0..corpus.len()).collect();
        }

        let mut scored: Vec<(usize, f64)> = corpus
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                options
                    .keys
                    .iter()
                    .filter_map(|key| item.field(key))
                    .map(|text| Self::score(&text, &query, options.distance))
                    .reduce(f64::min)
                    .filter(|score| *score <= options.threshold)
                    .map(|score| (index, score))
            })
            .collect();

        // Stable: equal scores keep corpus order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.into_iter().map(|(index, _)| index).collect()
    }
}

/// Fewest edits turning `query` into any substring of `text`.
fn best_window_distance(text: &str, query: &str) -> usize {
    let query: Vec<char> = query.chars().collect();
    // Column for the empty text prefix: matching i query chars costs i
    let mut column: Vec<usize> = (0..=query.len()).collect();
    let mut best = query.len();

    for t in text.chars() {
        // Any text position may start a window, so row 0 stays 0
        let mut diagonal = column[0];
        column[0] = 0;
        for (i, q) in query.iter().enumerate() {
            let substitution = diagonal + usize::from(*q != t);
            let deletion = column[i + 1] + 1;
            let insertion = column[i] + 1;
            diagonal = column[i + 1];
            column[i + 1] = substitution.min(deletion).min(insertion);
        }
        best = best.min(column[query.len()]);
    }
    best
}
