//! Catalog search scoring
//!
//! Scores are design-level weights, not a contract: name matches count
//! double, exact beats prefix beats substring, and fuzzy matches cap well
//! below everything else. Callers should rely on the ordering, not on the
//! absolute numbers.

use serde::{Deserialize, Serialize};

use smcp_backend::AggregatedTool;

/// Matching strategy for `search_tools`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Partial,
    Prefix,
    Exact,
    Fuzzy,
}

/// Which tool fields participate in scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Name,
    Description,
}

/// Search request options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub case_sensitive: bool,
    pub fields: Vec<SearchField>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Partial,
            case_sensitive: false,
            fields: vec![SearchField::Name, SearchField::Description],
            limit: 50,
            offset: 0,
        }
    }
}

/// One scored catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub description: String,
    pub score: f64,
}

/// Minimum per-word similarity for a fuzzy match
const FUZZY_THRESHOLD: f64 = 0.6;

/// Score a catalog against a query and return hits in descending score
/// order (name ascending on ties), paginated by limit/offset.
///
/// An empty query matches everything with no scoring, ordered by name.
pub fn search_catalog(tools: &[AggregatedTool], query: &str, options: &SearchOptions) -> (usize, Vec<SearchHit>) {
    let query = query.trim();
    if query.is_empty() {
        let total = tools.len();
        let hits = tools
            .iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|tool| SearchHit {
                name: tool.qualified_name.clone(),
                description: tool.description.clone(),
                score: 0.0,
            })
            .collect();
        return (total, hits);
    }

    let mut scored: Vec<SearchHit> = tools
        .iter()
        .filter_map(|tool| {
            let score = score_tool(tool, query, options);
            (score > 0.0).then(|| SearchHit {
                name: tool.qualified_name.clone(),
                description: tool.description.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    let total = scored.len();
    let hits = scored
        .into_iter()
        .skip(options.offset)
        .take(options.limit)
        .collect();
    (total, hits)
}

/// Combined weighted score for one tool; name matches count double
fn score_tool(tool: &AggregatedTool, query: &str, options: &SearchOptions) -> f64 {
    let mut score: f64 = 0.0;
    for field in &options.fields {
        let (text, weight) = match field {
            SearchField::Name => (tool.qualified_name.as_str(), 2.0),
            SearchField::Description => (tool.description.as_str(), 1.0),
        };
        score = score.max(weight * score_text(text, query, options.mode, options.case_sensitive));
    }
    score
}

fn score_text(text: &str, query: &str, mode: SearchMode, case_sensitive: bool) -> f64 {
    let (text, query) = if case_sensitive {
        (text.to_string(), query.to_string())
    } else {
        (text.to_lowercase(), query.to_lowercase())
    };

    match mode {
        SearchMode::Exact => {
            if text == query {
                100.0
            } else {
                0.0
            }
        }
        SearchMode::Prefix => {
            if text.starts_with(&query) {
                80.0
            } else {
                0.0
            }
        }
        SearchMode::Partial => {
            if text.contains(&query) {
                return 70.0;
            }
            let words: Vec<&str> = query.split_whitespace().collect();
            if words.is_empty() {
                return 0.0;
            }
            let matched = words.iter().filter(|word| text.contains(**word)).count();
            if matched == 0 {
                0.0
            } else {
                50.0 * matched as f64 / words.len() as f64
            }
        }
        SearchMode::Fuzzy => {
            let query_words: Vec<&str> = query.split_whitespace().collect();
            let text_words: Vec<&str> = text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            if query_words.is_empty() || text_words.is_empty() {
                return 0.0;
            }

            let mut matched = 0usize;
            let mut similarity_sum = 0.0;
            for query_word in &query_words {
                let best = text_words
                    .iter()
                    .map(|text_word| similarity(query_word, text_word))
                    .fold(0.0, f64::max);
                if best >= FUZZY_THRESHOLD {
                    matched += 1;
                    similarity_sum += best;
                }
            }
            if matched == 0 {
                0.0
            } else {
                40.0 * (similarity_sum / matched as f64) * (matched as f64 / query_words.len() as f64)
            }
        }
    }
}

/// Normalized similarity in [0, 1] based on edit distance
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Classic two-row Levenshtein distance
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> AggregatedTool {
        let (backend, raw) = name.split_once('.').unwrap_or(("x", name));
        AggregatedTool {
            qualified_name: name.to_string(),
            description: description.to_string(),
            backend: backend.to_string(),
            raw_name: raw.to_string(),
            input_schema: None,
        }
    }

    fn sample_catalog() -> Vec<AggregatedTool> {
        vec![
            tool("fs.read_file", "Read a file from disk"),
            tool("fs.write_file", "Write a file to disk"),
            tool("web.search", "Search the web for pages"),
            tool("db.query", "Run a database query"),
        ]
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("search", "search"), 0);
    }

    #[test]
    fn test_similarity_range() {
        assert_eq!(similarity("same", "same"), 1.0);
        assert!(similarity("search", "serch") > 0.8);
        assert!(similarity("abc", "xyz") < 0.1);
    }

    #[test]
    fn test_empty_query_returns_all_unscored() {
        let catalog = sample_catalog();
        let (total, hits) = search_catalog(&catalog, "", &SearchOptions::default());
        assert_eq!(total, 4);
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.score == 0.0));

        let (total, page) = search_catalog(
            &catalog,
            "",
            &SearchOptions {
                limit: 2,
                offset: 2,
                ..Default::default()
            },
        );
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_name_match_outranks_description_match() {
        let catalog = sample_catalog();
        let (_, hits) = search_catalog(&catalog, "search", &SearchOptions::default());

        // "web.search" matches on name (weight 2), "db.query" not at all
        assert_eq!(hits[0].name, "web.search");
        assert!(hits.iter().all(|h| h.name != "db.query"));
    }

    #[test]
    fn test_exact_mode_requires_full_name() {
        let catalog = sample_catalog();
        let options = SearchOptions {
            mode: SearchMode::Exact,
            ..Default::default()
        };
        let (total, hits) = search_catalog(&catalog, "web.search", &options);
        assert_eq!(total, 1);
        assert_eq!(hits[0].name, "web.search");

        let (total, _) = search_catalog(&catalog, "web", &options);
        assert_eq!(total, 0);
    }

    #[test]
    fn test_prefix_mode() {
        let catalog = sample_catalog();
        let options = SearchOptions {
            mode: SearchMode::Prefix,
            ..Default::default()
        };
        let (total, hits) = search_catalog(&catalog, "fs.", &options);
        assert_eq!(total, 2);
        assert_eq!(hits[0].name, "fs.read_file");
        assert_eq!(hits[1].name, "fs.write_file");
    }

    #[test]
    fn test_fuzzy_mode_tolerates_typos_below_other_modes() {
        let catalog = sample_catalog();
        let fuzzy = SearchOptions {
            mode: SearchMode::Fuzzy,
            ..Default::default()
        };
        let (total, hits) = search_catalog(&catalog, "serch", &fuzzy);
        assert!(total >= 1);
        assert_eq!(hits[0].name, "web.search");
        // Fuzzy scores stay below exact/prefix/partial scores
        assert!(hits[0].score <= 80.0);

        let (none, _) = search_catalog(&catalog, "zzzzzz", &fuzzy);
        assert_eq!(none, 0);
    }

    #[test]
    fn test_case_sensitivity_flag() {
        let catalog = vec![tool("fs.ReadFile", "Read a file")];
        let insensitive = SearchOptions::default();
        let (total, _) = search_catalog(&catalog, "readfile", &insensitive);
        assert_eq!(total, 1);

        let sensitive = SearchOptions {
            case_sensitive: true,
            ..Default::default()
        };
        let (total, _) = search_catalog(&catalog, "readfile", &sensitive);
        assert_eq!(total, 0);
    }
}
