use serde::{Deserialize, Serialize};

use crate::rag::{RagAnswer, RagHit};

const SOURCE_PREFIX: &str = "docs/";
const SOURCE_SUFFIX: &str = ".md";
const INDEX_SEGMENT: &str = "/index";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Source {
    /// Filename exactly as the search service reported it.
    pub title: String,
    /// Browsable path relative to the site root.
    pub url: String,
    pub score: f64,
}

impl Source {
    pub fn from_hit(hit: &RagHit) -> Source {
        Source {
            title: hit.filename.clone(),
            url: normalize_source_url(&hit.filename),
            score: hit.score,
        }
    }
}

/// `docs/guide/index.md` -> `guide`, `docs/faq.md` -> `faq`.
pub fn normalize_source_url(filename: &str) -> String {
    let url = filename.strip_prefix(SOURCE_PREFIX).unwrap_or(filename);
    let url = url.strip_suffix(SOURCE_SUFFIX).unwrap_or(url);
    let url = url.strip_suffix(INDEX_SEGMENT).unwrap_or(url);
    url.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub answer: String,
    pub sources: Vec<Source>,
}

impl SearchResult {
    pub fn from_answer(answer: &RagAnswer) -> SearchResult {
        SearchResult {
            answer: answer.response.clone(),
            sources: answer.data.iter().map(Source::from_hit).collect(),
        }
    }

    pub fn answer_lines(&self) -> impl Iterator<Item = &str> {
        self.answer.split('\n')
    }
}

#[test]
fn test_normalize_source_url() {
    assert_eq!(normalize_source_url("docs/guide/index.md"), "guide");
    assert_eq!(normalize_source_url("docs/faq.md"), "faq");
    assert_eq!(normalize_source_url("docs/a/b/c.md"), "a/b/c");
    // only the leading prefix is stripped
    assert_eq!(normalize_source_url("guides/docs/x.md"), "guides/docs/x");
    assert_eq!(normalize_source_url("docs/index.md"), "index");
    assert_eq!(normalize_source_url("docs/notes.mdx"), "notes.mdx");
    assert_eq!(normalize_source_url("readme.txt"), "readme.txt");
    assert_eq!(normalize_source_url(""), "");
}

#[test]
fn test_from_answer_preserves_order_and_score() {
    let answer: RagAnswer = serde_json::from_value(serde_json::json!({
        "response": "line one\nline two",
        "data": [
            { "filename": "docs/b.md", "score": 0.9 },
            { "filename": "docs/a/index.md", "score": 0.6 }
        ]
    }))
    .unwrap();

    let result = SearchResult::from_answer(&answer);
    assert_eq!(
        result.sources,
        vec![
            Source { title: "docs/b.md".into(), url: "b".into(), score: 0.9 },
            Source { title: "docs/a/index.md".into(), url: "a".into(), score: 0.6 },
        ]
    );
    assert_eq!(result.answer_lines().collect::<Vec<_>>(), vec!["line one", "line two"]);
    assert_eq!(SearchResult::from_answer(&answer), result);
}
