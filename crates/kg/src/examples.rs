//! Example-index boundary: (question, SPARQL) pairs used for few-shot
//! retrieval. Loads the flat `data.tsv` artifact (`question \t sparql` per
//! line, newlines in queries escaped as `\n`).

use std::collections::HashSet;
use std::path::Path;

use rand::seq::SliceRandom;

use grasp_domain::error::{Error, Result};

/// Similar examples must reach at least this score.
pub const MIN_EXAMPLE_SCORE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Example {
    pub question: String,
    pub sparql: String,
}

/// Retrieval over a prebuilt example collection, safe for concurrent use.
pub trait ExampleIndex: Send + Sync {
    fn random(&self, n: usize) -> Vec<Example>;

    /// Examples whose question is similar to `question`, best first, with a
    /// score cutoff.
    fn similar(&self, question: &str, n: usize, min_score: f64) -> Vec<Example>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory example index ranking by keyword overlap between questions.
pub struct TsvExampleIndex {
    examples: Vec<Example>,
}

impl TsvExampleIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to load examples from {path:?}: {e}")))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let examples = raw
            .lines()
            .filter_map(|line| {
                let (question, sparql) = line.split_once('\t')?;
                if question.trim().is_empty() || sparql.trim().is_empty() {
                    return None;
                }
                Some(Example {
                    question: question.trim().to_string(),
                    sparql: sparql.trim().replace("\\n", "\n"),
                })
            })
            .collect();
        Self { examples }
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl ExampleIndex for TsvExampleIndex {
    fn random(&self, n: usize) -> Vec<Example> {
        let mut rng = rand::thread_rng();
        self.examples
            .choose_multiple(&mut rng, n.min(self.examples.len()))
            .cloned()
            .collect()
    }

    fn similar(&self, question: &str, n: usize, min_score: f64) -> Vec<Example> {
        let query = keywords(question);
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, usize)> = self
            .examples
            .iter()
            .enumerate()
            .filter_map(|(i, example)| {
                let other = keywords(&example.question);
                let overlap = query.intersection(&other).count();
                let union = query.union(&other).count();
                if union == 0 {
                    return None;
                }
                let score = overlap as f64 / union as f64;
                (score >= min_score).then_some((score, i))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(n)
            .map(|(_, i)| self.examples[i].clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TsvExampleIndex {
        TsvExampleIndex::parse(
            "What is the capital of France?\tSELECT ?x WHERE { wd:Q142 wdt:P36 ?x }\n\
             Who wrote Hamlet?\tSELECT ?x WHERE { wd:Q41567 wdt:P50 ?x }\n",
        )
    }

    #[test]
    fn random_caps_at_len() {
        let index = index();
        assert_eq!(index.random(10).len(), 2);
        assert_eq!(index.random(1).len(), 1);
    }

    #[test]
    fn similar_respects_cutoff() {
        let index = index();
        let similar = index.similar("What is the capital of France?", 5, MIN_EXAMPLE_SCORE);
        assert_eq!(similar.len(), 1);
        assert!(similar[0].sparql.contains("wdt:P36"));

        let none = index.similar("completely unrelated topic", 5, MIN_EXAMPLE_SCORE);
        assert!(none.is_empty());
    }

    #[test]
    fn escaped_newlines_restored() {
        let index = TsvExampleIndex::parse("q?\tSELECT ?x\\nWHERE { ?x ?p ?o }");
        assert!(index.random(1)[0].sparql.contains('\n'));
    }
}
