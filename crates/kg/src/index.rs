//! Search-index boundary over prebuilt label data.
//!
//! Index construction (download, tokenize, embed) happens elsewhere; this
//! module only loads the flat `data.tsv` artifact — one row per item:
//! `identifier \t label \t aliases (";"-separated) \t infos (";"-separated)`
//! — and answers keyword searches over it.

use std::collections::HashMap;
use std::path::Path;

use grasp_domain::error::{Error, Result};

/// One item of a search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub identifier: String,
    pub label: String,
    pub aliases: Vec<String>,
    pub infos: Vec<String>,
}

impl SearchHit {
    /// The line shown to the model for this hit.
    pub fn selection_string(&self) -> String {
        let mut line = format!("{} ({})", self.identifier, self.label);
        if !self.aliases.is_empty() {
            line.push_str(&format!(", also known as {}", self.aliases.join(", ")));
        }
        if !self.infos.is_empty() {
            line.push_str(&format!("; {}", self.infos.join("; ")));
        }
        line
    }
}

/// Read access to a label index, safe for concurrent use.
pub trait SearchIndex: Send + Sync {
    /// Top-k hits for a free-text query, best first.
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit>;

    /// Exact lookup by identifier.
    fn get(&self, identifier: &str) -> Option<SearchHit>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory index over a `data.tsv` file, ranking by the number of query
/// keywords that exactly match or prefix a label/alias keyword.
pub struct TsvIndex {
    hits: Vec<SearchHit>,
    by_identifier: HashMap<String, usize>,
}

impl TsvIndex {
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            by_identifier: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to load index data from {path:?}: {e}")))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let mut hits = Vec::new();
        let mut by_identifier = HashMap::new();

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let Some(identifier) = fields.next() else {
                continue;
            };
            let label = fields.next().unwrap_or("").to_string();
            let aliases = split_field(fields.next());
            let infos = split_field(fields.next());

            by_identifier.insert(identifier.to_string(), hits.len());
            hits.push(SearchHit {
                identifier: identifier.to_string(),
                label,
                aliases,
                infos,
            });
        }

        Self {
            hits,
            by_identifier,
        }
    }
}

fn split_field(field: Option<&str>) -> Vec<String> {
    field
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl SearchIndex for TsvIndex {
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query_keywords = keywords(query);
        if query_keywords.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .hits
            .iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                let mut item_keywords = keywords(&hit.label);
                for alias in &hit.aliases {
                    item_keywords.extend(keywords(alias));
                }
                let score = query_keywords
                    .iter()
                    .filter(|qk| item_keywords.iter().any(|ik| ik.starts_with(qk.as_str())))
                    .count();
                (score > 0).then_some((score, i))
            })
            .collect();

        // highest score first; ties keep data order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, i)| self.hits[i].clone())
            .collect()
    }

    fn get(&self, identifier: &str) -> Option<SearchHit> {
        self.by_identifier
            .get(identifier)
            .map(|&i| self.hits[i].clone())
    }

    fn len(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TsvIndex {
        TsvIndex::parse(
            "wd:Q90\tParis\tCity of Light;Paname\tcapital of France\n\
             wd:Q142\tFrance\t\tcountry in Europe\n\
             wd:Q7378\telephant\tpachyderm\tlarge mammal\n",
        )
    }

    #[test]
    fn searches_by_label_and_alias() {
        let index = index();
        let hits = index.search("paris", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifier, "wd:Q90");

        let hits = index.search("paname", 5);
        assert_eq!(hits[0].identifier, "wd:Q90");
    }

    #[test]
    fn prefix_matches_count() {
        let index = index();
        let hits = index.search("eleph", 5);
        assert_eq!(hits[0].identifier, "wd:Q7378");
    }

    #[test]
    fn top_k_caps_results() {
        let index = TsvIndex::parse(
            (0..20)
                .map(|i| format!("e:{i}\tthing {i}\t\t"))
                .collect::<Vec<_>>()
                .join("\n")
                .as_str(),
        );
        assert_eq!(index.search("thing", 3).len(), 3);
    }

    #[test]
    fn get_by_identifier() {
        let index = index();
        let hit = index.get("wd:Q142").unwrap();
        assert_eq!(hit.label, "France");
        assert!(index.get("wd:Q0").is_none());
    }

    #[test]
    fn selection_string_formats() {
        let hit = index().get("wd:Q90").unwrap();
        assert_eq!(
            hit.selection_string(),
            "wd:Q90 (Paris), also known as City of Light, Paname; capital of France"
        );
    }
}
