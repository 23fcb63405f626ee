//! Per-KG managers: endpoint, prefixes, notes, and the search/example
//! indices. Managers are loaded once at startup and shared read-only across
//! requests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grasp_domain::config::KgConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::format_notes;

use crate::examples::{ExampleIndex, TsvExampleIndex};
use crate::index::{SearchIndex, TsvIndex};
use crate::items;

/// Root directory of the on-disk index artifacts: `$GRASP_INDEX_DIR` or
/// `~/.grasp/index`.
pub fn index_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GRASP_INDEX_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grasp")
        .join("index")
}

/// KG names with an index directory on disk.
pub fn available_knowledge_graphs() -> Vec<String> {
    let root = index_dir();
    let Ok(entries) = std::fs::read_dir(&root) else {
        return Vec::new();
    };
    let mut kgs: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry
                .file_type()
                .ok()?
                .is_dir()
                .then(|| entry.file_name().to_string_lossy().into_owned())
        })
        .collect();
    kgs.sort();
    kgs
}

/// Prefixes understood by every KG regardless of its own prefix file.
fn common_prefixes() -> BTreeMap<String, String> {
    BTreeMap::from(
        [
            ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
            ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
            ("owl", "http://www.w3.org/2002/07/owl#"),
            ("xsd", "http://www.w3.org/2001/XMLSchema#"),
            ("foaf", "http://xmlns.com/foaf/0.1/"),
            ("skos", "http://www.w3.org/2004/02/skos/core#"),
            ("dct", "http://purl.org/dc/terms/"),
            ("dc", "http://purl.org/dc/elements/1.1/"),
            ("prov", "http://www.w3.org/ns/prov#"),
            ("schema", "http://schema.org/"),
            ("geo", "http://www.opengis.net/ont/geosparql#"),
            ("wikibase", "http://wikiba.se/ontology#"),
            ("qb", "http://purl.org/linked-data/cube#"),
            ("void", "http://rdfs.org/ns/void#"),
        ]
        .map(|(short, long)| (short.to_string(), long.to_string())),
    )
}

/// One knowledge graph as seen by the agent loop.
pub struct KgManager {
    pub kg: String,
    pub endpoint: String,
    pub prefixes: BTreeMap<String, String>,
    pub notes: Vec<String>,
    pub entities: Arc<dyn SearchIndex>,
    pub properties: Arc<dyn SearchIndex>,
    pub example_index: Option<Arc<dyn ExampleIndex>>,
}

impl std::fmt::Debug for KgManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KgManager")
            .field("kg", &self.kg)
            .field("endpoint", &self.endpoint)
            .field("prefixes", &self.prefixes)
            .field("notes", &self.notes)
            .field("entities", &format_args!("<SearchIndex>"))
            .field("properties", &format_args!("<SearchIndex>"))
            .field(
                "example_index",
                &format_args!(
                    "{}",
                    if self.example_index.is_some() {
                        "Some(<ExampleIndex>)"
                    } else {
                        "None"
                    }
                ),
            )
            .finish()
    }
}

impl KgManager {
    /// Load a manager from the per-KG directory under the index root.
    /// Missing search-index artifacts degrade to empty indices with a
    /// warning; a missing directory is fine for purely endpoint-backed KGs.
    pub fn load(config: &KgConfig) -> Result<Self> {
        let kg_dir = index_dir().join(&config.kg);

        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!("https://qlever.cs.uni-freiburg.de/api/{}", config.kg)
        });

        let mut prefixes = common_prefixes();
        prefixes.extend(load_prefixes(&kg_dir.join("prefixes.json"))?);

        let notes_file = config
            .notes_file
            .clone()
            .unwrap_or_else(|| kg_dir.join("notes.json"));
        let notes = load_notes(&notes_file)?;

        let entities = load_index(&kg_dir.join("entities").join("data.tsv"), &config.kg)?;
        let properties = load_index(&kg_dir.join("properties").join("data.tsv"), &config.kg)?;

        let example_path = config
            .example_index
            .clone()
            .unwrap_or_else(|| kg_dir.join("examples").join("data.tsv"));
        let example_index: Option<Arc<dyn ExampleIndex>> = if example_path.exists() {
            Some(Arc::new(TsvExampleIndex::load(&example_path)?))
        } else {
            None
        };

        Ok(Self {
            kg: config.kg.clone(),
            endpoint,
            prefixes,
            notes,
            entities,
            properties,
            example_index,
        })
    }

    /// Prefixed form of an IRI when a prefix matches, `<iri>` otherwise.
    pub fn shorten(&self, iri: &str) -> String {
        items::shorten(iri, &self.prefixes)
    }

    /// Full IRI of a prefixed name or bracketed IRI.
    pub fn expand(&self, item: &str) -> Option<String> {
        items::expand(item, &self.prefixes)
    }
}

fn load_prefixes(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid prefix file {path:?}: {e}")))
}

fn load_notes(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::Config(format!("invalid notes file {path:?}: {e}")))
}

/// General notes shared across all knowledge graphs (`<root>/notes.json`).
pub fn load_general_notes(notes_file: Option<&Path>) -> Result<Vec<String>> {
    let path = notes_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| index_dir().join("notes.json"));
    load_notes(&path)
}

fn load_index(path: &Path, kg: &str) -> Result<Arc<dyn SearchIndex>> {
    if path.exists() {
        let index = TsvIndex::load(path)?;
        tracing::debug!(kg, path = %path.display(), items = index.len(), "index loaded");
        Ok(Arc::new(index))
    } else {
        tracing::warn!(kg, path = %path.display(), "index data missing, using empty index");
        Ok(Arc::new(TsvIndex::empty()))
    }
}

/// The manager for `kg`, or a model-visible error naming the valid options.
pub fn find_manager<'a>(managers: &'a [Arc<KgManager>], kg: &str) -> Result<&'a Arc<KgManager>> {
    managers.iter().find(|m| m.kg == kg).ok_or_else(|| {
        let kgs: Vec<&str> = managers.iter().map(|m| m.kg.as_str()).collect();
        Error::FunctionCall(format!(
            "Unknown knowledge graph {kg}, must be one of {}",
            kgs.join(", ")
        ))
    })
}

/// The KG block of the system prompt: name, endpoint, per-KG notes.
pub fn format_kgs(managers: &[Arc<KgManager>]) -> String {
    managers
        .iter()
        .map(|manager| {
            format!(
                "- {} (SPARQL endpoint at {})\n  Notes:\n{}",
                manager.kg,
                manager.endpoint,
                format_notes(&manager.notes, 2, false),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Union of all managers' prefixes; later managers win on conflicts.
pub fn merged_prefixes(managers: &[Arc<KgManager>]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for manager in managers {
        merged.extend(manager.prefixes.clone());
    }
    merged
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::TsvIndex;

    pub(crate) fn test_manager(kg: &str) -> Arc<KgManager> {
        let mut prefixes = common_prefixes();
        prefixes.insert("wd".into(), "http://www.wikidata.org/entity/".into());
        prefixes.insert("wdt".into(), "http://www.wikidata.org/prop/direct/".into());
        Arc::new(KgManager {
            kg: kg.to_string(),
            endpoint: format!("http://localhost/{kg}"),
            prefixes,
            notes: vec!["labels use rdfs:label".into()],
            entities: Arc::new(TsvIndex::parse("wd:Q90\tParis\t\t")),
            properties: Arc::new(TsvIndex::parse("wdt:P36\tcapital\t\t")),
            example_index: None,
        })
    }

    #[test]
    fn find_manager_errors_name_options() {
        let managers = vec![test_manager("wikidata")];
        assert!(find_manager(&managers, "wikidata").is_ok());
        let err = find_manager(&managers, "dblp").unwrap_err();
        assert!(err.to_string().contains("must be one of wikidata"));
    }

    #[test]
    fn format_kgs_lists_notes() {
        let managers = vec![test_manager("wikidata")];
        let fmt = format_kgs(&managers);
        assert!(fmt.starts_with("- wikidata (SPARQL endpoint at http://localhost/wikidata)"));
        assert!(fmt.contains("labels use rdfs:label"));
    }

    #[test]
    fn shorten_uses_kg_prefixes() {
        let manager = test_manager("wikidata");
        assert_eq!(
            manager.shorten("http://www.wikidata.org/entity/Q90"),
            "wd:Q90"
        );
    }

    #[test]
    fn loads_from_index_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let kg_dir = tmp.path().join("testkg");
        std::fs::create_dir_all(kg_dir.join("entities")).unwrap();
        std::fs::write(
            kg_dir.join("prefixes.json"),
            r#"{"ex": "http://example.org/"}"#,
        )
        .unwrap();
        std::fs::write(kg_dir.join("notes.json"), r#"["a note"]"#).unwrap();
        std::fs::write(kg_dir.join("entities").join("data.tsv"), "ex:1\tone\t\t").unwrap();

        std::env::set_var("GRASP_INDEX_DIR", tmp.path());
        let kgs = available_knowledge_graphs();
        let manager = KgManager::load(&KgConfig::named("testkg")).unwrap();
        std::env::remove_var("GRASP_INDEX_DIR");

        assert_eq!(kgs, vec!["testkg"]);
        assert_eq!(manager.notes, vec!["a note"]);
        assert_eq!(manager.prefixes.get("ex").unwrap(), "http://example.org/");
        assert_eq!(manager.entities.len(), 1);
        assert!(manager.properties.is_empty());
        assert!(manager.example_index.is_none());
    }
}
