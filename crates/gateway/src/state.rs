//! Shared application state: configuration, loaded KG managers, the model
//! bridge, and the global connection cap.

use std::sync::Arc;

use tokio::sync::Semaphore;

use grasp_domain::config::AppConfig;
use grasp_domain::error::{Error, Result};
use grasp_kg::manager::load_general_notes;
use grasp_kg::{HttpSparqlClient, KgManager, SparqlClient};
use grasp_model::{HttpBridge, ModelBridge};

use crate::runtime::GenerationDeps;

/// Shared application state passed to all API handlers.
///
/// KG managers and notes are loaded once and treated as read-only; the only
/// cross-request mutable state is the connection semaphore.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub managers: Arc<Vec<Arc<KgManager>>>,
    pub general_notes: Arc<Vec<String>>,
    pub bridge: Arc<dyn ModelBridge>,
    pub sparql: Arc<dyn SparqlClient>,
    pub connections: Arc<Semaphore>,
}

impl AppState {
    /// Load managers and notes and wire up the production bridge/client.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        let mut managers = Vec::new();
        for kg_config in &config.generation.knowledge_graphs {
            let manager = Arc::new(KgManager::load(kg_config)?);
            tracing::info!(
                kg = %manager.kg,
                endpoint = %manager.endpoint,
                entities = manager.entities.len(),
                properties = manager.properties.len(),
                examples = manager.example_index.is_some(),
                "knowledge graph manager ready"
            );
            managers.push(manager);
        }

        let general_notes = load_general_notes(config.generation.notes_file.as_deref())?;
        tracing::info!(notes = general_notes.len(), "general notes loaded");

        let bridge = Arc::new(HttpBridge::new()?);
        let sparql = Arc::new(HttpSparqlClient::new()?);
        let connections = Arc::new(Semaphore::new(config.server.max_connections));

        Ok(Self {
            config: Arc::new(config),
            managers: Arc::new(managers),
            general_notes: Arc::new(general_notes),
            bridge,
            sparql,
            connections,
        })
    }

    /// Names of the configured knowledge graphs.
    pub fn kg_names(&self) -> Vec<String> {
        self.managers.iter().map(|m| m.kg.clone()).collect()
    }

    /// Build the per-request dependencies for a KG selection. Fails when the
    /// selection is empty or names an unknown KG.
    pub fn deps_for(&self, selection: &[String]) -> Result<GenerationDeps> {
        if selection.is_empty() {
            return Err(Error::Config(
                "Unsupported knowledge graph selection".into(),
            ));
        }
        let mut managers = Vec::new();
        for kg in selection {
            let manager = self
                .managers
                .iter()
                .find(|m| &m.kg == kg)
                .ok_or_else(|| Error::Config("Unsupported knowledge graph selection".into()))?;
            managers.push(manager.clone());
        }

        Ok(GenerationDeps {
            bridge: self.bridge.clone(),
            client: self.sparql.clone(),
            managers,
            general_notes: (*self.general_notes).clone(),
            config: Arc::new(self.config.generation.clone()),
        })
    }
}
