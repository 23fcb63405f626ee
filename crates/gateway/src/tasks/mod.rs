//! Task adapters: the plug-in surface that specializes the agent loop per
//! task. One adapter per task; the loop holds exactly one per request.

pub mod cea;
pub mod exploration;
pub mod general_qa;
pub mod sparql_qa;
pub mod wikidata_query_logs;

use std::sync::Arc;

use serde_json::Value;

use grasp_domain::config::GraspConfig;
use grasp_domain::error::Result;
use grasp_domain::fmt::{format_list, format_notes, format_prefixes};
use grasp_domain::model::{FunctionSpec, Message};
use grasp_domain::request::Task;
use grasp_kg::{format_kgs, merged_prefixes, KgManager, KnownSet, SparqlClient};

pub use cea::AnnotationState;
pub use exploration::ExplorationState;

/// Read-only environment handed to every adapter hook.
pub struct TaskEnv<'a> {
    pub managers: &'a [Arc<KgManager>],
    pub client: &'a dyn SparqlClient,
    pub config: &'a GraspConfig,
    pub general_notes: &'a [String],
}

/// Per-task state owned by the agent loop and mutated only through adapter
/// dispatch.
pub enum TaskState {
    None,
    Cea(AnnotationState),
    Exploration(ExplorationState),
}

/// The plug-in contract. All hooks are pure except `call`, which mutates the
/// task state and the Known Set through the dispatcher.
#[async_trait::async_trait]
pub trait TaskAdapter: Send + Sync {
    /// Role-priming paragraph at the top of the system prompt.
    fn system_info(&self, config: &GraspConfig) -> String;

    /// Task rules appended after the general rules.
    fn rules(&self) -> Vec<String>;

    /// Normalize the client input into the first user message and the
    /// initial task state.
    async fn input_and_state(&self, raw: &Value, env: &TaskEnv<'_>) -> Result<(String, TaskState)>;

    /// Task function schemas added to the KG function set.
    fn functions(&self, env: &TaskEnv<'_>) -> Vec<FunctionSpec>;

    /// Whether `name` is handled by this adapter's `call`.
    fn is_task_function(&self, name: &str) -> bool;

    /// Dispatch one task function call.
    async fn call(
        &self,
        env: &TaskEnv<'_>,
        name: &str,
        args: &Value,
        state: &mut TaskState,
        known: &mut KnownSet,
    ) -> Result<String>;

    /// Tool names whose successful invocation ends the loop.
    fn is_terminal(&self, name: &str) -> bool;

    /// Extract the final structured output, or `None` when there is none.
    async fn output(
        &self,
        env: &TaskEnv<'_>,
        messages: &[Message],
        state: &TaskState,
    ) -> Option<Value>;

    /// System prompt for the feedback engine; `None` disables feedback for
    /// this task.
    fn feedback_system(&self, env: &TaskEnv<'_>) -> Option<String> {
        let _ = env;
        None
    }

    /// User-side feedback prompt built from past inputs and the output.
    fn feedback_prompt(&self, inputs: &[String], output: &Value) -> Option<String> {
        let _ = (inputs, output);
        None
    }
}

/// The adapter for a task.
pub fn adapter_for(task: Task) -> &'static dyn TaskAdapter {
    match task {
        Task::SparqlQa => &sparql_qa::SparqlQaTask,
        Task::GeneralQa => &general_qa::GeneralQaTask,
        Task::Cea => &cea::CeaTask,
        Task::WikidataQueryLogs => &wikidata_query_logs::WikidataQueryLogsTask,
        Task::Exploration => &exploration::ExplorationTask,
    }
}

/// Rules shared by all tasks.
pub fn general_rules() -> Vec<String> {
    vec![
        "Explain your thought process before and after each step and function call.".into(),
        "Do not just use or make up entity or property identifiers without verifying \
         their existence in the knowledge graphs first."
            .into(),
        "Do not use \"SERVICE wikibase:label { bd:serviceParam wikibase:language ...\" \
         in SPARQL queries. It is not SPARQL standard and unsupported by the used \
         QLever SPARQL endpoints. Use rdfs:label or similar properties to get labels \
         instead."
            .into(),
    ]
}

/// Build the full system prompt for a request.
pub fn system_instructions(adapter: &dyn TaskAdapter, env: &TaskEnv<'_>) -> String {
    let mut rules = general_rules();
    rules.extend(adapter.rules());

    format!(
        "{}\n\n\
         You have access to the following knowledge graphs:\n{}\n\n\
         You are provided with the following notes across all knowledge graphs:\n{}\n\n\
         You can use the following SPARQL prefixes implicitly in all functions:\n{}\n\n\
         You should follow these rules:\n{}",
        adapter.system_info(env.config),
        format_kgs(env.managers),
        format_notes(env.general_notes, 0, false),
        format_prefixes(&merged_prefixes(env.managers)),
        format_list(rules, 0),
    )
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use grasp_domain::error::Result;
    use grasp_kg::index::TsvIndex;
    use serde_json::json;
    use std::collections::BTreeMap;

    pub fn test_manager(kg: &str) -> Arc<KgManager> {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("rdfs".into(), "http://www.w3.org/2000/01/rdf-schema#".into());
        prefixes.insert("wd".into(), "http://www.wikidata.org/entity/".into());
        prefixes.insert("wdt".into(), "http://www.wikidata.org/prop/direct/".into());
        Arc::new(KgManager {
            kg: kg.to_string(),
            endpoint: format!("http://localhost/{kg}"),
            prefixes,
            notes: Vec::new(),
            entities: Arc::new(TsvIndex::parse(
                "wd:Q90\tParis\tCity of Light\tcapital of France\n\
                 wd:Q142\tFrance\t\tcountry",
            )),
            properties: Arc::new(TsvIndex::parse("wdt:P36\tcapital\t\t")),
            example_index: None,
        })
    }

    /// SPARQL client returning one fixed binding row.
    pub struct StaticClient;

    #[async_trait::async_trait]
    impl SparqlClient for StaticClient {
        async fn query(&self, _endpoint: &str, _sparql: &str) -> Result<serde_json::Value> {
            Ok(json!({
                "head": {"vars": ["x"]},
                "results": {"bindings": [
                    {"x": {"type": "uri", "value": "http://www.wikidata.org/entity/Q90"}},
                ]},
            }))
        }
    }

    #[test]
    fn system_prompt_contains_all_sections() {
        let managers = vec![test_manager("wikidata")];
        let config = GraspConfig::default();
        let notes = vec!["general note".to_string()];
        let env = TaskEnv {
            managers: &managers,
            client: &StaticClient,
            config: &config,
            general_notes: &notes,
        };
        let prompt = system_instructions(adapter_for(Task::SparqlQa), &env);
        assert!(prompt.contains("You have access to the following knowledge graphs:"));
        assert!(prompt.contains("- wikidata"));
        assert!(prompt.contains("general note"));
        assert!(prompt.contains("wd: http://www.wikidata.org/entity/"));
        assert!(prompt.contains("Explain your thought process"));
    }
}
