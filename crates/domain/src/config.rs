//! Configuration records. Generation settings are immutable per request; the
//! server settings govern the connection envelope.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model / decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which LLM API wire shape to use. When unset, `responses` is selected for
/// OpenAI-compatible model ids and `completions` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Completions,
    Responses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_endpoint: Option<String>,

    /// Free-form extension map merged into the request body. Unsupported
    /// parameters are dropped by the backend, not by us.
    #[serde(default)]
    pub model_kwargs: BTreeMap<String, Value>,

    // decoding parameters
    #[serde(default = "d_one")]
    pub temperature: Option<f64>,
    #[serde(default = "d_one")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiKind>,
    #[serde(default)]
    pub parallel_tool_calls: bool,

    // completion parameters
    /// Enough headroom until the next function call, reasoning included.
    #[serde(default = "d_max_completion_tokens")]
    pub max_completion_tokens: u32,
    /// Per-call timeout in seconds.
    #[serde(default = "d_completion_timeout")]
    pub completion_timeout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: None,
            model: d_model(),
            model_endpoint: None,
            model_kwargs: BTreeMap::new(),
            temperature: d_one(),
            top_p: d_one(),
            reasoning_effort: None,
            reasoning_summary: None,
            api: None,
            parallel_tool_calls: false,
            max_completion_tokens: d_max_completion_tokens(),
            completion_timeout: d_completion_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Named KG function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FnSet {
    Search,
    SearchExtended,
}

/// Example injection mode for SPARQL-QA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceExamples {
    Random,
    Similar,
}

/// Per-KG configuration. Index artifacts live under
/// `<index root>/<kg>/{entities,properties,examples}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KgConfig {
    pub kg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_index: Option<PathBuf>,
}

impl KgConfig {
    pub fn named(kg: impl Into<String>) -> Self {
        Self {
            kg: kg.into(),
            endpoint: None,
            entities_type: None,
            properties_type: None,
            notes_file: None,
            example_index: None,
        }
    }
}

/// Task-specific knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// CEA: rows of context kept around the allowed rows when trimming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_rows: Option<usize>,
    /// WDQL: upper bound on generated questions per query.
    #[serde(default = "d_max_questions")]
    pub max_questions: usize,
    /// Exploration: questions to explore per round.
    #[serde(default = "d_questions_per_round")]
    pub questions_per_round: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            context_rows: None,
            max_questions: d_max_questions(),
            questions_per_round: d_questions_per_round(),
        }
    }
}

/// The immutable per-request generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraspConfig {
    #[serde(flatten)]
    pub model: ModelConfig,

    #[serde(default = "d_fn_set")]
    pub fn_set: FnSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_file: Option<PathBuf>,

    #[serde(default = "d_kgs")]
    pub knowledge_graphs: Vec<KgConfig>,

    #[serde(default)]
    pub task: TaskOptions,

    // kg function parameters
    #[serde(default = "d_ten")]
    pub search_top_k: usize,
    /// Total rows kept in SPARQL results: first half top, second half bottom.
    #[serde(default = "d_ten")]
    pub result_max_rows: usize,
    #[serde(default = "d_ten")]
    pub result_max_columns: usize,
    #[serde(default = "d_ten")]
    pub list_k: usize,
    /// Require that all IRIs used in queries and terminal calls were
    /// previously seen in tool results.
    #[serde(default)]
    pub know_before_use: bool,

    // interaction parameters
    #[serde(default = "d_max_steps")]
    pub max_steps: usize,

    // example parameters
    #[serde(default = "d_num_examples")]
    pub num_examples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_examples: Option<ForceExamples>,

    // feedback loop
    #[serde(default)]
    pub feedback: bool,
    #[serde(default = "d_max_feedbacks")]
    pub max_feedbacks: usize,

    // note bounds (exploration / note taking)
    #[serde(default = "d_max_notes")]
    pub max_notes: usize,
    #[serde(default = "d_max_note_length")]
    pub max_note_length: usize,
}

impl Default for GraspConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            fn_set: d_fn_set(),
            notes_file: None,
            knowledge_graphs: d_kgs(),
            task: TaskOptions::default(),
            search_top_k: d_ten(),
            result_max_rows: d_ten(),
            result_max_columns: d_ten(),
            list_k: d_ten(),
            know_before_use: false,
            max_steps: d_max_steps(),
            num_examples: d_num_examples(),
            force_examples: None,
            feedback: false,
            max_feedbacks: d_max_feedbacks(),
            max_notes: d_max_notes(),
            max_note_length: d_max_note_length(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_ten")]
    pub max_connections: usize,
    /// Seconds before a generation is aborted.
    #[serde(default = "d_300")]
    pub max_generation_time: u64,
    /// Seconds of client inactivity before a live socket is closed.
    #[serde(default = "d_300")]
    pub max_idle_time: u64,
    /// Directory for `/save` state blobs. `/save` and `/load` return errors
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
    /// Append terminal outputs as JSONL to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_outputs: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_connections: d_ten(),
            max_generation_time: d_300(),
            max_idle_time: d_300(),
            save_dir: None,
            log_outputs: None,
        }
    }
}

/// Top-level configuration file: `[generation]` and `[server]` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GraspConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model() -> String {
    "openai/gpt-5-mini".into()
}
fn d_one() -> Option<f64> {
    Some(1.0)
}
fn d_max_completion_tokens() -> u32 {
    8192
}
fn d_completion_timeout() -> f64 {
    120.0
}
fn d_fn_set() -> FnSet {
    FnSet::SearchExtended
}
fn d_kgs() -> Vec<KgConfig> {
    vec![KgConfig::named("wikidata")]
}
fn d_ten() -> usize {
    10
}
fn d_max_steps() -> usize {
    100
}
fn d_num_examples() -> usize {
    3
}
fn d_max_feedbacks() -> usize {
    2
}
fn d_max_notes() -> usize {
    16
}
fn d_max_note_length() -> usize {
    512
}
fn d_max_questions() -> usize {
    5
}
fn d_questions_per_round() -> usize {
    3
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    6789
}
fn d_300() -> u64 {
    300
}
