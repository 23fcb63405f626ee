//! Defaults of the configuration records, loaded from minimal TOML the way
//! the CLI does it.

use grasp_domain::config::{AppConfig, FnSet, GraspConfig, ServerConfig};

#[test]
fn generation_defaults() {
    let config = GraspConfig::default();
    assert_eq!(config.model.model, "openai/gpt-5-mini");
    assert_eq!(config.model.temperature, Some(1.0));
    assert_eq!(config.model.max_completion_tokens, 8192);
    assert_eq!(config.model.completion_timeout, 120.0);
    assert!(!config.model.parallel_tool_calls);
    assert_eq!(config.fn_set, FnSet::SearchExtended);
    assert_eq!(config.search_top_k, 10);
    assert_eq!(config.result_max_rows, 10);
    assert_eq!(config.result_max_columns, 10);
    assert_eq!(config.list_k, 10);
    assert!(!config.know_before_use);
    assert_eq!(config.max_steps, 100);
    assert_eq!(config.num_examples, 3);
    assert!(config.force_examples.is_none());
    assert!(!config.feedback);
    assert_eq!(config.max_feedbacks, 2);
    assert_eq!(config.max_notes, 16);
    assert_eq!(config.max_note_length, 512);
    assert_eq!(config.knowledge_graphs.len(), 1);
    assert_eq!(config.knowledge_graphs[0].kg, "wikidata");
}

#[test]
fn server_defaults() {
    let server = ServerConfig::default();
    assert_eq!(server.host, "0.0.0.0");
    assert_eq!(server.port, 6789);
    assert_eq!(server.max_connections, 10);
    assert_eq!(server.max_generation_time, 300);
    assert_eq!(server.max_idle_time, 300);
    assert!(server.save_dir.is_none());
}

#[test]
fn empty_toml_matches_defaults() {
    let config: AppConfig = toml::from_str("").expect("empty config parses");
    assert_eq!(config.generation.max_steps, 100);
    assert_eq!(config.server.port, 6789);
}

#[test]
fn partial_toml_overrides() {
    let raw = r#"
[generation]
model = "other/model"
max_steps = 5
feedback = true

[[generation.knowledge_graphs]]
kg = "freebase"
endpoint = "http://localhost:7001"

[server]
port = 9000
max_connections = 2
"#;
    let config: AppConfig = toml::from_str(raw).expect("config parses");
    assert_eq!(config.generation.model.model, "other/model");
    assert_eq!(config.generation.max_steps, 5);
    assert!(config.generation.feedback);
    assert_eq!(config.generation.knowledge_graphs[0].kg, "freebase");
    assert_eq!(
        config.generation.knowledge_graphs[0].endpoint.as_deref(),
        Some("http://localhost:7001")
    );
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.max_connections, 2);
    // untouched sections keep their defaults
    assert_eq!(config.generation.model.max_completion_tokens, 8192);
    assert_eq!(config.server.max_idle_time, 300);
}
