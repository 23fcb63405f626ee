//! The KG half of the tool registry: function schemas per named set and the
//! handlers behind them. Handlers add every identifier they surface to the
//! Known Set; errors are returned as `Error::FunctionCall` and become
//! model-visible strings upstream.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use grasp_domain::config::{FnSet, GraspConfig};
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::format_enumerate;
use grasp_domain::model::FunctionSpec;

use crate::items::sparql_items;
use crate::known::KnownSet;
use crate::manager::{find_manager, KgManager};
use crate::sparql::{format_sparql_block, SparqlClient, SparqlResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn kg_names(managers: &[Arc<KgManager>]) -> Vec<String> {
    managers.iter().map(|m| m.kg.clone()).collect()
}

/// Function specs of the named KG function set.
pub fn kg_functions(managers: &[Arc<KgManager>], config: &GraspConfig) -> Vec<FunctionSpec> {
    let kgs = kg_names(managers);
    let kg_param = json!({
        "type": "string",
        "enum": kgs,
        "description": "The knowledge graph to use",
    });

    let mut fns = vec![
        FunctionSpec::new(
            "search_entities",
            format!(
                "Search for entities in the specified knowledge graph. \
                 At most {} matches are returned, together with their labels, \
                 aliases, and additional information.",
                config.search_top_k
            ),
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param.clone(),
                    "query": {
                        "type": "string",
                        "description": "The search query",
                    },
                },
                "required": ["kg", "query"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "search_properties",
            format!(
                "Search for properties in the specified knowledge graph. \
                 At most {} matches are returned, together with their labels, \
                 aliases, and additional information.",
                config.search_top_k
            ),
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param.clone(),
                    "query": {
                        "type": "string",
                        "description": "The search query",
                    },
                },
                "required": ["kg", "query"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "execute",
            format!(
                "Execute a SPARQL query against the specified knowledge graph \
                 and return its result. At most {} rows and {} columns of the \
                 result are shown.",
                config.result_max_rows, config.result_max_columns
            ),
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param.clone(),
                    "sparql": {
                        "type": "string",
                        "description": "The SPARQL query to execute",
                    },
                },
                "required": ["kg", "sparql"],
                "additionalProperties": false,
            }),
        ),
    ];

    if config.fn_set == FnSet::SearchExtended {
        fns.push(FunctionSpec::new(
            "list_instances",
            format!(
                "List up to {} instances of the given class or type in the \
                 specified knowledge graph. Useful to understand how entities \
                 of a certain kind are modeled.",
                config.list_k
            ),
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param.clone(),
                    "type": {
                        "type": "string",
                        "description": "The class or type whose instances to list, \
as a full or prefixed IRI",
                    },
                },
                "required": ["kg", "type"],
                "additionalProperties": false,
            }),
        ));
        fns.push(FunctionSpec::new(
            "get_infos",
            "Get labels, aliases, and additional information for the given \
             entities or properties in the specified knowledge graph.",
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param,
                    "identifiers": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "description": "A full or prefixed IRI",
                        },
                        "description": "The identifiers to look up",
                    },
                },
                "required": ["kg", "identifiers"],
                "additionalProperties": false,
            }),
        ));
    }

    fns
}

/// Names handled by [`call_kg_function`] for the given set.
pub fn is_kg_function(name: &str, fn_set: FnSet) -> bool {
    match name {
        "search_entities" | "search_properties" | "execute" => true,
        "list_instances" | "get_infos" => fn_set == FnSet::SearchExtended,
        _ => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    kg: String,
    query: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteArgs {
    kg: String,
    sparql: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    kg: String,
    #[serde(rename = "type")]
    class: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InfoArgs {
    kg: String,
    identifiers: Vec<String>,
}

fn invalid_args(e: serde_json::Error) -> Error {
    Error::FunctionCall(format!("Invalid arguments: {e}"))
}

/// Dispatch one KG function call.
pub async fn call_kg_function(
    managers: &[Arc<KgManager>],
    client: &dyn SparqlClient,
    config: &GraspConfig,
    name: &str,
    args: &Value,
    known: &mut KnownSet,
) -> Result<String> {
    match name {
        "search_entities" => {
            let args: SearchArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
            let manager = find_manager(managers, &args.kg)?;
            search(manager, &args.query, config.search_top_k, known, true)
        }
        "search_properties" => {
            let args: SearchArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
            let manager = find_manager(managers, &args.kg)?;
            search(manager, &args.query, config.search_top_k, known, false)
        }
        "execute" => {
            let args: ExecuteArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
            let manager = find_manager(managers, &args.kg)?;
            execute_sparql(
                manager,
                client,
                &args.sparql,
                config,
                Some(known),
                config.know_before_use,
            )
            .await
        }
        "list_instances" => {
            let args: ListArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
            let manager = find_manager(managers, &args.kg)?;
            list_instances(manager, client, &args.class, config, known).await
        }
        "get_infos" => {
            let args: InfoArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
            let manager = find_manager(managers, &args.kg)?;
            get_infos(manager, &args.identifiers, known)
        }
        _ => Err(Error::FunctionCall(format!("Unknown function: {name}"))),
    }
}

fn search(
    manager: &KgManager,
    query: &str,
    top_k: usize,
    known: &mut KnownSet,
    entities: bool,
) -> Result<String> {
    let index = if entities {
        &manager.entities
    } else {
        &manager.properties
    };

    let hits = index.search(query, top_k);
    if hits.is_empty() {
        return Ok(format!("No matches for query \"{query}\""));
    }

    known.extend(hits.iter().map(|hit| hit.identifier.as_str()));

    Ok(format_enumerate(
        hits.iter().map(|hit| hit.selection_string()),
        0,
    ))
}

/// Execute a query with row/column caps. Adds result IRIs to `known` when
/// given; with `know_before_use`, every IRI the query mentions must already
/// be known.
pub async fn execute_sparql(
    manager: &KgManager,
    client: &dyn SparqlClient,
    sparql: &str,
    config: &GraspConfig,
    known: Option<&mut KnownSet>,
    know_before_use: bool,
) -> Result<String> {
    if know_before_use {
        let known_ref = known
            .as_deref()
            .ok_or_else(|| Error::Other("know-before-use requires a known set".into()))?;
        let unknown: Vec<String> = sparql_items(sparql, &manager.prefixes)
            .into_iter()
            .filter(|item| !known_ref.contains(item))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::FunctionCall(format!(
                "The following identifiers are not known from previous \
                 function call results: {}. This does not mean they are \
                 invalid, but you should verify that they indeed exist in \
                 the knowledge graphs first.",
                unknown.join(", ")
            )));
        }
    }

    let body = client.query(&manager.endpoint, sparql).await.map_err(|e| {
        Error::FunctionCall(format!("Failed to execute SPARQL query:\n{e}"))
    })?;

    let shorten = |iri: &str| manager.shorten(iri);
    let result = SparqlResult::from_json(&body, &shorten)
        .map_err(|e| Error::FunctionCall(format!("Failed to parse SPARQL result:\n{e}")))?;

    if let Some(known) = known {
        for iri in result.iris() {
            known.insert(iri);
            known.insert(&manager.shorten(iri));
        }
    }

    Ok(result.format(config.result_max_rows, config.result_max_columns))
}

async fn list_instances(
    manager: &KgManager,
    client: &dyn SparqlClient,
    class: &str,
    config: &GraspConfig,
    known: &mut KnownSet,
) -> Result<String> {
    let class_iri = manager
        .expand(class)
        .ok_or_else(|| Error::FunctionCall(format!("{class} is not a valid IRI")))?;

    // Wikidata models instance-of as wdt:P31; everything else uses rdf:type.
    let instance_of = if manager.kg == "wikidata" {
        "<http://www.wikidata.org/prop/direct/P31>"
    } else {
        "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>"
    };

    let sparql = format!(
        "SELECT ?instance WHERE {{ ?instance {instance_of} <{class_iri}> }} LIMIT {}",
        config.list_k
    );

    execute_sparql(manager, client, &sparql, config, Some(known), false).await
}

fn get_infos(manager: &KgManager, identifiers: &[String], known: &mut KnownSet) -> Result<String> {
    if identifiers.is_empty() {
        return Err(Error::FunctionCall("No identifiers given".into()));
    }

    let mut lines = Vec::new();
    for identifier in identifiers {
        let hit = manager
            .entities
            .get(identifier)
            .or_else(|| manager.properties.get(identifier));
        match hit {
            Some(hit) => {
                known.insert(&hit.identifier);
                lines.push(hit.selection_string());
            }
            None => lines.push(format!("{identifier}: no information found")),
        }
    }

    Ok(format_enumerate(lines, 0))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output enrichment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute a final query and collect its used entities and properties.
/// Execution failures land in the result text instead of failing the output.
pub async fn prepare_sparql_result(
    managers: &[Arc<KgManager>],
    client: &dyn SparqlClient,
    kg: &str,
    sparql: &str,
    config: &GraspConfig,
    mut known: Option<&mut KnownSet>,
) -> Result<(String, String, String)> {
    let manager = find_manager(managers, kg)?;

    let result = match execute_sparql(
        manager,
        client,
        sparql,
        config,
        known.as_deref_mut(),
        false,
    )
    .await
    {
        Ok(result) => result,
        Err(e) => format!("Failed to execute SPARQL query:\n{e}"),
    };

    let items = sparql_items(sparql, &manager.prefixes);
    if let Some(known) = known {
        known.extend(items.iter().map(String::as_str));
    }
    let selections = if items.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = items
            .iter()
            .map(|item| {
                let hit = manager
                    .entities
                    .get(item)
                    .or_else(|| manager.properties.get(item));
                match hit {
                    Some(hit) => hit.selection_string(),
                    None => item.clone(),
                }
            })
            .collect();
        format!(
            "Used entities and properties:\n{}",
            grasp_domain::fmt::format_list(lines, 0)
        )
    };

    Ok((sparql.trim().to_string(), selections, result))
}

/// Render the enriched output block for answers embedding a query.
pub fn format_sparql_result(kg: &str, sparql: &str, selections: &str, result: &str) -> String {
    format_sparql_block(kg, sparql, selections, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::test_manager;
    use serde_json::json;

    struct StaticClient {
        body: Value,
    }

    #[async_trait::async_trait]
    impl SparqlClient for StaticClient {
        async fn query(&self, _endpoint: &str, _sparql: &str) -> Result<Value> {
            Ok(self.body.clone())
        }
    }

    fn one_row_body() -> Value {
        json!({
            "head": {"vars": ["x"]},
            "results": {"bindings": [
                {"x": {"type": "uri", "value": "http://www.wikidata.org/entity/Q90"}},
            ]},
        })
    }

    fn config() -> GraspConfig {
        GraspConfig::default()
    }

    #[tokio::test]
    async fn search_updates_known() {
        let managers = vec![test_manager("wikidata")];
        let mut known = KnownSet::new();
        let result = call_kg_function(
            &managers,
            &StaticClient { body: json!({}) },
            &config(),
            "search_entities",
            &json!({"kg": "wikidata", "query": "paris"}),
            &mut known,
        )
        .await
        .unwrap();
        assert!(result.contains("wd:Q90 (Paris)"));
        assert!(known.contains("wd:Q90"));
    }

    #[tokio::test]
    async fn execute_updates_known_with_both_forms() {
        let managers = vec![test_manager("wikidata")];
        let mut known = KnownSet::new();
        let result = call_kg_function(
            &managers,
            &StaticClient {
                body: one_row_body(),
            },
            &config(),
            "execute",
            &json!({"kg": "wikidata", "sparql": "SELECT ?x WHERE { ?x ?p ?o }"}),
            &mut known,
        )
        .await
        .unwrap();
        assert!(result.contains("wd:Q90"));
        assert!(known.contains("wd:Q90"));
        assert!(known.contains("http://www.wikidata.org/entity/Q90"));
    }

    #[tokio::test]
    async fn know_before_use_blocks_unknown_iris() {
        let managers = vec![test_manager("wikidata")];
        let mut cfg = config();
        cfg.know_before_use = true;
        let mut known = KnownSet::new();

        let err = call_kg_function(
            &managers,
            &StaticClient {
                body: one_row_body(),
            },
            &cfg,
            "execute",
            &json!({"kg": "wikidata", "sparql": "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }"}),
            &mut known,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("wd:Q142"));

        // once known, the same query passes
        known.extend(["wd:Q142", "wdt:P36"]);
        let result = call_kg_function(
            &managers,
            &StaticClient {
                body: one_row_body(),
            },
            &cfg,
            "execute",
            &json!({"kg": "wikidata", "sparql": "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }"}),
            &mut known,
        )
        .await
        .unwrap();
        assert!(result.contains("wd:Q90"));
    }

    #[tokio::test]
    async fn invalid_args_are_function_errors() {
        let managers = vec![test_manager("wikidata")];
        let mut known = KnownSet::new();
        let err = call_kg_function(
            &managers,
            &StaticClient { body: json!({}) },
            &config(),
            "search_entities",
            &json!({"kg": "wikidata"}),
            &mut known,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::FunctionCall(_)));
    }

    #[tokio::test]
    async fn get_infos_reports_missing() {
        let managers = vec![test_manager("wikidata")];
        let mut known = KnownSet::new();
        let result = call_kg_function(
            &managers,
            &StaticClient { body: json!({}) },
            &config(),
            "get_infos",
            &json!({"kg": "wikidata", "identifiers": ["wd:Q90", "wd:Q404"]}),
            &mut known,
        )
        .await
        .unwrap();
        assert!(result.contains("wd:Q90 (Paris)"));
        assert!(result.contains("wd:Q404: no information found"));
        assert!(known.contains("wd:Q90"));
        assert!(!known.contains("wd:Q404"));
    }

    #[test]
    fn fn_set_gates_extended_functions() {
        let managers = vec![test_manager("wikidata")];
        let mut cfg = config();
        let names = |cfg: &GraspConfig| -> Vec<String> {
            kg_functions(&managers, cfg)
                .into_iter()
                .map(|f| f.name)
                .collect()
        };
        assert!(names(&cfg).contains(&"list_instances".to_string()));

        cfg.fn_set = FnSet::Search;
        assert!(!names(&cfg).contains(&"list_instances".to_string()));
        assert!(is_kg_function("execute", FnSet::Search));
        assert!(!is_kg_function("get_infos", FnSet::Search));
    }

    #[tokio::test]
    async fn prepare_sparql_result_collects_selections() {
        let managers = vec![test_manager("wikidata")];
        let client = StaticClient {
            body: one_row_body(),
        };
        let mut known = KnownSet::new();
        let (sparql, selections, result) = prepare_sparql_result(
            &managers,
            &client,
            "wikidata",
            "SELECT ?x WHERE { wd:Q90 wdt:P36 ?x }",
            &config(),
            Some(&mut known),
        )
        .await
        .unwrap();
        assert!(sparql.starts_with("SELECT"));
        assert!(selections.contains("Used entities and properties"));
        assert!(selections.contains("wd:Q90 (Paris)"));
        assert!(selections.contains("wdt:P36 (capital)"));
        assert!(result.contains("wd:Q90"));
        assert!(known.contains("wdt:P36"));
    }
}
