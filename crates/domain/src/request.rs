//! Client-facing request shapes, including the stateless continuation
//! contract: clients resume a session by echoing back the messages and known
//! identifiers of a previous output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Message;

/// The tasks a generation can run. `exploration` is reachable through the
/// library and CLI note-taking path, not the HTTP task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    #[serde(rename = "sparql-qa")]
    SparqlQa,
    #[serde(rename = "general-qa")]
    GeneralQa,
    #[serde(rename = "cea")]
    Cea,
    #[serde(rename = "wikidata-query-logs")]
    WikidataQueryLogs,
    #[serde(rename = "exploration")]
    Exploration,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Task::SparqlQa => "sparql-qa",
            Task::GeneralQa => "general-qa",
            Task::Cea => "cea",
            Task::WikidataQueryLogs => "wikidata-query-logs",
            Task::Exploration => "exploration",
        };
        f.write_str(name)
    }
}

/// Continuation state from a previous request. The server is stateless: it
/// adopts `messages[1..]` verbatim (the system message is rebuilt to reflect
/// the current KG selection and tool set) and seeds the Known Set from
/// `known`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Past {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub known: Vec<String>,
}

/// One generation request as sent to `/run` or per-frame on `/live`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub task: Task,
    pub input: Value,
    pub knowledge_graphs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub past: Option<Past>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_wire_names() {
        assert_eq!(
            serde_json::to_value(Task::WikidataQueryLogs).unwrap(),
            serde_json::json!("wikidata-query-logs")
        );
        let t: Task = serde_json::from_value(serde_json::json!("sparql-qa")).unwrap();
        assert_eq!(t, Task::SparqlQa);
    }

    #[test]
    fn request_parses_table_input() {
        let req: Request = serde_json::from_value(serde_json::json!({
            "task": "cea",
            "input": {"header": ["Name"], "data": [["Paris"]]},
            "knowledge_graphs": ["wikidata"],
        }))
        .unwrap();
        assert_eq!(req.task, Task::Cea);
        assert!(req.past.is_none());
        assert_eq!(req.knowledge_graphs, vec!["wikidata"]);
    }
}
