//! Knowledge-graph exploration for note taking: the model explores the KGs,
//! maintains bounded per-KG and general note lists, and stops when done.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::{format_enumerate, format_list, format_notes};
use grasp_domain::model::{FunctionSpec, Message};
use grasp_kg::KnownSet;

use super::{TaskAdapter, TaskEnv, TaskState};

/// The notes record carried through one exploration run. Each generation
/// owns its own copy; nothing is shared across requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorationState {
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub kg_notes: BTreeMap<String, Vec<String>>,
}

impl ExplorationState {
    fn format_kg_notes(&self, enumerated: bool) -> String {
        format_list(
            self.kg_notes.iter().map(|(kg, notes)| {
                format!("{kg}:\n{}", format_notes(notes, 2, enumerated))
            }),
            0,
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Note handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_note(note: &str, max_note_length: usize) -> Result<()> {
    if note.chars().count() > max_note_length {
        return Err(Error::FunctionCall(format!(
            "Note exceeds maximum length of {max_note_length} characters"
        )));
    }
    Ok(())
}

fn add_note(
    notes: &mut Vec<String>,
    note: String,
    max_notes: usize,
    max_note_length: usize,
) -> Result<String> {
    if notes.len() >= max_notes {
        return Err(Error::FunctionCall(format!(
            "Cannot add more than {max_notes} notes"
        )));
    }
    check_note(&note, max_note_length)?;

    notes.push(note);
    Ok(format!(
        "Added note {}: {}",
        notes.len(),
        notes.last().map(String::as_str).unwrap_or_default()
    ))
}

fn delete_note(notes: &mut Vec<String>, num: usize) -> Result<String> {
    if num < 1 || num > notes.len() {
        return Err(Error::FunctionCall("Note number out of range".into()));
    }
    let note = notes.remove(num - 1);
    Ok(format!("Deleted note {num}: {note}"))
}

fn update_note(
    notes: &mut [String],
    num: usize,
    note: String,
    max_note_length: usize,
) -> Result<String> {
    if num < 1 || num > notes.len() {
        return Err(Error::FunctionCall("Note number out of range".into()));
    }
    check_note(&note, max_note_length)?;

    notes[num - 1] = note;
    Ok(format!("Updated note {num}: {}", notes[num - 1]))
}

fn show_notes(notes: &[String]) -> String {
    if notes.is_empty() {
        return "No notes available".into();
    }
    format_enumerate(notes, 0)
}

/// The note-taking function set. Also used by the offline note-taking paths,
/// which share the exploration tool surface.
pub fn note_functions(kgs: &[String]) -> Vec<FunctionSpec> {
    let mut kg_enum: Vec<Value> = kgs.iter().map(|kg| json!(kg)).collect();
    kg_enum.push(Value::Null);
    let kg_param = |action: &str| {
        json!({
            "type": ["string", "null"],
            "enum": kg_enum.clone(),
            "description": format!(
                "The knowledge graph for which to {action} (null for general notes)"
            ),
        })
    };

    vec![
        FunctionSpec::new(
            "add_note",
            "Add a general or knowledge graph specific note.",
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param("add the note"),
                    "note": {
                        "type": "string",
                        "description": "The note to add",
                    },
                },
                "required": ["kg", "note"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "delete_note",
            "Delete a general or knowledge graph specific note.",
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param("delete the note"),
                    "num": {
                        "type": "number",
                        "description": "The number of the note to delete",
                    },
                },
                "required": ["kg", "num"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "update_note",
            "Update a general or knowledge graph specific note.",
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param("update the note"),
                    "num": {
                        "type": "number",
                        "description": "The number of the note to update",
                    },
                    "note": {
                        "type": "string",
                        "description": "The new note replacing the old one",
                    },
                },
                "required": ["kg", "num", "note"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "show_notes",
            "Show current general or knowledge graph specific notes.",
            json!({
                "type": "object",
                "properties": {
                    "kg": kg_param("show the notes"),
                },
                "required": ["kg"],
                "additionalProperties": false,
            }),
        ),
        FunctionSpec::new(
            "stop",
            "Stop the note taking process.",
            json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false,
            }),
        ),
    ]
}

/// Dispatch one note function against the state's general or per-KG list.
pub fn call_note_function(
    state: &mut ExplorationState,
    name: &str,
    args: &Value,
    max_notes: usize,
    max_note_length: usize,
) -> Result<String> {
    if name == "stop" {
        return Ok("Stopped process".into());
    }

    let kg = args.get("kg").and_then(|v| v.as_str()).map(String::from);
    let notes = match &kg {
        None => &mut state.notes,
        Some(kg) => state
            .kg_notes
            .get_mut(kg)
            .ok_or_else(|| Error::FunctionCall(format!("Unknown knowledge graph {kg}")))?,
    };

    let note_arg = || -> Result<String> {
        args.get("note")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::FunctionCall("Missing note argument".into()))
    };
    // num arrives as a JSON number, sometimes fractional
    let num_arg = || -> Result<usize> {
        args.get("num")
            .and_then(|v| v.as_f64())
            .map(|n| n as usize)
            .ok_or_else(|| Error::FunctionCall("Missing num argument".into()))
    };

    match name {
        "add_note" => add_note(notes, note_arg()?, max_notes, max_note_length),
        "delete_note" => delete_note(notes, num_arg()?),
        "update_note" => update_note(notes, num_arg()?, note_arg()?, max_note_length),
        "show_notes" => Ok(show_notes(notes)),
        _ => Err(Error::FunctionCall(format!("Unknown function: {name}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExplorationTask;

#[async_trait::async_trait]
impl TaskAdapter for ExplorationTask {
    fn system_info(&self, config: &GraspConfig) -> String {
        format!(
            "You are a note-taking assistant. Your task is to explore knowledge \
             graphs and take notes about them using the provided functions.\n\n\
             You should follow a step-by-step approach to take notes:\n\
             1. Think about what domains the knowledge graphs might cover and what \
             types of questions a user might want to answer with them. Take into \
             account already existing notes to focus on unexplored areas.\n\
             2. Come up with a potential user question over one or more knowledge \
             graphs. Try to build a SPARQL query to answer the question and take \
             notes about your findings along the way. Try to use all of the provided \
             functions during your exploration.\n\
             3. Repeat steps 1 and 2 until you explored at least {} different \
             potential user questions or you run out of ideas.\n\n\
             You can take notes specific to a certain knowledge graph, as well as \
             general notes that might be useful across knowledge graphs.\n\n\
             You are only allowed {} notes at max per knowledge graph and for the \
             general notes, such that you are forced to prioritize and to keep them \
             as widely applicable as possible. Notes are limited to {} characters to \
             ensure they are concise and to the point.\n\n\
             Examples of potentially useful types of notes include:\n\
             - overall structure, domain coverage, and schema of the knowledge graphs\n\
             - peculiarities of the knowledge graphs\n\
             - strategies when encountering certain types of questions or errors\n\
             - tips for when and how to use certain functions",
            config.task.questions_per_round, config.max_notes, config.max_note_length,
        )
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "The questions you come up with should be diverse and cover different \
             parts of the knowledge graphs."
                .into(),
            "As you hit the limits on the number of notes and their length, gradually \
             generalize your notes, discard unnecessary details, and move notes that \
             can be useful across knowledge graphs to the general section."
                .into(),
        ]
    }

    async fn input_and_state(&self, raw: &Value, env: &TaskEnv<'_>) -> Result<(String, TaskState)> {
        let mut state: ExplorationState = if raw.is_null() {
            ExplorationState::default()
        } else {
            serde_json::from_value(raw.clone())
                .map_err(|_| Error::Task("exploration input must be a notes record".into()))?
        };

        // every selected KG gets a notes list, seeded from the manager
        for manager in env.managers {
            state
                .kg_notes
                .entry(manager.kg.clone())
                .or_insert_with(|| manager.notes.clone());
        }

        let instructions = format!(
            "Explore the available knowledge graphs. Add to, delete from, or update \
             the following notes along the way.\n\n\
             Knowledge graph specific notes:\n{}\n\n\
             General notes across knowledge graphs:\n{}",
            state.format_kg_notes(true),
            format_notes(&state.notes, 0, true),
        );

        Ok((instructions, TaskState::Exploration(state)))
    }

    fn functions(&self, env: &TaskEnv<'_>) -> Vec<FunctionSpec> {
        let kgs: Vec<String> = env.managers.iter().map(|m| m.kg.clone()).collect();
        note_functions(&kgs)
    }

    fn is_task_function(&self, name: &str) -> bool {
        matches!(
            name,
            "add_note" | "delete_note" | "update_note" | "show_notes" | "stop"
        )
    }

    async fn call(
        &self,
        env: &TaskEnv<'_>,
        name: &str,
        args: &Value,
        state: &mut TaskState,
        _known: &mut KnownSet,
    ) -> Result<String> {
        let TaskState::Exploration(state) = state else {
            return Err(Error::Task("exploration state missing".into()));
        };
        call_note_function(
            state,
            name,
            args,
            env.config.max_notes,
            env.config.max_note_length,
        )
    }

    fn is_terminal(&self, name: &str) -> bool {
        name == "stop"
    }

    async fn output(
        &self,
        _env: &TaskEnv<'_>,
        _messages: &[Message],
        state: &TaskState,
    ) -> Option<Value> {
        let TaskState::Exploration(state) = state else {
            return None;
        };

        let formatted = format!(
            "Exploration completed.\n\n\
             Knowledge graph specific notes:\n{}\n\n\
             General notes across knowledge graphs:\n{}",
            state.format_kg_notes(false),
            format_notes(&state.notes, 0, false),
        );

        Some(json!({
            "type": "output",
            "notes": state.notes,
            "kg_notes": state.kg_notes,
            "formatted": formatted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(kg: &str) -> ExplorationState {
        let mut state = ExplorationState::default();
        state.kg_notes.insert(kg.to_string(), Vec::new());
        state
    }

    #[test]
    fn add_is_bounded() {
        let mut state = state_with("wikidata");
        for i in 0..2 {
            let result = call_note_function(
                &mut state,
                "add_note",
                &json!({"kg": null, "note": format!("note {i}")}),
                2,
                64,
            )
            .unwrap();
            assert_eq!(result, format!("Added note {}: note {i}", i + 1));
        }

        let err = call_note_function(
            &mut state,
            "add_note",
            &json!({"kg": null, "note": "one too many"}),
            2,
            64,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot add more than 2 notes"));
        assert_eq!(state.notes.len(), 2);
    }

    #[test]
    fn length_is_bounded() {
        let mut state = state_with("wikidata");
        state.notes.push("short".into());

        let long = "x".repeat(100);
        let err = call_note_function(
            &mut state,
            "update_note",
            &json!({"kg": null, "num": 1, "note": long}),
            4,
            64,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Note exceeds maximum length"));
        assert_eq!(state.notes[0], "short");
    }

    #[test]
    fn indices_are_one_based_and_checked() {
        let mut state = state_with("wikidata");
        state.notes.push("a".into());
        state.notes.push("b".into());

        let err =
            call_note_function(&mut state, "delete_note", &json!({"kg": null, "num": 0}), 4, 64)
                .unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err =
            call_note_function(&mut state, "delete_note", &json!({"kg": null, "num": 3}), 4, 64)
                .unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let result =
            call_note_function(&mut state, "delete_note", &json!({"kg": null, "num": 1}), 4, 64)
                .unwrap();
        assert_eq!(result, "Deleted note 1: a");
        assert_eq!(state.notes, vec!["b"]);
    }

    #[test]
    fn kg_selects_note_list() {
        let mut state = state_with("wikidata");
        call_note_function(
            &mut state,
            "add_note",
            &json!({"kg": "wikidata", "note": "kg note"}),
            4,
            64,
        )
        .unwrap();
        assert!(state.notes.is_empty());
        assert_eq!(state.kg_notes["wikidata"], vec!["kg note"]);

        let err = call_note_function(
            &mut state,
            "add_note",
            &json!({"kg": "unknown", "note": "x"}),
            4,
            64,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown knowledge graph"));

        let shown = call_note_function(
            &mut state,
            "show_notes",
            &json!({"kg": "wikidata"}),
            4,
            64,
        )
        .unwrap();
        assert_eq!(shown, "1. kg note");

        let shown =
            call_note_function(&mut state, "show_notes", &json!({"kg": null}), 4, 64).unwrap();
        assert_eq!(shown, "No notes available");
    }

    #[test]
    fn fractional_num_truncates() {
        let mut state = state_with("wikidata");
        state.notes.push("a".into());
        let result = call_note_function(
            &mut state,
            "update_note",
            &json!({"kg": null, "num": 1.0, "note": "b"}),
            4,
            64,
        )
        .unwrap();
        assert_eq!(result, "Updated note 1: b");
    }
}
