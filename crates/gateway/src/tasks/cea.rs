//! Cell entity annotation: the model annotates table cells with verified KG
//! entities, then calls `stop`. Know-before-use is always enforced here —
//! an entity may only be used after it appeared in a tool result.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::{format_list, format_notes};
use grasp_domain::model::{FunctionSpec, Message};
use grasp_kg::{find_manager, format_kgs, KgManager, KnownSet};

use super::{general_rules, TaskAdapter, TaskEnv, TaskState};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table and annotations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub data: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotate_rows: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotate_columns: Option<Vec<usize>>,
}

impl Table {
    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn height(&self) -> usize {
        self.data.len()
    }

    /// Keep a window of `context` rows around the allowed rows. Returns the
    /// trimmed table and the offset of its first row in the original table.
    fn trim(self, context: usize) -> (Table, usize) {
        let Some(rows) = &self.annotate_rows else {
            // all rows are to be annotated, context does not apply
            return (self, 0);
        };
        if context >= self.height() || rows.is_empty() {
            return (self, 0);
        }

        let min = *rows.iter().min().unwrap_or(&0);
        let max = *rows.iter().max().unwrap_or(&0);
        let start = min.saturating_sub(context);
        let end = (max + context + 1).min(self.height());

        let trimmed = Table {
            header: self.header,
            data: self.data[start..end].to_vec(),
            annotate_rows: Some(rows.iter().map(|r| r - start).collect()),
            annotate_columns: self.annotate_columns,
        };
        (trimmed, start)
    }

    fn clean(self) -> Table {
        let clean = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        Table {
            header: self.header.iter().map(|h| clean(h)).collect(),
            data: self
                .data
                .iter()
                .map(|row| row.iter().map(|cell| clean(cell)).collect())
                .collect(),
            annotate_rows: self.annotate_rows,
            annotate_columns: self.annotate_columns,
        }
    }
}

/// A resolved entity annotation for one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub identifier: String,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infos: Vec<String>,
}

/// The per-request annotation state: the (possibly trimmed) table plus a map
/// from cell to annotation. Emitted annotations reference original row
/// indices through `offset`.
pub struct AnnotationState {
    table: Table,
    offset: usize,
    rows: Option<HashSet<usize>>,
    cols: Option<HashSet<usize>>,
    annotations: BTreeMap<(usize, usize), Annotation>,
}

impl AnnotationState {
    pub fn new(table: Table, context_rows: Option<usize>) -> Result<Self> {
        if table.header.is_empty() {
            return Err(Error::Task("table header must not be empty".into()));
        }
        if table.data.iter().any(|row| row.len() != table.header.len()) {
            return Err(Error::Task(
                "all table rows must have the same length as the header".into(),
            ));
        }

        let (table, offset) = match context_rows {
            Some(context) => table.trim(context),
            None => (table, 0),
        };
        let table = table.clean();

        let rows = table
            .annotate_rows
            .as_ref()
            .map(|rows| rows.iter().copied().collect());
        let cols = table
            .annotate_columns
            .as_ref()
            .map(|cols| cols.iter().copied().collect());

        Ok(Self {
            table,
            offset,
            rows,
            cols,
            annotations: BTreeMap::new(),
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Set or clear the annotation of a cell, enforcing bounds and the
    /// allowed rows/columns. Returns the previous annotation.
    pub fn annotate(
        &mut self,
        row: usize,
        column: usize,
        annotation: Option<Annotation>,
    ) -> Result<Option<Annotation>> {
        if row >= self.table.height() {
            return Err(Error::FunctionCall(format!("Row {row} out of bounds")));
        }
        if let Some(rows) = &self.rows {
            if !rows.contains(&row) {
                return Err(Error::FunctionCall(format!(
                    "Row {row} must not be annotated"
                )));
            }
        }
        if column >= self.table.width() {
            return Err(Error::FunctionCall(format!("Column {column} out of bounds")));
        }
        if let Some(cols) = &self.cols {
            if !cols.contains(&column) {
                return Err(Error::FunctionCall(format!(
                    "Column {column} must not be annotated"
                )));
            }
        }

        let current = self.annotations.remove(&(row, column));
        if let Some(annotation) = annotation {
            self.annotations.insert((row, column), annotation);
        }
        Ok(current)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&Annotation> {
        self.annotations.get(&(row, column))
    }

    /// Render the table with annotations in parentheses plus a list of the
    /// annotated entities.
    pub fn format(&self) -> String {
        let mut header = vec!["Row".to_string()];
        header.extend(
            self.table
                .header
                .iter()
                .enumerate()
                .map(|(i, name)| format!("Column {i}: {name}")),
        );
        let mut lines = vec![header.join(" | ")];

        for (r, row) in self.table.data.iter().enumerate() {
            let mut cells = vec![r.to_string()];
            for (c, cell) in row.iter().enumerate() {
                match self.get(r, c) {
                    Some(annotation) => cells.push(format!("{cell} ({})", annotation.entity)),
                    None => cells.push(cell.clone()),
                }
            }
            lines.push(cells.join(" | "));
        }

        let mut formatted = lines.join("\n");

        let mut entities: BTreeMap<&str, String> = BTreeMap::new();
        for annotation in self.annotations.values() {
            entities
                .entry(annotation.identifier.as_str())
                .or_insert_with(|| selection_string(annotation));
        }
        if !entities.is_empty() {
            formatted.push_str(&format!(
                "\n\nAnnotated entities:\n{}",
                format_list(entities.values(), 0)
            ));
        }

        formatted
    }

    /// Final output: formatted table plus annotations with original row
    /// indices.
    pub fn to_output(&self) -> Value {
        let annotations: Vec<Value> = self
            .annotations
            .iter()
            .map(|(&(row, column), annotation)| {
                let mut value = serde_json::to_value(annotation).unwrap_or_default();
                value["row"] = json!(row + self.offset);
                value["column"] = json!(column);
                value
            })
            .collect();

        json!({
            "formatted": self.format(),
            "annotations": annotations,
        })
    }
}

fn selection_string(annotation: &Annotation) -> String {
    let mut line = match &annotation.label {
        Some(label) => format!("{} ({label})", annotation.entity),
        None => annotation.entity.clone(),
    };
    if !annotation.synonyms.is_empty() {
        line.push_str(&format!(
            ", also known as {}",
            annotation.synonyms.join(", ")
        ));
    }
    if !annotation.infos.is_empty() {
        line.push_str(&format!("; {}", annotation.infos.join("; ")));
    }
    line
}

/// Resolve an entity IRI into an annotation enriched with label, aliases,
/// and infos from the entity index.
fn prepare_annotation(manager: &KgManager, entity: &str) -> Result<Annotation> {
    let full = manager
        .expand(entity)
        .ok_or_else(|| Error::FunctionCall(format!("Entity {entity} is not a valid IRI")))?;
    let identifier = manager.shorten(&full);

    let hit = manager
        .entities
        .get(&identifier)
        .or_else(|| manager.entities.get(entity));

    let (label, synonyms, infos) = match hit {
        Some(hit) => (Some(hit.label), hit.aliases, hit.infos),
        None => (None, Vec::new(), Vec::new()),
    };

    Ok(Annotation {
        identifier,
        entity: entity.to_string(),
        label,
        synonyms,
        infos,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CeaTask;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AnnotateArgs {
    kg: String,
    row: usize,
    column: usize,
    entity: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteArgs {
    row: usize,
    column: usize,
}

fn invalid_args(e: serde_json::Error) -> Error {
    Error::FunctionCall(format!("Invalid arguments: {e}"))
}

fn annotation_state<'a>(state: &'a mut TaskState) -> Result<&'a mut AnnotationState> {
    match state {
        TaskState::Cea(state) => Ok(state),
        _ => Err(Error::Task("annotation state missing for cea task".into())),
    }
}

fn input_instructions(state: &AnnotationState) -> String {
    let mut instructions = String::from(
        "Annotate the following table with entities from the available knowledge \
         graphs. If there already are annotations for some cells, they are shown in \
         parentheses after the cell value.\n\n",
    );

    match &state.rows {
        Some(rows) if rows.len() != state.table.height() => {
            let mut sorted: Vec<usize> = rows.iter().copied().collect();
            sorted.sort();
            let list = sorted
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let suffix = if sorted.len() == 1 { "" } else { "s" };
            instructions.push_str(&format!("Only annotate row{suffix} {list}.\n\n"));
        }
        _ => instructions.push_str("Annotate all rows.\n\n"),
    }

    match &state.cols {
        Some(cols) if cols.len() != state.table.width() => {
            let mut sorted: Vec<usize> = cols.iter().copied().collect();
            sorted.sort();
            let list = sorted
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let suffix = if sorted.len() == 1 { "" } else { "s" };
            instructions.push_str(&format!("Only annotate column{suffix} {list}.\n\n"));
        }
        _ => instructions.push_str("Annotate all columns.\n\n"),
    }

    instructions.push_str(&state.format());
    instructions
}

#[async_trait::async_trait]
impl TaskAdapter for CeaTask {
    fn system_info(&self, _config: &GraspConfig) -> String {
        "You are an entity annotation assistant. Your job is to annotate cells from \
         a given table with entities from the available knowledge graphs.\n\n\
         You should follow a step-by-step approach to annotate the cells:\n\
         1. Determine what the table might be about and what the different columns \
         might represent. Think about how the cells might be represented with \
         entities in the knowledge graphs.\n\
         2. Annotate the cells, starting with the ones that are easiest to annotate. \
         Use the provided functions to search and query the knowledge graphs for the \
         corresponding entities. You may need to refine or rethink your annotations \
         based on new insights along the way and alter them if needed, possibly \
         multiple times.\n\
         3. Use the stop function to finalize your annotations and stop the \
         annotation process."
            .into()
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "Annotate cells only with entities that you verified to exist in the \
             knowledge graphs using the provided functions."
                .into(),
            "If you cannot find a suitable entity for a cell, leave it unannotated.".into(),
            "If there are multiple suitable entities for a cell, choose the one that \
             fits best in the context of the table, or the one that is more \
             popular/general."
                .into(),
            "If you find common patterns within or across rows and columns, executing \
             a corresponding SPARQL query to retrieve multiple entities at once might \
             be easier than searching for each cell individually."
                .into(),
            "All of your annotations should be full or prefixed IRIs.".into(),
            "If the same entity occurs multiple times in the table, annotate all \
             occurrences."
                .into(),
        ]
    }

    async fn input_and_state(&self, raw: &Value, env: &TaskEnv<'_>) -> Result<(String, TaskState)> {
        let table: Table = serde_json::from_value(raw.clone()).map_err(|_| {
            Error::Task("cea task input must be an object with 'header' and 'data' fields".into())
        })?;

        let state = AnnotationState::new(table, env.config.task.context_rows)?;
        let instructions = input_instructions(&state);
        Ok((instructions, TaskState::Cea(state)))
    }

    fn functions(&self, env: &TaskEnv<'_>) -> Vec<FunctionSpec> {
        let kgs: Vec<String> = env.managers.iter().map(|m| m.kg.clone()).collect();
        vec![
            FunctionSpec::new(
                "annotate",
                "Annotate a cell in the table with an entity from the specified \
                 knowledge graph. This function overwrites any previous annotation \
                 of the cell.",
                json!({
                    "type": "object",
                    "properties": {
                        "kg": {
                            "type": "string",
                            "enum": kgs,
                            "description": "The knowledge graph to use for the annotation",
                        },
                        "row": {
                            "type": "integer",
                            "description": "The row index of the cell to annotate \
(0-based, ignoring header)",
                        },
                        "column": {
                            "type": "integer",
                            "description": "The column index of the cell to annotate \
(0-based, ignoring header)",
                        },
                        "entity": {
                            "type": "string",
                            "description": "The IRI of the entity to annotate the cell with",
                        },
                    },
                    "required": ["kg", "row", "column", "entity"],
                    "additionalProperties": false,
                }),
            ),
            FunctionSpec::new(
                "delete_annotation",
                "Delete the annotation of a cell in the table.",
                json!({
                    "type": "object",
                    "properties": {
                        "row": {
                            "type": "integer",
                            "description": "The row index of the cell to clear \
(0-based, ignoring header)",
                        },
                        "column": {
                            "type": "integer",
                            "description": "The column index of the cell to clear \
(0-based, ignoring header)",
                        },
                    },
                    "required": ["row", "column"],
                    "additionalProperties": false,
                }),
            ),
            FunctionSpec::new(
                "show_annotations",
                "Show the current annotations for the table.",
                json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                    "additionalProperties": false,
                }),
            ),
            FunctionSpec::new(
                "stop",
                "Finalize your annotations and stop the annotation process.",
                json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                    "additionalProperties": false,
                }),
            ),
        ]
    }

    fn is_task_function(&self, name: &str) -> bool {
        matches!(
            name,
            "annotate" | "delete_annotation" | "show_annotations" | "stop"
        )
    }

    async fn call(
        &self,
        env: &TaskEnv<'_>,
        name: &str,
        args: &Value,
        state: &mut TaskState,
        known: &mut KnownSet,
    ) -> Result<String> {
        let state = annotation_state(state)?;

        match name {
            "annotate" => {
                let args: AnnotateArgs =
                    serde_json::from_value(args.clone()).map_err(invalid_args)?;
                let manager = find_manager(env.managers, &args.kg)?;

                let annotation = prepare_annotation(manager, &args.entity)?;
                // know-before-use is unconditional for annotations
                if !known.contains(&annotation.identifier) && !known.contains(&args.entity) {
                    return Err(Error::FunctionCall(format!(
                        "The entity {} cannot be used for annotation without being \
                         known from previous function call results. This does not \
                         mean it is invalid, but you should verify that it indeed \
                         exists in the knowledge graphs first.",
                        args.entity
                    )));
                }

                let entity = annotation.entity.clone();
                let current = state.annotate(args.row, args.column, Some(annotation))?;
                Ok(match current {
                    None => format!(
                        "Annotated cell ({}, {}) with entity {entity}",
                        args.row, args.column
                    ),
                    Some(previous) => format!(
                        "Updated annotation of cell ({}, {}) from {} to {entity}",
                        args.row, args.column, previous.entity
                    ),
                })
            }
            "delete_annotation" => {
                let args: DeleteArgs = serde_json::from_value(args.clone()).map_err(invalid_args)?;
                let current = state.annotate(args.row, args.column, None)?;
                match current {
                    Some(annotation) => Ok(format!(
                        "Deleted annotation {} from cell ({}, {})",
                        annotation.entity, args.row, args.column
                    )),
                    None => Err(Error::FunctionCall(format!(
                        "Cell ({}, {}) is not annotated",
                        args.row, args.column
                    ))),
                }
            }
            "show_annotations" => Ok(state.format()),
            "stop" => Ok("Stopping".into()),
            _ => Err(Error::FunctionCall(format!("Unknown function: {name}"))),
        }
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
        match state {
            TaskState::Cea(state) => Some(state.to_output()),
            _ => None,
        }
    }

    fn feedback_system(&self, env: &TaskEnv<'_>) -> Option<String> {
        Some(format!(
            "You are a table annotation assistant providing feedback on the output \
             of a table annotation system for a given input table.\n\n\
             The system has access to the following knowledge graphs:\n{}\n\n\
             The system was provided the following notes across all knowledge \
             graphs:\n{}\n\n\
             The system was provided the following rules to follow:\n{}\n\n\
             Provide your feedback with the give_feedback function.",
            format_kgs(env.managers),
            format_notes(env.general_notes, 0, false),
            format_list(
                general_rules()
                    .into_iter()
                    .chain(self.rules())
                    .collect::<Vec<_>>(),
                0
            ),
        ))
    }

    fn feedback_prompt(&self, inputs: &[String], output: &Value) -> Option<String> {
        let input = inputs.last()?;
        let mut prompt = if inputs.len() > 1 {
            format!(
                "Previous inputs:\n{}\n\n",
                inputs[..inputs.len() - 1]
                    .iter()
                    .map(|i| i.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            )
        } else {
            String::new()
        };
        prompt.push_str(&format!("Input:\n{}", input.trim()));
        prompt.push_str(&format!(
            "\n\nAnnotations:\n{}",
            output["formatted"].as_str().unwrap_or("")
        ));
        Some(prompt)
    }
}
