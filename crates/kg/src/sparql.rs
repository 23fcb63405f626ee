//! SPARQL endpoint boundary: a mockable client trait, the reqwest-backed
//! implementation, and result parsing/formatting with row and column caps.

use serde_json::Value;

use grasp_domain::error::{Error, Result};

/// How long a single endpoint query may take.
const QUERY_TIMEOUT_SECS: u64 = 60;

/// Low-level access to a remote SPARQL endpoint. Returns the raw
/// `application/sparql-results+json` body.
#[async_trait::async_trait]
pub trait SparqlClient: Send + Sync {
    async fn query(&self, endpoint: &str, sparql: &str) -> Result<Value>;
}

/// Production client speaking the SPARQL protocol over HTTP.
pub struct HttpSparqlClient {
    client: reqwest::Client,
}

impl HttpSparqlClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(QUERY_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl SparqlClient for HttpSparqlClient {
    async fn query(&self, endpoint: &str, sparql: &str) -> Result<Value> {
        tracing::debug!(endpoint, "sparql query");
        let resp = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .body(sparql.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(e.to_string())
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("invalid SPARQL results body: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One cell of a result table. `iri` is set for `uri`-typed bindings and
/// feeds the Known Set.
#[derive(Debug, Clone)]
pub struct Cell {
    pub text: String,
    pub iri: Option<String>,
}

/// Parsed SELECT or ASK result.
#[derive(Debug, Clone)]
pub struct SparqlResult {
    pub vars: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub boolean: Option<bool>,
}

impl SparqlResult {
    /// Parse a `application/sparql-results+json` body. `shorten` renders an
    /// IRI in its preferred (usually prefixed) form.
    pub fn from_json(body: &Value, shorten: &dyn Fn(&str) -> String) -> Result<Self> {
        if let Some(boolean) = body.get("boolean").and_then(|v| v.as_bool()) {
            return Ok(Self {
                vars: Vec::new(),
                rows: Vec::new(),
                boolean: Some(boolean),
            });
        }

        let vars: Vec<String> = body
            .get("head")
            .and_then(|h| h.get("vars"))
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .ok_or_else(|| Error::Protocol("missing head.vars in SPARQL results".into()))?;

        let bindings = body
            .get("results")
            .and_then(|r| r.get("bindings"))
            .and_then(|b| b.as_array())
            .ok_or_else(|| Error::Protocol("missing results.bindings in SPARQL results".into()))?;

        let rows = bindings
            .iter()
            .map(|binding| {
                vars.iter()
                    .map(|var| parse_cell(binding.get(var), shorten))
                    .collect()
            })
            .collect();

        Ok(Self {
            vars,
            rows,
            boolean: None,
        })
    }

    /// IRIs appearing anywhere in the result, in row order.
    pub fn iris(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|cell| cell.iri.as_deref())
            .collect()
    }

    /// Render the result as text, keeping at most `max_rows` rows and
    /// `max_columns` columns: the first half from the top, the second half
    /// from the bottom, with an ellipsis marker in between.
    pub fn format(&self, max_rows: usize, max_columns: usize) -> String {
        if let Some(boolean) = self.boolean {
            return format!("ASK result: {boolean}");
        }
        if self.vars.is_empty() {
            return "Empty result".into();
        }

        let total_rows = self.rows.len();

        let col_indices = capped_indices(self.vars.len(), max_columns);
        let row_indices = capped_indices(total_rows, max_rows);

        let mut lines = Vec::new();
        lines.push(render_row(&col_indices, |i| self.vars[i].clone()));

        let mut last: Option<usize> = None;
        for &r in &row_indices {
            if let Some(prev) = last {
                if r > prev + 1 {
                    lines.push("...".into());
                }
            }
            last = Some(r);
            lines.push(render_row(&col_indices, |i| self.rows[r][i].text.clone()));
        }

        let mut out = lines.join("\n");
        if total_rows > row_indices.len() {
            out.push_str(&format!(
                "\n\n{} rows in total, showing the first {} and last {}",
                total_rows,
                max_rows.div_ceil(2),
                max_rows / 2,
            ));
        } else {
            out.push_str(&format!(
                "\n\n{total_rows} row{}",
                if total_rows == 1 { "" } else { "s" }
            ));
        }
        out
    }
}

fn parse_cell(binding: Option<&Value>, shorten: &dyn Fn(&str) -> String) -> Cell {
    let Some(binding) = binding else {
        return Cell {
            text: String::new(),
            iri: None,
        };
    };

    let value = binding.get("value").and_then(|v| v.as_str()).unwrap_or("");
    match binding.get("type").and_then(|v| v.as_str()) {
        Some("uri") => Cell {
            text: shorten(value),
            iri: Some(value.to_string()),
        },
        _ => Cell {
            text: value.to_string(),
            iri: None,
        },
    }
}

/// Indices kept under a cap: first ceil(max/2) and last floor(max/2).
fn capped_indices(total: usize, max: usize) -> Vec<usize> {
    if total <= max || max == 0 {
        return (0..total).collect();
    }
    let head = max.div_ceil(2);
    let tail = max / 2;
    let mut indices: Vec<usize> = (0..head).collect();
    indices.extend(total - tail..total);
    indices
}

fn render_row(cols: &[usize], cell: impl Fn(usize) -> String) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, &c) in cols.iter().enumerate() {
        if i > 0 && c > cols[i - 1] + 1 {
            parts.push("...".into());
        }
        parts.push(cell(c));
    }
    parts.join(" | ")
}

/// The block appended to answers and tool results that embed a query.
pub fn format_sparql_block(kg: &str, sparql: &str, selections: &str, result: &str) -> String {
    let mut fmt = format!("SPARQL query over {kg}:\n{}", sparql.trim());
    if !selections.is_empty() {
        fmt.push_str(&format!("\n\n{selections}"));
    }
    fmt.push_str(&format!("\n\nExecution result:\n{}", result.trim()));
    fmt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(s: &str) -> String {
        s.to_string()
    }

    fn select_body(rows: usize) -> Value {
        let bindings: Vec<Value> = (0..rows)
            .map(|i| {
                json!({
                    "x": {"type": "uri", "value": format!("http://e.org/{i}")},
                    "label": {"type": "literal", "value": format!("item {i}")},
                })
            })
            .collect();
        json!({
            "head": {"vars": ["x", "label"]},
            "results": {"bindings": bindings},
        })
    }

    #[test]
    fn parses_select_and_collects_iris() {
        let result = SparqlResult::from_json(&select_body(2), &identity).unwrap();
        assert_eq!(result.vars, vec!["x", "label"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.iris(), vec!["http://e.org/0", "http://e.org/1"]);
    }

    #[test]
    fn parses_ask() {
        let result = SparqlResult::from_json(&json!({"boolean": true}), &identity).unwrap();
        assert_eq!(result.boolean, Some(true));
        assert_eq!(result.format(10, 10), "ASK result: true");
    }

    #[test]
    fn caps_rows_top_and_bottom() {
        let result = SparqlResult::from_json(&select_body(20), &identity).unwrap();
        let formatted = result.format(4, 10);
        // header + 2 top + ellipsis + 2 bottom
        assert!(formatted.contains("http://e.org/0"));
        assert!(formatted.contains("http://e.org/1"));
        assert!(formatted.contains("\n...\n"));
        assert!(formatted.contains("http://e.org/18"));
        assert!(formatted.contains("http://e.org/19"));
        assert!(!formatted.contains("http://e.org/5 "));
        assert!(formatted.contains("20 rows in total, showing the first 2 and last 2"));
    }

    #[test]
    fn small_results_are_untruncated() {
        let result = SparqlResult::from_json(&select_body(3), &identity).unwrap();
        let formatted = result.format(10, 10);
        assert!(!formatted.contains("..."));
        assert!(formatted.ends_with("3 rows"));
    }

    #[test]
    fn capped_indices_split() {
        assert_eq!(capped_indices(3, 10), vec![0, 1, 2]);
        assert_eq!(capped_indices(10, 5), vec![0, 1, 2, 8, 9]);
    }
}
