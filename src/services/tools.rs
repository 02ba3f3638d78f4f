use std::sync::Arc;

use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::services::db::{ensure_read_only, SqlDatabase, TextRow};
use crate::services::index::MatchIndex;

/// Stable identity of the proper-noun lookup tool. The orchestrating model
/// selects tools by this text, so it never changes with the index contents.
pub const PROPER_NOUN_TOOL_NAME: &str = "search_proper_nouns";
pub const PROPER_NOUN_TOOL_DESCRIPTION: &str =
    "Use this tool to look up values to filter on. Input is an approximate spelling of the \
     proper noun, output is valid proper nouns. Use the noun most similar to the search.";

/// Rows returned to the model per query. Enough to answer, small enough to
/// keep the context bounded.
const MAX_RESULT_ROWS: usize = 50;

/// SQL operations the generic tools need. `SqlDatabase` is the live
/// implementation; tests substitute canned backends.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, AppError>;
    async fn describe_table(&self, table: &str) -> Result<String, AppError>;
    async fn run_query(&self, sql: &str) -> Result<(Vec<String>, Vec<TextRow>), AppError>;
}

#[async_trait]
impl SqlBackend for SqlDatabase {
    async fn list_tables(&self) -> Result<Vec<String>, AppError> {
        SqlDatabase::list_tables(self).await
    }

    async fn describe_table(&self, table: &str) -> Result<String, AppError> {
        SqlDatabase::describe_table(self, table).await
    }

    async fn run_query(&self, sql: &str) -> Result<(Vec<String>, Vec<TextRow>), AppError> {
        self.run_with_columns(sql).await
    }
}

/// Function definitions handed to the chat API on every turn.
pub fn tool_definitions() -> Vec<ChatCompletionTool> {
    let function = |name: &str, description: &str, parameters: serde_json::Value| {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: name.to_string(),
                description: Some(description.to_string()),
                parameters: Some(parameters),
            },
        }
    };

    vec![
        function(
            PROPER_NOUN_TOOL_NAME,
            PROPER_NOUN_TOOL_DESCRIPTION,
            json!({
                "type": "object",
                "properties": {
                    "search": {
                        "type": "string",
                        "description": "Approximate spelling of the proper noun to resolve"
                    }
                },
                "required": ["search"]
            }),
        ),
        function(
            "list_tables",
            "List the tables available in the database. Call this first to see what you can query.",
            json!({ "type": "object", "properties": {} }),
        ),
        function(
            "describe_tables",
            "Get the columns and types of the given tables. Call this before writing a query \
             against a table.",
            json!({
                "type": "object",
                "properties": {
                    "tables": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Table names to describe"
                    }
                },
                "required": ["tables"]
            }),
        ),
        function(
            "execute_sql",
            "Execute a read-only PostgreSQL SELECT query and return the rows. If an error is \
             returned, rewrite the query and try again. DML statements are rejected.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SQL query to execute"
                    }
                },
                "required": ["query"]
            }),
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    search: String,
}

#[derive(Debug, Deserialize)]
struct DescribeArgs {
    tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    query: String,
}

/// Executes one tool call and serializes the result for the tool message.
/// Failures are reported back to the model as an error payload so it can
/// retry or rephrase; they never terminate the session.
pub struct ToolRouter {
    backend: Arc<dyn SqlBackend>,
    index: Arc<MatchIndex>,
    lookup_k: usize,
}

impl ToolRouter {
    pub fn new(backend: Arc<dyn SqlBackend>, index: Arc<MatchIndex>, lookup_k: usize) -> Self {
        Self {
            backend,
            index,
            lookup_k,
        }
    }

    pub async fn dispatch(&self, name: &str, arguments: &str) -> String {
        info!("Dispatching tool call: {}", name);
        match self.dispatch_inner(name, arguments).await {
            Ok(payload) => payload.to_string(),
            Err(message) => {
                warn!("Tool '{}' failed: {}", name, message);
                json!({ "error": true, "message": message }).to_string()
            }
        }
    }

    async fn dispatch_inner(
        &self,
        name: &str,
        arguments: &str,
    ) -> Result<serde_json::Value, String> {
        match name {
            PROPER_NOUN_TOOL_NAME => {
                let args: SearchArgs = parse_args(arguments)?;
                let matches = self
                    .index
                    .search(&args.search, self.lookup_k)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "matches": matches }))
            }
            "list_tables" => {
                let tables = self.backend.list_tables().await.map_err(|e| e.to_string())?;
                Ok(json!({ "tables": tables }))
            }
            "describe_tables" => {
                let args: DescribeArgs = parse_args(arguments)?;
                let mut descriptions = Vec::with_capacity(args.tables.len());
                for table in &args.tables {
                    descriptions.push(
                        self.backend
                            .describe_table(table)
                            .await
                            .map_err(|e| e.to_string())?,
                    );
                }
                Ok(json!({ "schema": descriptions.join("\n") }))
            }
            "execute_sql" => {
                let args: ExecuteArgs = parse_args(arguments)?;
                ensure_read_only(&args.query)?;
                let (columns, rows) = self
                    .backend
                    .run_query(&args.query)
                    .await
                    .map_err(|e| e.to_string())?;
                let total = rows.len();
                Ok(json!({
                    "columns": columns,
                    "rows": rows.iter().take(MAX_RESULT_ROWS).collect::<Vec<_>>(),
                    "row_count": total,
                    "truncated": total > MAX_RESULT_ROWS,
                }))
            }
            other => Err(format!("unknown tool '{}'", other)),
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("invalid tool arguments: {}", e))
}
