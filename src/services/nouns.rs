use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::AppError;
use crate::services::db::{validate_identifier, SqlRunner};

/// One table/column set mined for proper-noun candidates.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub table: String,
    pub columns: Vec<String>,
    /// Drop whitespace-delimited all-digit tokens from cleaned rows.
    /// Off by default; useful for columns carrying trailing numeric codes.
    pub strip_numeric_tokens: bool,
}

impl ColumnSpec {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            strip_numeric_tokens: false,
        }
    }

    pub fn with_numeric_stripping(mut self) -> Self {
        self.strip_numeric_tokens = true;
        self
    }
}

static NUMERIC_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Remove tokens consisting entirely of digits, keeping the rest intact.
pub fn strip_numeric_tokens(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| !NUMERIC_TOKEN.is_match(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip each non-empty field and join with a single space. A row whose
/// fields are all empty or NULL collapses to the empty string.
pub fn clean_row(fields: &[Option<String>]) -> String {
    fields
        .iter()
        .filter_map(|f| f.as_deref())
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pull every row of the spec's columns and reduce it to a deduplicated set
/// of cleaned candidate strings. A failed query degrades to an empty set so
/// one broken table never blocks startup.
pub async fn extract(runner: &dyn SqlRunner, spec: &ColumnSpec) -> HashSet<String> {
    let set = match extract_inner(runner, spec).await {
        Ok(set) => set,
        Err(e) => {
            warn!("Extraction failed for table '{}': {}", spec.table, e);
            return HashSet::new();
        }
    };
    info!(
        "Extracted {} candidates from table '{}'",
        set.len(),
        spec.table
    );
    set
}

async fn extract_inner(
    runner: &dyn SqlRunner,
    spec: &ColumnSpec,
) -> Result<HashSet<String>, AppError> {
    if spec.columns.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "no columns configured for table '{}'",
            spec.table
        )));
    }
    validate_identifier(&spec.table)?;
    for column in &spec.columns {
        validate_identifier(column)?;
    }

    let sql = format!("SELECT {} FROM {}", spec.columns.join(", "), spec.table);
    let rows = runner
        .run_rows(&sql)
        .await
        .map_err(|e| AppError::Extraction {
            table: spec.table.clone(),
            message: e.to_string(),
        })?;

    Ok(rows
        .iter()
        .map(|row| clean_row(row))
        .map(|candidate| {
            if spec.strip_numeric_tokens {
                strip_numeric_tokens(&candidate)
            } else {
                candidate
            }
        })
        .filter(|candidate| !candidate.is_empty())
        .collect())
}

/// Run every configured extraction and flatten the results into one
/// candidate list. Each table's contribution is sorted so repeated startups
/// against unchanged data produce the same sequence.
pub async fn collect_candidates(runner: &dyn SqlRunner, specs: &[ColumnSpec]) -> Vec<String> {
    let mut candidates = Vec::new();
    for spec in specs {
        let mut from_table: Vec<String> = extract(runner, spec).await.into_iter().collect();
        from_table.sort();
        candidates.extend(from_table);
    }
    info!("Collected {} proper-noun candidates", candidates.len());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::services::db::TextRow;

    /// Canned row source keyed by table name; unknown tables fail the query.
    struct StubRunner {
        tables: HashMap<String, Vec<TextRow>>,
    }

    impl StubRunner {
        fn new(tables: &[(&str, Vec<TextRow>)]) -> Self {
            Self {
                tables: tables
                    .iter()
                    .map(|(name, rows)| (name.to_string(), rows.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl SqlRunner for StubRunner {
        async fn run_rows(&self, sql: &str) -> Result<Vec<TextRow>, AppError> {
            let table = sql.rsplit(" FROM ").next().unwrap_or_default();
            self.tables
                .get(table)
                .cloned()
                .ok_or_else(|| AppError::Database(format!("relation \"{}\" does not exist", table)))
        }
    }

    fn row(fields: &[&str]) -> TextRow {
        fields.iter().map(|f| Some(f.to_string())).collect()
    }

    #[test]
    fn clean_row_skips_empty_fields() {
        assert_eq!(clean_row(&row(&["", "Smith"])), "Smith");
        assert_eq!(clean_row(&row(&["  Ed ", "Chase"])), "Ed Chase");
        assert_eq!(clean_row(&[None, Some("London".to_string())]), "London");
        assert_eq!(clean_row(&row(&["", ""])), "");
    }

    #[test]
    fn numeric_token_stripping() {
        assert_eq!(strip_numeric_tokens("London 42"), "London");
        assert_eq!(strip_numeric_tokens("Area 51 Base"), "Area Base");
        assert_eq!(strip_numeric_tokens("B52"), "B52");
        assert_eq!(strip_numeric_tokens("123"), "");
    }

    #[tokio::test]
    async fn extract_deduplicates_rows() {
        let runner = StubRunner::new(&[(
            "actor",
            vec![row(&["ED", "CHASE"]), row(&["ED", "CHASE"]), row(&["", ""])],
        )]);
        let spec = ColumnSpec::new("actor", &["first_name", "last_name"]);

        let set = extract(&runner, &spec).await;
        assert_eq!(set.len(), 1);
        assert!(set.contains("ED CHASE"));
    }

    #[tokio::test]
    async fn extract_is_deterministic() {
        let runner = StubRunner::new(&[(
            "city",
            vec![row(&["London"]), row(&["Paris"]), row(&["London"])],
        )]);
        let spec = ColumnSpec::new("city", &["city"]);

        let first = extract(&runner, &spec).await;
        let second = extract(&runner, &spec).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn extract_failure_degrades_to_empty() {
        let runner = StubRunner::new(&[]);
        let spec = ColumnSpec::new("country", &["country"]);
        assert!(extract(&runner, &spec).await.is_empty());
    }

    #[tokio::test]
    async fn extract_applies_numeric_stripping_when_configured() {
        let runner = StubRunner::new(&[("city", vec![row(&["London 42"])])]);
        let spec = ColumnSpec::new("city", &["city"]).with_numeric_stripping();

        let set = extract(&runner, &spec).await;
        assert!(set.contains("London"));
    }

    #[tokio::test]
    async fn aggregator_survives_one_failed_table() {
        let runner = StubRunner::new(&[
            ("actor", vec![row(&["ED", "CHASE"])]),
            ("city", vec![row(&["London"]), row(&["Paris"])]),
            // country is missing: its extraction fails
        ]);
        let specs = vec![
            ColumnSpec::new("actor", &["first_name", "last_name"]),
            ColumnSpec::new("city", &["city"]),
            ColumnSpec::new("country", &["country"]),
        ];

        let candidates = collect_candidates(&runner, &specs).await;
        assert_eq!(candidates, vec!["ED CHASE", "London", "Paris"]);
    }

    #[tokio::test]
    async fn aggregator_returns_empty_when_everything_fails() {
        let runner = StubRunner::new(&[]);
        let specs = crate::config::default_noun_columns();
        assert!(collect_candidates(&runner, &specs).await.is_empty());
    }
}
