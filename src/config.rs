use anyhow::Result;
use dotenvy::dotenv;

use crate::services::nouns::ColumnSpec;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    /// Number of matches returned by the proper-noun lookup tool.
    pub lookup_k: usize,
    /// Upper bound on tool-call rounds per question.
    pub max_agent_turns: usize,
    pub sql_timeout_secs: u64,
    pub embed_timeout_secs: u64,
    /// Tables and columns mined for proper-noun candidates at startup.
    pub noun_columns: Vec<ColumnSpec>,
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let openai_key = std::env::var("OPENAI_API_KEY")
            .map_err(|e| anyhow::anyhow!("Failed to load OPENAI_API_KEY: {}", e))?;

        let database_url = format!(
            "postgresql://{}:{}@{}:{}/{}",
            env_or("DB_USER", "postgres"),
            env_or("DB_PASSWORD", ""),
            env_or("DB_HOST", "localhost"),
            env_or("DB_PORT", "5432"),
            env_or("DB_NAME", "dvdrental"),
        );

        Ok(Config {
            database_url,
            openai_key,
            chat_model: env_or("CHAT_MODEL", "gpt-4o-mini"),
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            lookup_k: env_parse_or("LOOKUP_K", 3),
            max_agent_turns: env_parse_or("MAX_AGENT_TURNS", 10),
            sql_timeout_secs: env_parse_or("SQL_TIMEOUT_SECS", 30),
            embed_timeout_secs: env_parse_or("EMBED_TIMEOUT_SECS", 60),
            noun_columns: default_noun_columns(),
        })
    }
}

/// Default extraction set for the dvdrental demo schema.
pub fn default_noun_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("actor", &["first_name", "last_name"]),
        ColumnSpec::new("city", &["city"]),
        ColumnSpec::new("country", &["country"]),
    ]
}
