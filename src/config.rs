//! Pipeline configuration
//!
//! Settings come from an optional YAML file and are then overridden by
//! `KG_RAG_*` environment variables. Every field has a default so the REPL
//! starts with no configuration at all against a local Neo4j and Ollama.

use crate::error::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Supported language model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    Ollama,
    Gemini,
    Anthropic,
}

impl FromStr for LLMProvider {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "ollama" => Ok(LLMProvider::Ollama),
            "gemini" => Ok(LLMProvider::Gemini),
            "anthropic" => Ok(LLMProvider::Anthropic),
            other => Err(RagError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// The LLM provider to use
    pub provider: LLMProvider,
    /// Model name (e.g., "gpt-4o", "llama3")
    pub model: String,
    /// API key (required for OpenAI, Gemini and Anthropic)
    pub api_key: Option<String>,
    /// API base URL (provider default when None)
    pub api_base_url: Option<String>,
    /// System prompt sent with every completion
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call deadline in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            api_base_url: None,
            system_prompt: None,
            temperature: 0.3,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP dialect spoken by the graph store endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDialect {
    /// `POST /api/query` with `{"query": ...}`
    Samyama,
    /// Neo4j transactional endpoint `POST /db/{database}/tx/commit`
    Neo4j,
}

impl FromStr for StoreDialect {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "samyama" => Ok(StoreDialect::Samyama),
            "neo4j" => Ok(StoreDialect::Neo4j),
            other => Err(RagError::Config(format!("unknown store dialect '{}'", other))),
        }
    }
}

/// Graph store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base HTTP URL of the store
    pub url: String,
    pub dialect: StoreDialect,
    /// Database name (Neo4j dialect only)
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-query deadline in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            dialect: StoreDialect::Neo4j,
            database: "neo4j".to_string(),
            username: Some("neo4j".to_string()),
            password: None,
            timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Node context cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Plain-text snapshot file, one line per node
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("nodes_context.txt"),
        }
    }
}

/// Retrieval and synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Labels and relationship types generated queries may reference
    pub allowed_fields: Vec<String>,
    /// Reject generated queries that write or leave the allow-list
    pub validate_queries: bool,
    /// Hops expanded by the fallback traversal
    pub fallback_depth: usize,
    /// Upper bound on relations collected by the fallback traversal
    pub fallback_max_relations: usize,
    /// Fragments handed to the synthesizer
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            allowed_fields: ["Company", "Executive", "Risk", "HAS_RISK", "MANAGED_BY"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            validate_queries: false,
            fallback_depth: 2,
            fallback_max_relations: 30,
            top_k: 5,
        }
    }
}

/// Complete configuration for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
}

impl RagConfig {
    /// Parse a YAML document; missing sections keep their defaults
    pub fn from_yaml_str(yaml: &str) -> RagResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RagError::Config(e.to_string()))
    }

    /// Load from an optional YAML file, then apply process environment overrides
    pub fn load(path: Option<&Path>) -> RagResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    RagError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KG_RAG_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> RagResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KG_RAG_LLM_PROVIDER") {
            self.llm.provider = v.parse()?;
        }
        if let Some(v) = lookup("KG_RAG_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("KG_RAG_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("KG_RAG_LLM_BASE_URL") {
            self.llm.api_base_url = Some(v);
        }
        if let Some(v) = lookup("KG_RAG_STORE_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("KG_RAG_STORE_DIALECT") {
            self.store.dialect = v.parse()?;
        }
        if let Some(v) = lookup("KG_RAG_STORE_DATABASE") {
            self.store.database = v;
        }
        if let Some(v) = lookup("KG_RAG_STORE_USER") {
            self.store.username = Some(v);
        }
        if let Some(v) = lookup("KG_RAG_STORE_PASSWORD") {
            self.store.password = Some(v);
        }
        if let Some(v) = lookup("KG_RAG_CACHE_PATH") {
            self.cache.path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.llm.model.trim().is_empty() {
            return Err(RagError::Config("llm.model must not be empty".to_string()));
        }
        if self.store.url.trim().is_empty() {
            return Err(RagError::Config("store.url must not be empty".to_string()));
        }
        if self.llm.timeout_secs == 0 || self.store.timeout_secs == 0 {
            return Err(RagError::Config("timeouts must be at least one second".to_string()));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}
