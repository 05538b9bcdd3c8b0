use anyhow::{Context, Result};
use ragchat_core::chunk::ChunkerConfig;
use ragchat_core::index::IndexSettings;
use ragchat_core::models::QueryMode;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Chunk sizes, measured in UTF-8 bytes of the extracted text.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_document: usize,
}

fn default_max_chars() -> usize {
    1000
}
fn default_min_chars() -> usize {
    200
}
fn default_overlap_chars() -> usize {
    200
}
fn default_max_chunks() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            overlap_chars: default_overlap_chars(),
            max_chunks_per_document: default_max_chunks(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chars: self.max_chars,
            min_chars: self.min_chars,
            overlap_chars: self.overlap_chars,
            max_chunks: self.max_chunks_per_document,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub default_mode: QueryMode,
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,
    #[serde(default = "default_topic_terms")]
    pub topic_terms_per_chunk: usize,
}

fn default_max_passages() -> usize {
    8
}
fn default_topic_terms() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: QueryMode::default(),
            max_passages: default_max_passages(),
            topic_terms_per_chunk: default_topic_terms(),
        }
    }
}

impl RetrievalConfig {
    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            topic_terms_per_chunk: self.topic_terms_per_chunk,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

fn default_token_budget() -> usize {
    2000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_document_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "txt", "docx", "doc", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: default_max_document_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. When document context is provided, answer from it \
     and cite passages by their reference id in square brackets."
        .to_string()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_history_turns() -> usize {
    5
}
fn default_queue_depth() -> usize {
    16
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            queue_depth: default_queue_depth(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let chunking = &config.chunking;
    if chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if chunking.min_chars > chunking.max_chars {
        anyhow::bail!("chunking.min_chars must be <= chunking.max_chars");
    }
    if chunking.overlap_chars >= chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    if chunking.max_chunks_per_document == 0 {
        anyhow::bail!("chunking.max_chunks_per_document must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.max_passages < 1 {
        anyhow::bail!("retrieval.max_passages must be >= 1");
    }
    if config.context.token_budget < 1 {
        anyhow::bail!("context.token_budget must be >= 1");
    }

    // Validate completion
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.upload.max_document_bytes, 10 * 1024 * 1024);
        assert_eq!(config.retrieval.default_mode, QueryMode::Hybrid);
        assert!(!config.completion.is_enabled());
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
[retrieval]
default_mode = "global"
max_passages = 4

[completion]
provider = "openai"
model = "gpt-4o"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.default_mode, QueryMode::Global);
        assert_eq!(config.retrieval.max_passages, 4);
        assert_eq!(config.retrieval.topic_terms_per_chunk, 3);
        assert_eq!(config.completion.model, "gpt-4o");
        assert_eq!(config.completion.timeout_secs, 120);
    }

    #[test]
    fn test_rejects_bad_values() {
        for body in [
            "[chunking]\nmax_chars = 0",
            "[chunking]\nmin_chars = 2000",
            "[chunking]\noverlap_chars = 1000",
            "[retrieval]\nmax_passages = 0",
            "[context]\ntoken_budget = 0",
            "[completion]\ntemperature = 3.5",
            "[completion]\nprovider = \"mystery\"",
            "[retrieval]\ndefault_mode = \"semantic\"",
        ] {
            let file = write_config(body);
            assert!(load_config(file.path()).is_err(), "accepted: {}", body);
        }
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = load_or_default(Path::new("/nonexistent/ragchat.toml")).unwrap();
        assert_eq!(config.context.token_budget, 2000);
    }
}
