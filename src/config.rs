//! Environment-driven settings
//!
//! Values are read once at startup after `dotenv` has loaded `.env`.

use std::env;
use std::time::Duration;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SEARCH_BASE_URL: &str = "https://api.duckduckgo.com";

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub llm_name: String,
    pub embedding_name: String,
    pub pinecone_api_key: String,
    pub pinecone_env: String,
    pub index_name: String,
    /// Data-plane host of the index; resolved through the control plane when unset
    pub pinecone_index_host: Option<String>,
    pub database_url: Option<String>,
    pub search_base_url: String,
    pub port: u16,
    pub agent_timeout: Duration,
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let agent_timeout_secs = env::var("AGENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            llm_name: env::var("LLM_NAME").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            embedding_name: env::var("EMBEDDING_NAME")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
            pinecone_api_key: env::var("PINECONE_API_KEY").unwrap_or_default(),
            pinecone_env: env::var("PINECONE_ENV").unwrap_or_else(|_| "gcp-starter".to_string()),
            index_name: env::var("INDEX_NAME").unwrap_or_else(|_| "brainsoft".to_string()),
            pinecone_index_host: env::var("PINECONE_INDEX_HOST")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            database_url: env::var("POSTGRES_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .ok()
                .filter(|v| !v.trim().is_empty()),
            search_base_url: env::var("SEARCH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SEARCH_BASE_URL.to_string()),
            port,
            agent_timeout: Duration::from_secs(agent_timeout_secs),
        }
    }

    /// True when an LLM credential is present and not a placeholder.
    pub fn has_llm_credential(&self) -> bool {
        let key = self.openai_api_key.trim();
        !key.is_empty() && key != "your_openai_api_key_here"
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            llm_name: "gpt-3.5-turbo".to_string(),
            embedding_name: "text-embedding-ada-002".to_string(),
            pinecone_api_key: String::new(),
            pinecone_env: "gcp-starter".to_string(),
            index_name: "brainsoft".to_string(),
            pinecone_index_host: None,
            database_url: None,
            search_base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
            port: 8080,
            agent_timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_key_is_not_a_credential() {
        let mut settings = Settings::default();
        assert!(!settings.has_llm_credential());

        settings.openai_api_key = "your_openai_api_key_here".to_string();
        assert!(!settings.has_llm_credential());

        settings.openai_api_key = "sk-live".to_string();
        assert!(settings.has_llm_credential());
    }
}
