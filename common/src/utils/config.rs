use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    OpenAI,
    Gemini,
}

fn default_llm_provider() -> LlmProviderKind {
    LlmProviderKind::OpenAI
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    pub jwt_secret: String,
    #[serde(default = "default_access_token_ttl_hours")]
    pub access_token_ttl_hours: i64,
    #[serde(default = "default_refresh_token_ttl_days")]
    pub refresh_token_ttl_days: i64,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProviderKind,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_access_token_ttl_hours() -> i64 {
    24
}

fn default_refresh_token_ttl_days() -> i64 {
    7
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

fn default_rate_limit_per_minute() -> u32 {
    100
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tool_rounds() -> usize {
    5
}

fn default_environment() -> String {
    "production".to_string()
}

impl AppConfig {
    /// Checks the settings the server cannot run safely without.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt_secret.len() < 32 {
            return Err(AppError::Config(
                "jwt_secret must be at least 32 characters".into(),
            ));
        }
        if self.access_token_ttl_hours < 1 {
            return Err(AppError::Config(
                "access_token_ttl_hours must be at least 1".into(),
            ));
        }
        if self.refresh_token_ttl_days < 1 {
            return Err(AppError::Config(
                "refresh_token_ttl_days must be at least 1".into(),
            ));
        }
        if self.max_tool_rounds == 0 {
            return Err(AppError::Config("max_tool_rounds must be at least 1".into()));
        }
        match self.llm_provider {
            LlmProviderKind::OpenAI if self.openai_api_key.is_empty() => Err(AppError::Config(
                "openai_api_key is required when llm_provider is openai".into(),
            )),
            LlmProviderKind::Gemini if self.gemini_api_key.is_empty() => Err(AppError::Config(
                "gemini_api_key is required when llm_provider is gemini".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn cors_origins_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration suitable for tests running against an in-memory database.
    pub fn for_tests() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "test".to_string(),
            surrealdb_password: "test".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            http_port: 3000,
            jwt_secret: "test-secret-key-that-is-long-enough-for-hs256".to_string(),
            access_token_ttl_hours: default_access_token_ttl_hours(),
            refresh_token_ttl_days: default_refresh_token_ttl_days(),
            cors_origins: default_cors_origins(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            llm_provider: LlmProviderKind::OpenAI,
            openai_api_key: "test-key".to_string(),
            openai_base_url: "http://localhost:11434/v1".to_string(),
            gemini_api_key: String::new(),
            chat_model: None,
            max_tool_rounds: default_max_tool_rounds(),
            environment: "test".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_test_config() {
        assert!(AppConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = AppConfig::for_tests();
        config.jwt_secret = "short".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_requires_key_for_selected_provider() {
        let mut config = AppConfig::for_tests();
        config.llm_provider = LlmProviderKind::Gemini;
        assert!(config.validate().is_err());

        config.gemini_api_key = "gemini-key".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cors_origins_list_trims_entries() {
        let mut config = AppConfig::for_tests();
        config.cors_origins = "http://a.test, http://b.test ,".to_string();
        assert_eq!(
            config.cors_origins_list(),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
