use std::sync::Arc;

use assistant_pipeline::{AgentLoopConfig, ChatPipeline, Oracle};
use common::{
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, jwt::JwtManager},
};

use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub jwt: Arc<JwtManager>,
    pub chat: Arc<ChatPipeline>,
    pub rate_limiter: RateLimiter,
}

impl ApiState {
    /// Wires the shared services around an already initialized database and oracle.
    pub fn new(config: &AppConfig, db: Arc<SurrealDbClient>, oracle: Arc<dyn Oracle>) -> Self {
        let chat = ChatPipeline::new(Arc::clone(&db), oracle, AgentLoopConfig::from_config(config));

        Self {
            db,
            config: config.clone(),
            jwt: Arc::new(JwtManager::from_config(config)),
            chat: Arc::new(chat),
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
        }
    }
}
