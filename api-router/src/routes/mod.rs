pub mod auth;
pub mod chat;
pub mod liveness;
pub mod readiness;
pub mod tasks;
pub mod users;
