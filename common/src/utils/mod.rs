pub mod config;
pub mod jwt;
