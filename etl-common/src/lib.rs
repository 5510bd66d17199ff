pub mod config;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod retry;
