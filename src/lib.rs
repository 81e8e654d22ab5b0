pub mod cache;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod game_data;
pub mod handlers;
pub mod job;
pub mod link;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod state;
pub mod steam;
