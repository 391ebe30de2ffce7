pub mod api;
pub mod cache;
pub mod composer;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod openai;
pub mod pacing;
pub mod responder;
pub mod retrieval;
pub mod sentiment;
pub mod server;
pub mod watch;
