pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http_client;
pub mod providers;
pub mod server;
pub mod tokenizer;
