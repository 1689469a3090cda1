// Tube Relay - Library root

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod http_client;
pub mod upload;
