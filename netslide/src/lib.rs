pub mod api;
pub mod config;
pub mod error;
pub mod schema;
pub mod server;
pub mod service;
pub mod signal;
pub mod websocket;
