pub mod server;
pub use server::{AppState, ServerConfig, ServerConfigCli};

/// Keeps the non-blocking file writer flushing until the process exits.
pub struct TracingGuard {
    pub file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}
