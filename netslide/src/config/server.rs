use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Args;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::magic::RelativePathBuf,
    Figment,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::{
    error::Error,
    service::{
        token::{DEFAULT_TOKEN_LENGTH, MAX_TOKEN_LENGTH, MIN_TOKEN_LENGTH},
        DisconnectPolicy, HubOp, MultiplexHub,
    },
};

use super::TracingGuard;

pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);

#[derive(Deserialize, Serialize, Debug)]
pub struct ServerConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) port: Option<u16>,
    pub(crate) disconnect_policy: DisconnectPolicy,
    pub(crate) token_length: usize,
    pub(crate) log_path: Option<RelativePathBuf>,
    pub(crate) file_log: bool,
}

#[derive(Args, Debug, Serialize, Default)]
#[command(rename_all = "kebab-case")]
pub struct ServerConfigCli {
    /// The address to bind to, default to `0.0.0.0:3000`
    #[arg(short, long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub bind: Option<String>,
    /// The port to listen on, overriding the port part of the bind address.
    /// Also read from the `PORT` environment variable.
    #[arg(short, long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub port: Option<u16>,
    /// The path of the config file
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub config: Option<String>,
    /// What to forget when a client disconnects, default to `clear-all`
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub disconnect_policy: Option<DisconnectPolicy>,
    /// The length of secrets minted by `/token`, default to 16
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub token_length: Option<usize>,
    /// The log file path. If not specified, then the default rolling log file path would be used.
    /// If specified, then the log file would be exactly at the path specified.
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub log_path: Option<String>,
    /// Enable logging to file
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::ops::Not::not")]
    pub file_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_SERVER_ADDR,
            port: None,
            disconnect_policy: DisconnectPolicy::default(),
            token_length: DEFAULT_TOKEN_LENGTH,
            log_path: None,
            file_log: false,
        }
    }
}

impl ServerConfig {
    pub fn new(cli: &ServerConfigCli) -> crate::error::Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::from(Self::default(), "server"))
            .merge(Toml::file(cli.config.as_deref().unwrap_or("config.toml")).nested())
            .merge(Env::prefixed("SLIDEMUX_").profile("server"))
            .merge(Env::raw().only(&["port"]).profile("server"))
            .merge(Serialized::from(cli, "server"))
            .select("server")
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&self.token_length) {
            return Err(Error::InvalidConfig(figment::Error::from(format!(
                "token length must be within {}..={}, got {}",
                MIN_TOKEN_LENGTH, MAX_TOKEN_LENGTH, self.token_length
            ))));
        }
        Ok(())
    }

    /// The address the listener binds to, with `port` taking precedence over
    /// the port in `bind`.
    pub fn listen_addr(&self) -> SocketAddr {
        match self.port {
            Some(port) => SocketAddr::new(self.bind.ip(), port),
            None => self.bind,
        }
    }

    pub fn build_multiplex_hub(
        &self,
        cancel_token: CancellationToken,
        rx: UnboundedReceiver<HubOp>,
    ) -> MultiplexHub {
        MultiplexHub::new(cancel_token, rx, self.disconnect_policy)
    }

    pub fn build_app_state(&self, hub_tx: UnboundedSender<HubOp>) -> AppState {
        AppState {
            hub_tx,
            token_length: self.token_length,
        }
    }

    pub fn setup_tracing_subscriber(&self) -> crate::error::Result<TracingGuard> {
        let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netslide=info".into()),
        );
        if self.file_log {
            let file_logger = self
                .log_path
                .as_ref()
                .and_then(|p| {
                    let path = p.relative();
                    let dir = path.parent();
                    let file_name = path.file_name();
                    match (dir, file_name) {
                        (Some(dir), Some(file_name)) => {
                            Some(tracing_appender::rolling::never(dir, file_name))
                        }
                        _ => None,
                    }
                })
                .or_else(|| {
                    dirs::cache_dir()
                        .map(|mut p| {
                            p.push("slidemux");
                            p
                        })
                        .map(|dir| {
                            tracing_appender::rolling::daily(
                                dir,
                                format!("{}.log", self.listen_addr()),
                            )
                        })
                })
                .ok_or(Error::InvalidConfig(figment::Error::from(
                    "log path not valid and cache directory not found",
                )))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_logger);
            let env_filter = tracing_subscriber::EnvFilter::try_from_env("SLIDEMUX_LOG_FILE_FILTER")
                .unwrap_or_else(|_| "netslide=info".into());
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(env_filter),
                )
                .try_init()
                .map_err(|e| Error::Custom(e.to_string()))?;
            Ok(TracingGuard {
                file_guard: Some(guard),
            })
        } else {
            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|e| Error::Custom(e.to_string()))?;
            Ok(TracingGuard { file_guard: None })
        }
    }
}

/// State shared with HTTP and WebSocket handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub hub_tx: UnboundedSender<HubOp>,
    pub token_length: usize,
}
