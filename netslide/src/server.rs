use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::router;
use crate::config::{AppState, ServerConfig, ServerConfigCli};
use crate::service::{HubOp, MultiplexHub};
use crate::signal::wait_for_shutdown;

pub struct MuxServer {
    pub hub: MultiplexHub,
    pub app_state: AppState,
    pub listener: TcpListener,
    pub cancel_token: CancellationToken,
}

impl MuxServer {
    pub async fn main(cli: ServerConfigCli) {
        match ServerConfig::new(&cli) {
            Ok(config) => {
                let _guard = match config.setup_tracing_subscriber() {
                    Ok(guard) => guard,
                    Err(e) => {
                        init_fallback_tracing();
                        tracing::error!("{}", e);
                        return;
                    }
                };
                match Self::setup(config).await {
                    Ok(server) => {
                        if let Err(e) = server.run().await {
                            tracing::error!("{}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("{}", e);
                    }
                }
            }
            Err(e) => {
                init_fallback_tracing();
                tracing::error!("{}", e);
            }
        }
    }

    pub async fn setup(config: ServerConfig) -> crate::error::Result<Self> {
        tracing::debug!("Relay is setting up");
        let cancel_token = CancellationToken::new();
        let (hub_tx, hub_rx) = tokio::sync::mpsc::unbounded_channel();
        let hub = config.build_multiplex_hub(cancel_token.clone(), hub_rx);
        let app_state = config.build_app_state(hub_tx);
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self {
            hub,
            app_state,
            listener,
            cancel_token,
        })
    }

    pub fn local_addr(&self) -> crate::error::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub_sender(&self) -> UnboundedSender<HubOp> {
        self.app_state.hub_tx.clone()
    }

    pub async fn run(self) -> crate::error::Result<()> {
        tracing::debug!("Relay is running");
        let MuxServer {
            mut hub,
            app_state,
            listener,
            cancel_token,
        } = self;
        let hub_hd = tokio::spawn(async move { hub.run().await });
        let app = router(app_state);
        tracing::info!("Relay is listening on: {}", listener.local_addr()?);
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown({
            let cancel_token = cancel_token.clone();
            async move {
                let reason = wait_for_shutdown(cancel_token).await;
                tracing::warn!(reason = %reason, "Relay is shutting down");
            }
        })
        .await
        {
            tracing::error!("Server error: {}", e);
        }
        cancel_token.cancel();
        hub_hd.await?;
        Ok(())
    }
}

fn init_fallback_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netslide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
