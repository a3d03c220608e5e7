use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{registry::SecretRegistry, ConnectionId};
use crate::{
    error::Result,
    websocket::{ServerEvent, StatePayload},
};

/// What happens to the registry when a connection goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectPolicy {
    /// Any disconnect resets the session: every secret is forgotten, whoever
    /// registered it. Suits one presentation per relay process.
    #[default]
    ClearAll,
    /// Only the secrets registered by the departing connection are released.
    OwnedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub connections: usize,
    pub active_secrets: usize,
}

/// Owns the secret registry and the outbound channel of every live
/// connection.
///
/// All connection events funnel through one channel and are applied one at a
/// time, so the registry needs no locking and is never seen half-updated.
#[derive(Debug)]
pub struct MultiplexHub {
    registry: SecretRegistry,
    /// Outbound event channel of each connected client
    connections: HashMap<ConnectionId, UnboundedSender<ServerEvent>>,
    policy: DisconnectPolicy,
    /// Cancellation token for shutdown
    cancel_token: CancellationToken,
    /// Channel receiver for connection events
    rx: UnboundedReceiver<HubOp>,
}

#[derive(Debug)]
pub enum HubOp {
    /// A client connected
    Connect {
        conn_id: ConnectionId,
        sender: UnboundedSender<ServerEvent>,
    },
    /// A presenter claims a secret
    Register {
        conn_id: ConnectionId,
        secret: String,
    },
    /// A client published presentation state
    StateChanged {
        conn_id: ConnectionId,
        payload: StatePayload,
    },
    /// A client went away
    Disconnect { conn_id: ConnectionId },
    /// Snapshot of the hub for health reporting
    Stats {
        response_tx: oneshot::Sender<HubStats>,
    },
}

impl MultiplexHub {
    pub fn new(
        cancel_token: CancellationToken,
        rx: UnboundedReceiver<HubOp>,
        policy: DisconnectPolicy,
    ) -> Self {
        Self {
            registry: SecretRegistry::new(),
            connections: HashMap::new(),
            policy,
            cancel_token,
            rx,
        }
    }

    fn connect(&mut self, conn_id: ConnectionId, sender: UnboundedSender<ServerEvent>) {
        self.connections.insert(conn_id, sender);
        tracing::debug!(
            conn_id = %conn_id,
            connections = self.connections.len(),
            "Client joined the hub"
        );
    }

    fn register(&mut self, conn_id: ConnectionId, secret: String) -> bool {
        if !self.connections.contains_key(&conn_id) {
            tracing::debug!(conn_id = %conn_id, "Ignoring registration from a departed client");
            return false;
        }
        if secret.is_empty() {
            tracing::debug!(conn_id = %conn_id, "Ignoring registration without a secret");
            return false;
        }
        let newly_active = self.registry.register(secret, conn_id);
        if newly_active {
            tracing::info!(
                conn_id = %conn_id,
                active_secrets = self.registry.len(),
                "Presenter registered a new secret"
            );
        }
        newly_active
    }

    /// Relay a state change to every other client if its secret is active.
    ///
    /// Returns the number of clients the event was handed to.
    fn handle_state_changed(&mut self, conn_id: ConnectionId, payload: StatePayload) -> usize {
        if !self.connections.contains_key(&conn_id) {
            tracing::debug!(conn_id = %conn_id, "Dropping state change from a departed client");
            return 0;
        }
        match payload.secret() {
            None => {
                tracing::debug!(conn_id = %conn_id, "Dropping state change without a secret");
                return 0;
            }
            Some(secret) if !self.registry.is_active(secret) => {
                tracing::debug!(conn_id = %conn_id, "Dropping state change for inactive secret");
                return 0;
            }
            Some(_) => {}
        }

        let event = ServerEvent::StateChanged(payload);
        let mut delivered = 0;
        let mut disconnected = Vec::new();
        for (peer_id, sender) in &self.connections {
            if *peer_id == conn_id {
                continue;
            }
            if sender.send(event.clone()).is_err() {
                // Writer side is gone, the socket has closed
                disconnected.push(*peer_id);
            } else {
                delivered += 1;
            }
        }

        for peer_id in disconnected {
            self.disconnect(peer_id);
        }

        tracing::debug!(
            conn_id = %conn_id,
            recipients = delivered,
            "Relayed state change"
        );
        delivered
    }

    fn disconnect(&mut self, conn_id: ConnectionId) {
        if self.connections.remove(&conn_id).is_none() {
            return;
        }
        match self.policy {
            DisconnectPolicy::ClearAll => {
                let cleared = self.registry.clear_all();
                if cleared > 0 {
                    tracing::info!(
                        conn_id = %conn_id,
                        cleared = cleared,
                        "Client left, all secrets cleared"
                    );
                }
            }
            DisconnectPolicy::OwnedOnly => {
                let released = self.registry.release(&conn_id);
                if !released.is_empty() {
                    tracing::info!(
                        conn_id = %conn_id,
                        released = released.len(),
                        "Client left, its secrets were released"
                    );
                }
            }
        }
        tracing::debug!(
            conn_id = %conn_id,
            connections = self.connections.len(),
            "Client left the hub"
        );
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            active_secrets: self.registry.len(),
        }
    }

    fn handle_op(&mut self, op: Option<HubOp>) -> bool {
        match op {
            None => return true,
            Some(op) => match op {
                HubOp::Connect { conn_id, sender } => {
                    self.connect(conn_id, sender);
                }
                HubOp::Register { conn_id, secret } => {
                    self.register(conn_id, secret);
                }
                HubOp::StateChanged { conn_id, payload } => {
                    self.handle_state_changed(conn_id, payload);
                }
                HubOp::Disconnect { conn_id } => {
                    self.disconnect(conn_id);
                }
                HubOp::Stats { response_tx } => {
                    let _ = response_tx.send(self.stats());
                }
            },
        }
        false
    }

    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("Multiplex hub shutting down");
                    break;
                }
                op = self.rx.recv() => {
                    if self.handle_op(op) {
                        break;
                    }
                }
            }
        }
    }
}

// Helper functions for sending operations to the hub
fn send_op(tx: &UnboundedSender<HubOp>, op: HubOp) -> Result<()> {
    tx.send(op)
        .map_err(|_| crate::error::Error::Custom("Multiplex hub unavailable".to_string()))
}

pub fn connect(
    tx: &UnboundedSender<HubOp>,
    conn_id: ConnectionId,
    sender: UnboundedSender<ServerEvent>,
) -> Result<()> {
    send_op(tx, HubOp::Connect { conn_id, sender })
}

pub fn register_secret(
    tx: &UnboundedSender<HubOp>,
    conn_id: ConnectionId,
    secret: String,
) -> Result<()> {
    send_op(tx, HubOp::Register { conn_id, secret })
}

pub fn publish_state_change(
    tx: &UnboundedSender<HubOp>,
    conn_id: ConnectionId,
    payload: StatePayload,
) -> Result<()> {
    send_op(tx, HubOp::StateChanged { conn_id, payload })
}

pub fn disconnect(tx: &UnboundedSender<HubOp>, conn_id: ConnectionId) -> Result<()> {
    send_op(tx, HubOp::Disconnect { conn_id })
}

pub async fn query_stats(tx: &UnboundedSender<HubOp>) -> Result<HubStats> {
    let (response_tx, response_rx) = oneshot::channel();
    send_op(tx, HubOp::Stats { response_tx })?;
    response_rx
        .await
        .map_err(|_| crate::error::Error::Custom("Response channel closed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, value::RawValue, Value};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn create_test_hub(policy: DisconnectPolicy) -> (MultiplexHub, UnboundedSender<HubOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = MultiplexHub::new(CancellationToken::new(), rx, policy);
        (hub, tx)
    }

    fn join(hub: &mut MultiplexHub) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        hub.connect(conn_id, sender);
        (conn_id, receiver)
    }

    fn state(value: Value) -> StatePayload {
        StatePayload::from_raw(RawValue::from_string(value.to_string()).unwrap()).unwrap()
    }

    #[test]
    fn test_unregistered_secret_is_not_relayed() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, mut a_rx) = join(&mut hub);
        let (_b, mut b_rx) = join(&mut hub);

        let delivered = hub.handle_state_changed(a, state(json!({"secret": "nope", "slide": 1})));

        assert_eq!(delivered, 0);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn test_missing_or_empty_secret_is_not_relayed() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, _a_rx) = join(&mut hub);
        let (_b, mut b_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());

        assert_eq!(hub.handle_state_changed(a, state(json!({"slide": 1}))), 0);
        assert_eq!(hub.handle_state_changed(a, state(json!({"secret": ""}))), 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn test_registered_secret_is_relayed_to_peers_only() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, mut a_rx) = join(&mut hub);
        let (_b, mut b_rx) = join(&mut hub);
        let (_c, mut c_rx) = join(&mut hub);

        assert!(hub.register(a, "abc".to_string()));
        let payload = state(json!({"secret": "abc", "slide": 5}));
        let delivered = hub.handle_state_changed(a, payload.clone());

        assert_eq!(delivered, 2);
        for rx in [&mut b_rx, &mut c_rx] {
            assert_eq!(rx.try_recv().unwrap(), ServerEvent::StateChanged(payload.clone()));
            assert!(rx.try_recv().is_err(), "expected exactly one event");
        }
        assert!(a_rx.try_recv().is_err(), "sender must not receive its own event");
    }

    #[test]
    fn test_extra_fields_are_relayed_unchanged() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, _a_rx) = join(&mut hub);
        let (_b, mut b_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());

        let fields = json!({
            "secret": "abc",
            "indexh": 2,
            "indexv": 0,
            "indexf": -1,
            "paused": true,
            "overview": false,
            "socketId": "0123abcd",
            "custom": {"notes": ["a", "b"], "ratio": 1.5}
        });
        hub.handle_state_changed(a, state(fields.clone()));

        let ServerEvent::StateChanged(received) = b_rx.try_recv().unwrap();
        assert_eq!(received.get(), fields.to_string());
    }

    #[test]
    fn test_any_disconnect_clears_all_secrets() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, _a_rx) = join(&mut hub);
        let (b, _b_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());

        // b never registered anything
        hub.disconnect(b);

        assert!(!hub.registry.is_active("abc"));
        assert_eq!(
            hub.stats(),
            HubStats {
                connections: 1,
                active_secrets: 0
            }
        );
    }

    #[test]
    fn test_owned_only_keeps_other_presenters() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::OwnedOnly);
        let (a, _a_rx) = join(&mut hub);
        let (b, _b_rx) = join(&mut hub);
        let (c, mut c_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());
        hub.register(b, "xyz".to_string());

        hub.disconnect(c);
        assert!(hub.registry.is_active("abc"));
        assert!(hub.registry.is_active("xyz"));

        hub.disconnect(b);
        assert!(hub.registry.is_active("abc"));
        assert!(!hub.registry.is_active("xyz"));

        let (d, mut d_rx) = join(&mut hub);
        assert_eq!(hub.handle_state_changed(a, state(json!({"secret": "abc"}))), 1);
        assert!(d_rx.try_recv().is_ok());
        assert_eq!(hub.handle_state_changed(d, state(json!({"secret": "xyz"}))), 0);
        assert!(c_rx.try_recv().is_err());
    }

    #[test]
    fn test_repeated_disconnect_clears_once() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, _a_rx) = join(&mut hub);
        let (b, _b_rx) = join(&mut hub);

        hub.disconnect(b);
        hub.register(a, "abc".to_string());
        hub.disconnect(b);

        assert!(hub.registry.is_active("abc"));
    }

    #[test]
    fn test_closed_peer_is_treated_as_disconnected() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::OwnedOnly);
        let (a, _a_rx) = join(&mut hub);
        let (b, b_rx) = join(&mut hub);
        let (_c, mut c_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());
        hub.register(b, "xyz".to_string());
        drop(b_rx);

        let delivered = hub.handle_state_changed(a, state(json!({"secret": "abc"})));

        assert_eq!(delivered, 1);
        assert!(c_rx.try_recv().is_ok());
        assert!(!hub.connections.contains_key(&b));
        assert!(!hub.registry.is_active("xyz"));
        assert!(hub.registry.is_active("abc"));
    }

    #[test]
    fn test_ops_from_pruned_peer_are_ignored() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::OwnedOnly);
        let (a, _a_rx) = join(&mut hub);
        let (b, b_rx) = join(&mut hub);
        let (_c, mut c_rx) = join(&mut hub);
        hub.register(a, "abc".to_string());
        drop(b_rx);

        // b is pruned here, but frames it sent earlier are still queued
        assert_eq!(hub.handle_state_changed(a, state(json!({"secret": "abc"}))), 1);
        assert!(c_rx.try_recv().is_ok());

        assert!(!hub.register(b, "ghost".to_string()));
        assert_eq!(hub.handle_state_changed(b, state(json!({"secret": "abc"}))), 0);
        hub.disconnect(b);

        assert!(!hub.registry.is_active("ghost"));
        assert!(hub.registry.is_active("abc"));
        assert!(c_rx.try_recv().is_err());
    }

    #[test]
    fn test_register_ignores_empty_secret() {
        let (mut hub, _tx) = create_test_hub(DisconnectPolicy::ClearAll);
        let (a, _a_rx) = join(&mut hub);

        assert!(!hub.register(a, String::new()));
        assert!(hub.registry.is_empty());
    }

    #[tokio::test]
    async fn test_presentation_session_through_hub_loop() {
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = MultiplexHub::new(cancel_token.clone(), rx, DisconnectPolicy::ClearAll);
        let handle = tokio::spawn(async move { hub.run().await });

        let mut clients = Vec::new();
        for _ in 0..3 {
            let conn_id = Uuid::new_v4();
            let (sender, receiver) = mpsc::unbounded_channel();
            connect(&tx, conn_id, sender).unwrap();
            clients.push((conn_id, receiver));
        }
        let (a, mut a_rx) = clients.remove(0);
        let (b, mut b_rx) = clients.remove(0);
        let (_c, mut c_rx) = clients.remove(0);

        register_secret(&tx, a, "xyz".to_string()).unwrap();
        let payload = state(json!({"secret": "xyz", "indexh": 3, "indexv": 1}));
        publish_state_change(&tx, a, payload.clone()).unwrap();

        assert_eq!(
            b_rx.recv().await.unwrap(),
            ServerEvent::StateChanged(payload.clone())
        );
        assert_eq!(
            c_rx.recv().await.unwrap(),
            ServerEvent::StateChanged(payload.clone())
        );

        disconnect(&tx, b).unwrap();
        publish_state_change(&tx, a, payload).unwrap();

        // Ops are applied in order, so once stats come back every earlier op
        // has been handled
        let stats = query_stats(&tx).await.unwrap();
        assert_eq!(
            stats,
            HubStats {
                connections: 2,
                active_secrets: 0
            }
        );
        assert!(c_rx.try_recv().is_err());
        assert!(a_rx.try_recv().is_err());

        cancel_token.cancel();
        handle.await.unwrap();
        assert!(query_stats(&tx).await.is_err());
    }
}
