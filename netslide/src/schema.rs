use serde::{Deserialize, Serialize};

/// Presenter credential handed out by `/token`.
///
/// Field names follow what reveal.js multiplex clients expect.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenResp {
    pub secret: String,
    pub socket_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthResp {
    pub status: String,
    pub connections: usize,
    pub active_secrets: usize,
}
