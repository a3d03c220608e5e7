use rand::{distr::Alphanumeric, Rng};

use crate::schema::TokenResp;

pub const DEFAULT_TOKEN_LENGTH: usize = 16;
pub const MIN_TOKEN_LENGTH: usize = 8;
pub const MAX_TOKEN_LENGTH: usize = 128;

/// Public identifier that viewers use to follow a presentation without
/// learning its secret.
pub fn socket_id(secret: &str) -> String {
    format!("{:x}", md5::compute(secret.as_bytes()))
}

/// Mint a fresh presenter credential with an alphanumeric secret.
pub fn mint_token(length: usize) -> TokenResp {
    let secret: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    let socket_id = socket_id(&secret);
    TokenResp { secret, socket_id }
}
