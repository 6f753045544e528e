//! Token verification at the WebSocket handshake (spec.md §6). JWT
//! issuance, OAuth/OIDC login, and the token blacklist all live in the
//! surrounding service (spec.md §1's out-of-scope list); this crate only
//! consumes the narrow interface the core needs: a bearer token in, a
//! `UserId` or nothing out.

use async_trait::async_trait;

use tmi_protocol::UserId;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<UserId>;
}

/// Local/dev stand-in: the token *is* the user id, unsigned. A real
/// deployment wires this trait to the same JWT verifier (plus blacklist
/// check) the HTTP CRUD surface already uses.
pub struct DevTokenVerifier;

#[async_trait]
impl TokenVerifier for DevTokenVerifier {
    async fn verify(&self, token: &str) -> Option<UserId> {
        if token.trim().is_empty() {
            None
        } else {
            Some(UserId::from(token.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_is_rejected() {
        assert!(DevTokenVerifier.verify("").await.is_none());
        assert!(DevTokenVerifier.verify("   ").await.is_none());
    }

    #[tokio::test]
    async fn non_empty_token_becomes_the_user_id() {
        assert_eq!(DevTokenVerifier.verify("alice").await, Some(UserId::from("alice")));
    }
}
