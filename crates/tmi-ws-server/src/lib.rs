//! The WebSocket/REST transport for the collaboration core: wires
//! `tmi_collab::Hub` to axum, translating HTTP upgrade semantics and the
//! thin session control plane spec.md §6 describes. Everything stateful
//! lives in `tmi-collab`; this crate is transport glue plus the two
//! collaborator trait implementations a standalone deployment needs.

pub mod auth;
pub mod config;
pub mod endpoint;
pub mod handlers;
pub mod reference;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tmi_collab::AuthorizationResolver;
use tmi_collab::CreateSessionPolicy;
use tmi_collab::DiagramStore;
use tmi_collab::Hub;
use tmi_protocol::SessionLimits;

use crate::auth::TokenVerifier;

/// Shared application state handed to every handler. Holds the `Hub` plus
/// direct references to the two collaborator traits, since the handshake
/// handler needs to run its own 404/403 checks before a `Session` exists to
/// ask (spec.md §6).
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub authorization: Arc<dyn AuthorizationResolver>,
    pub store: Arc<dyn DiagramStore>,
    pub tokens: Arc<dyn TokenVerifier>,
    pub limits: SessionLimits,
    pub create_session_policy: CreateSessionPolicy,
}

/// Build the router: the WebSocket upgrade (spec.md §6's
/// `/ws/diagrams/{diagramID}`, generalized here to the threat-model
/// subresource form the same section mentions as equivalent), the
/// `.../collaborate` REST control plane, and a liveness `/status` probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/threat_models/:tm_id/diagrams/:diagram_id/ws",
            get(handlers::socket_handler),
        )
        .route(
            "/threat_models/:tm_id/diagrams/:diagram_id/collaborate",
            get(handlers::get_session).post(handlers::post_session).delete(handlers::delete_session),
        )
        .route("/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
