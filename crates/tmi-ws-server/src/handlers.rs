//! axum handlers: the WebSocket upgrade (spec.md §6) and the thin REST
//! control plane around it (`GET`/`POST`/`DELETE .../collaborate`, plus a
//! `/status` probe). The collaboration core owns everything past the
//! handshake; these handlers exist only to translate HTTP/WS semantics into
//! calls on `Hub`/`SessionHandle`.

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use tmi_collab::CreateSessionPolicy;
use tmi_collab::SessionSnapshot;
use tmi_protocol::DiagramId;
use tmi_protocol::ThreatModelId;
use tmi_protocol::UserId;

use crate::AppState;
use crate::endpoint;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    token: String,
}

/// `GET /threat_models/:tm_id/diagrams/:diagram_id/collaborate` as a
/// WebSocket upgrade. Rejects before upgrading with the status spec.md §6
/// calls for: 401 bad token, 404 unknown diagram, 403 no authorization,
/// 409 previously removed from this session.
pub async fn socket_handler(
    State(state): State<AppState>,
    Path((tm_id, diagram_id)): Path<(String, String)>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let threat_model_id = ThreatModelId::from(tm_id);
    let diagram_id = DiagramId::from(diagram_id);

    let Some(user) = state.tokens.verify(&query.token).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if state.store.load(&threat_model_id, &diagram_id).await.is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(_role) = state.authorization.resolve(&user, &threat_model_id, &diagram_id).await else {
        return StatusCode::FORBIDDEN.into_response();
    };

    let session = match state.hub.session_for(&threat_model_id, &diagram_id).await {
        Ok(session) => session,
        Err(err) => {
            warn!(%diagram_id, error = %err, "failed to obtain session for websocket upgrade");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if session.is_denylisted(&user).await {
        return StatusCode::CONFLICT.into_response();
    }

    let limits = state.limits;
    ws.on_upgrade(move |socket| endpoint::run(socket, session, user, limits))
}

#[derive(Debug, Serialize)]
pub struct CollaborationSessionView {
    pub diagram_id: DiagramId,
    pub phase: &'static str,
    pub host: Option<UserId>,
    pub presenter: Option<UserId>,
    pub participant_count: usize,
    pub update_vector: u64,
}

impl From<SessionSnapshot> for CollaborationSessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        use tmi_collab::Phase;
        Self {
            diagram_id: snapshot.diagram_id,
            phase: match snapshot.phase {
                Phase::Forming => "forming",
                Phase::Active => "active",
                Phase::Draining => "draining",
                Phase::Terminated => "terminated",
            },
            host: snapshot.host,
            presenter: snapshot.presenter,
            participant_count: snapshot.participant_count,
            update_vector: snapshot.update_vector,
        }
    }
}

/// `GET .../collaborate`: look without creating, spec.md §6's read-only
/// status check a client makes before attempting to join.
pub async fn get_session(
    State(state): State<AppState>,
    Path((_tm_id, diagram_id)): Path<(String, String)>,
) -> Response {
    let diagram_id = DiagramId::from(diagram_id);
    match state.hub.lookup(&diagram_id).await {
        Some(handle) => match handle.snapshot().await {
            Some(snapshot) => Json(CollaborationSessionView::from(snapshot)).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `POST .../collaborate`: idempotent session creation (spec.md §6, §9
/// Open Question 1). Behavior is governed by `Config::create_session_policy`
/// (see DESIGN.md); defaults to returning the existing session rather than
/// conflicting the caller.
pub async fn post_session(
    State(state): State<AppState>,
    Path((tm_id, diagram_id)): Path<(String, String)>,
) -> Response {
    let threat_model_id = ThreatModelId::from(tm_id);
    let diagram_id = DiagramId::from(diagram_id);

    let (handle, created) = match state.hub.create_or_get(&threat_model_id, &diagram_id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(%diagram_id, error = %err, "failed to create session");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    if !created && state.create_session_policy == CreateSessionPolicy::Conflict {
        return StatusCode::CONFLICT.into_response();
    }

    match handle.snapshot().await {
        Some(snapshot) => {
            let status = if created { StatusCode::CREATED } else { StatusCode::OK };
            (status, Json(CollaborationSessionView::from(snapshot))).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `DELETE .../collaborate`: owner-authorized end-session (spec.md §6).
/// Authorization to call this endpoint at all is the surrounding service's
/// job; by the time this handler runs the caller is already trusted.
pub async fn delete_session(
    State(state): State<AppState>,
    Path((_tm_id, diagram_id)): Path<(String, String)>,
) -> Response {
    let diagram_id = DiagramId::from(diagram_id);
    match state.hub.lookup(&diagram_id).await {
        Some(handle) => {
            handle.force_end().await;
            StatusCode::ACCEPTED.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub active_sessions: usize,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(StatusView {
        active_sessions: state.hub.list_active().await.len(),
    })
}
