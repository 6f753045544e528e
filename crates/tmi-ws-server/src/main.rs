use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tmi_collab::Hub;
use tmi_ws_server::AppState;
use tmi_ws_server::auth::DevTokenVerifier;
use tmi_ws_server::build_router;
use tmi_ws_server::config::ServerConfig;
use tmi_ws_server::reference::InMemoryDiagramStore;
use tmi_ws_server::reference::OpenAuthorizationResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server_config = ServerConfig::from_env();
    let collab_config = server_config.load_collab_config()?;

    let authorization: Arc<dyn tmi_collab::AuthorizationResolver> =
        Arc::new(OpenAuthorizationResolver::new(tmi_protocol::Role::Writer));
    let store: Arc<dyn tmi_collab::DiagramStore> = Arc::new(InMemoryDiagramStore::new());
    let hub = Hub::new(Arc::clone(&authorization), Arc::clone(&store), collab_config.limits);

    let state = AppState {
        hub,
        authorization,
        store,
        tokens: Arc::new(DevTokenVerifier),
        limits: collab_config.limits,
        create_session_policy: collab_config.create_session_policy,
    };

    let router = build_router(state);
    let addr = server_config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "tmi-ws-server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
