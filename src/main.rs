//! Boot harness for `mesh-core`, grounded on the teacher's `main.rs`:
//! tracing init, config load, background tasks spawned (owned by the
//! library's own constructors here, not by this binary), HTTP surface
//! for a status endpoint.

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use mesh_core::config::HttpKvConfig;
use mesh_core::naming::StaticLocalEnv;
use mesh_core::{BalancerKind, MeshClient};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
struct AppState {
    client: Arc<MeshClient>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .compact()
        .init();

    let env = Arc::new(StaticLocalEnv {
        namespace_id: env::var("MESH_NAMESPACE_ID").unwrap_or_else(|_| "default".to_string()),
        group_id: env::var("MESH_GROUP_ID").unwrap_or_default(),
    });

    let kv = HttpKvConfig {
        address: env::var("MESH_KV_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8500".to_string()),
        token: env::var("MESH_KV_TOKEN").ok(),
        namespace_id: env::var("MESH_KV_NAMESPACE_ID").ok(),
        app_id: env::var("MESH_APP_ID").ok(),
        wait: Duration::from_secs(55),
    };

    info!(namespace = %env.namespace_id(), kv_address = %kv.address, "booting mesh-core client");
    let client = Arc::new(MeshClient::new(env, kv, BalancerKind::P2c)?);
    let state = AppState { client: client.clone() };

    let addr: SocketAddr = env::var("MESH_STATUS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:5588".to_string())
        .parse()?;
    let app = AxumRouter::new()
        .route("/status", get(status))
        .with_state(state);

    info!("listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    client.shutdown();
    Ok(())
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ready = state.client.ready.snapshot();
    Json(serde_json::json!({
        "ready_instances": ready.len(),
    }))
}
