use super::handlers::*;
use crate::coordinator::RoundCoordinator;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct RpcServer {
    addr: SocketAddr,
}

impl RpcServer {
    pub fn new(port: u16) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        Self { addr }
    }

    pub async fn run(self, coordinator: Arc<RoundCoordinator>) -> Result<()> {
        let app = Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .route("/inputs", post(register_inputs))
            .route("/input-registration-status", get(input_registration_status))
            .route("/connection-confirmation", post(connection_confirmation))
            .route("/output", post(register_output))
            .route("/coinjoin", post(coinjoin))
            .route("/signature", post(signature))
            .layer(TraceLayer::new_for_http())
            .with_state(coordinator);

        tracing::info!("RPC server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
