//! HTTP surface (§4.5): actix-web adapter over [`reality_protocol::SyncHandler`].
//! Every response carries `Content-Type: application/json`; write-path
//! responses additionally carry `X-Reality-Server` / `X-Reality-Gossip`.
//!
//! Lives in this crate (rather than in the `realityd` binary) so it can be
//! exercised with `actix_web::test` from an integration test without
//! spinning up the whole binary, mirroring how nearcore keeps its JSON-RPC
//! surface in a library crate (`chain/jsonrpc`) separate from `neard`.

use crate::Registry;
use actix_web::web::{Data, Json, Query};
use actix_web::{HttpResponse, Responder};
use reality_protocol::headers::{encode_gossip_header, GOSSIP_HEADER, SERVER_HEADER};
use reality_protocol::{ErrorEnvelope, InvalidationRequest, NodeUpdateRequest, ProtocolError, SyncRequest};
use serde::Deserialize;
use std::sync::Arc;

fn error_response(err: ProtocolError) -> HttpResponse {
    tracing::warn!(target: "http", status = err.status_code(), error = %err, "request failed");
    HttpResponse::build(actix_web::http::StatusCode::from_u16(err.status_code()).unwrap())
        .json(ErrorEnvelope { error: err.client_message() })
}

pub async fn sync(registry: Data<Arc<Registry>>, body: Json<SyncRequest>) -> impl Responder {
    match registry.handler.handle_sync(body.into_inner()).await {
        Ok(resp) => {
            let gossip = registry.handler.gossip(resp.mesh.server_version.unwrap_or(0));
            HttpResponse::Ok()
                .insert_header((SERVER_HEADER, registry.config.server_id.clone()))
                .insert_header((GOSSIP_HEADER, encode_gossip_header(&gossip)))
                .json(resp)
        }
        Err(e) => error_response(e),
    }
}

pub async fn invalidate(registry: Data<Arc<Registry>>, body: Json<InvalidationRequest>) -> impl Responder {
    match registry.handler.handle_invalidate(body.into_inner()).await {
        Ok(resp) => {
            let max_version = registry.handler.current_max_version().await.unwrap_or(0);
            let gossip = registry.handler.gossip(max_version);
            HttpResponse::Ok()
                .insert_header((SERVER_HEADER, registry.config.server_id.clone()))
                .insert_header((GOSSIP_HEADER, encode_gossip_header(&gossip)))
                .json(resp)
        }
        Err(e) => error_response(e),
    }
}

pub async fn update(registry: Data<Arc<Registry>>, body: Json<NodeUpdateRequest>) -> impl Responder {
    match registry.handler.handle_update(body.into_inner()).await {
        Ok(resp) => {
            let gossip = registry.handler.gossip(resp.version);
            HttpResponse::Ok()
                .insert_header((SERVER_HEADER, registry.config.server_id.clone()))
                .insert_header((GOSSIP_HEADER, encode_gossip_header(&gossip)))
                .json(resp)
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct VersionsQuery {
    #[serde(default)]
    since: u64,
}

pub async fn versions(registry: Data<Arc<Registry>>, query: Query<VersionsQuery>) -> impl Responder {
    match registry.handler.handle_versions(query.since).await {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => error_response(e),
    }
}

pub async fn health(registry: Data<Arc<Registry>>) -> impl Responder {
    let resp = registry.handler.handle_health().await;
    let status = match resp.status {
        reality_protocol::HealthStatus::Healthy => actix_web::http::StatusCode::OK,
        reality_protocol::HealthStatus::Degraded => actix_web::http::StatusCode::OK,
        reality_protocol::HealthStatus::Unhealthy => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
    };
    HttpResponse::build(status).json(resp)
}

pub async fn not_found() -> impl Responder {
    HttpResponse::NotFound().json(ErrorEnvelope { error: "not found".to_string() })
}
