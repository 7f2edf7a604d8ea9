//! HTTP-level exercises of the spec's worked scenarios (§8), driven through
//! the actual actix-web routes rather than calling `SyncHandler` directly
//! (see `reality_protocol::handler`'s own unit tests for that level).

use actix_web::web::Data;
use actix_web::{test, web, App};
use reality::config::{CorsConfig, InvalidationConfig, RateLimitConfig, RedisConfigSection, StorageConfig};
use reality::{http, Config, Registry};
use serde_json::{json, Value};
use std::sync::Arc;

fn config(server_id: &str, peers: Vec<String>) -> Config {
    Config {
        server_id: server_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        base_path: "/reality".to_string(),
        peers,
        cors: CorsConfig::default(),
        rate_limit: RateLimitConfig::default(),
        debug: false,
        storage: StorageConfig::default(),
        redis: RedisConfigSection::default(),
        payload_base_url: None,
        execution_mode: "standalone".to_string(),
        invalidation: InvalidationConfig::default(),
    }
}

async fn registry(server_id: &str, peers: Vec<String>) -> Arc<Registry> {
    Arc::new(Registry::build(config(server_id, peers)).await.unwrap())
}

macro_rules! test_app {
    ($registry:expr) => {
        test::init_service(
            App::new().app_data(Data::new($registry.clone())).service(
                web::scope("/reality")
                    .route("/sync", web::post().to(http::sync))
                    .route("/invalidate", web::post().to(http::invalidate))
                    .route("/update", web::post().to(http::update))
                    .route("/versions", web::get().to(http::versions))
                    .route("/health", web::get().to(http::health)),
            ),
        )
        .await
    };
}

/// S1: a client with no knowledge of a key learns its current version/hash.
#[actix_web::test]
async fn fresh_client_learns_a_key() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let update_req = test::TestRequest::post()
        .uri("/reality/update")
        .set_json(json!({"key": "doc:1", "hash": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}))
        .to_request();
    let update_resp: Value = test::call_and_read_body_json(&app, update_req).await;
    assert_eq!(update_resp["version"], 1);

    let sync_req = test::TestRequest::post()
        .uri("/reality/sync")
        .set_json(json!({"known": {"doc:1": 0}, "clientId": "11111111-1111-1111-1111-111111111111"}))
        .to_request();
    let sync_resp: Value = test::call_and_read_body_json(&app, sync_req).await;
    assert_eq!(sync_resp["changed"]["doc:1"]["version"], 1);
}

/// S2: a client already at the current version sees no entry for that key.
#[actix_web::test]
async fn up_to_date_client_sees_no_changes() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let update_req = test::TestRequest::post()
        .uri("/reality/update")
        .set_json(json!({"key": "doc:1", "hash": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"}))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, update_req).await;

    let sync_req = test::TestRequest::post()
        .uri("/reality/sync")
        .set_json(json!({"known": {"doc:1": 1}, "clientId": "11111111-1111-1111-1111-111111111111"}))
        .to_request();
    let sync_resp: Value = test::call_and_read_body_json(&app, sync_req).await;
    assert!(sync_resp["changed"].get("doc:1").is_none());
}

/// S4: a key the server has never heard of reports the version:0 sentinel.
#[actix_web::test]
async fn unknown_key_returns_sentinel() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let sync_req = test::TestRequest::post()
        .uri("/reality/sync")
        .set_json(json!({"known": {"doc:missing": 3}, "clientId": "11111111-1111-1111-1111-111111111111"}))
        .to_request();
    let sync_resp: Value = test::call_and_read_body_json(&app, sync_req).await;
    assert_eq!(sync_resp["changed"]["doc:missing"]["version"], 0);
    assert_eq!(sync_resp["changed"]["doc:missing"]["hash"], "");
}

/// R3: invalidating the same key twice is a no-op the second time and never
/// bumps the server-global version.
#[actix_web::test]
async fn invalidate_is_idempotent() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let update_req = test::TestRequest::post()
        .uri("/reality/update")
        .set_json(json!({"key": "doc:1", "hash": "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"}))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, update_req).await;

    for _ in 0..2 {
        let inv_req = test::TestRequest::post()
            .uri("/reality/invalidate")
            .set_json(json!({"keys": ["doc:1"]}))
            .to_request();
        let inv_resp: Value = test::call_and_read_body_json(&app, inv_req).await;
        assert_eq!(inv_resp["versions"]["doc:1"], 1);
    }
}

/// P7: an invalidation whose explicit `source` is this server's own id is
/// dropped rather than echoed back or re-propagated.
#[actix_web::test]
async fn self_sourced_invalidation_is_dropped() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let inv_req = test::TestRequest::post()
        .uri("/reality/invalidate")
        .set_json(json!({"keys": ["doc:1"], "source": "server-a"}))
        .to_request();
    let inv_resp: Value = test::call_and_read_body_json(&app, inv_req).await;
    assert_eq!(inv_resp["invalidated"], json!([]));
}

/// A request with an empty `known` map is valid — a client syncing purely to
/// read mesh state before it has learned any key — and gets back an empty
/// `changed` map rather than a validation error.
#[actix_web::test]
async fn empty_known_map_returns_empty_changed() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let sync_req = test::TestRequest::post()
        .uri("/reality/sync")
        .set_json(json!({"known": {}, "clientId": "11111111-1111-1111-1111-111111111111"}))
        .to_request();
    let resp = test::call_service(&app, sync_req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["changed"], json!({}));
}

/// `/health` reflects an otherwise-idle, peerless server as healthy.
#[actix_web::test]
async fn health_reports_healthy_with_no_peers() {
    let reg = registry("server-a", vec![]).await;
    let app = test_app!(reg);

    let health_req = test::TestRequest::get().uri("/reality/health").to_request();
    let resp = test::call_service(&app, health_req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mesh"]["peerCount"], 0);
}

/// S3: many concurrent writers to the same key each get a distinct,
/// monotonically increasing version with no duplicates.
#[actix_web::test]
async fn concurrent_updates_to_one_key_are_linearized() {
    let reg = registry("server-a", vec![]).await;
    let app = Arc::new(test_app!(reg));

    let mut versions = Vec::new();
    for i in 0..50u32 {
        let req = test::TestRequest::post()
            .uri("/reality/update")
            .set_json(json!({"key": "doc:1", "hash": format!("{:064x}", i)}))
            .to_request();
        let resp: Value = test::call_and_read_body_json(app.as_ref(), req).await;
        versions.push(resp["version"].as_u64().unwrap());
    }
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), 50, "every writer must observe a distinct version");
    assert_eq!(versions, (1..=50).collect::<Vec<_>>());
}
