use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/status", get(handlers::status))
        // Ingest (gated by the allowed-pollers set per handler)
        .route("/ingest/updates", post(handlers::ingest_updates))
        .route("/ingest/sweep", post(handlers::ingest_sweep))
        .route("/ingest/sync", post(handlers::ingest_sync))
        .route("/ingest/snmp", post(handlers::ingest_snmp))
        .route("/ingest/telemetry", post(handlers::ingest_telemetry))
        // Canonical lookup
        .route("/devices/canonical", post(handlers::get_canonical_device))
        // Onboarding admin
        .route(
            "/onboarding/packages",
            post(handlers::create_package).get(handlers::list_packages),
        )
        .route(
            "/onboarding/packages/:id",
            get(handlers::get_package).delete(handlers::delete_package),
        )
        .route("/onboarding/packages/:id/deliver", post(handlers::deliver_package))
        .route("/onboarding/packages/:id/revoke", post(handlers::revoke_package))
        .route("/onboarding/packages/:id/events", get(handlers::list_package_events))
        .route("/onboarding/templates", get(handlers::list_templates))
        .route("/onboarding/activations", post(handlers::record_activation))
        // Identity backfill
        .route("/backfill", post(handlers::post_backfill))
        .route("/backfill/dry-run", post(handlers::post_backfill_dry_run))
        // Auth middleware applies to all routes above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::POLLER_ID_HEADER;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use radar_identity::CanonicalResolver;
    use radar_ingest::IngestBuffers;
    use radar_onboarding::{LocalTrustDomain, OnboardingService};
    use radar_store::{InMemoryKv, InMemoryStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_state() -> AppState {
        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(InMemoryKv::new());
        let mut cfg = radar_config::CoreConfig::default().onboarding;
        cfg.encryption_key = vec![3u8; 32];
        let onboarding = Arc::new(
            OnboardingService::new(
                store.clone(),
                store.clone(),
                kv.clone(),
                Arc::new(LocalTrustDomain::new()),
                cfg,
            )
            .unwrap(),
        );
        AppState {
            devices: store.clone(),
            telemetry: store.clone(),
            kv,
            resolver: Arc::new(CanonicalResolver::new(store)),
            onboarding,
            buffers: Arc::new(IngestBuffers::new()),
            publisher: None,
            auth_token: Arc::new(TEST_TOKEN.to_string()),
            kv_namespace: "default".to_string(),
            sync_chunk: 64,
        }
    }

    fn test_app() -> Router {
        build_app(test_state())
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_and_ready_return_200() {
        for uri in ["/health", "/ready", "/status"] {
            let resp = test_app()
                .oneshot(authed(Request::builder().uri(uri)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{} should be 200", uri);
        }
    }

    #[tokio::test]
    async fn ingest_from_unknown_poller_is_rejected() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/ingest/updates")
                        .header("content-type", "application/json")
                        .header(POLLER_ID_HEADER, "ghost-poller"),
                )
                .body(Body::from("[]"))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn canonical_lookup_without_keys_is_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/devices/canonical")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(r#"{"identity_keys": []}"#))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn onboarding_flow_gates_ingress() {
        let app = test_app();

        // Create a poller package.
        let create = json!({
            "label": "Edge Poller",
            "component_type": "poller",
            "security_mode": "spire",
        });
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/onboarding/packages")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(create.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        let package_id = created["package"]["package_id"].as_str().unwrap().to_string();
        let download_token = created["download_token"].as_str().unwrap().to_string();
        assert!(created["join_token"].is_string());

        // The new poller is admitted on ingest.
        let update = json!([{
            "device_id": "default:10.0.0.1",
            "partition": "default",
            "ip": "10.0.0.1",
            "source": "sweep",
            "timestamp": chrono::Utc::now(),
            "is_available": true,
            "hostname": null,
            "mac": null,
        }]);
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/ingest/updates")
                        .header("content-type", "application/json")
                        .header(POLLER_ID_HEADER, "edge-poller"),
                )
                .body(Body::from(update.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Canonical lookup now finds the swept device.
        let lookup = json!({"identity_keys": [{"kind": "ip", "value": "10.0.0.1"}]});
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/devices/canonical")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(lookup.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let found = body_json(resp).await;
        assert_eq!(found["found"], true);
        assert_eq!(found["record"]["canonical_device_id"], "default:10.0.0.1");

        // Wrong download token → 403; right token → delivered; replay → 409.
        let deliver_uri = format!("/onboarding/packages/{}/deliver", package_id);
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri(&deliver_uri)
                        .header("content-type", "application/json"),
                )
                .body(Body::from(r#"{"download_token": "nope"}"#))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let good = json!({ "download_token": download_token });
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri(&deliver_uri)
                        .header("content-type", "application/json"),
                )
                .body(Body::from(good.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri(&deliver_uri)
                        .header("content-type", "application/json"),
                )
                .body(Body::from(good.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // Revoke → the poller loses ingress.
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri(format!("/onboarding/packages/{}/revoke", package_id))
                        .header("content-type", "application/json"),
                )
                .body(Body::from("{}"))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/ingest/updates")
                        .header("content-type", "application/json")
                        .header(POLLER_ID_HEADER, "edge-poller"),
                )
                .body(Body::from("[]"))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn telemetry_lands_in_buffers() {
        let state = test_state();
        state.onboarding.allowed().insert("edge-1").await;
        let app = build_app(state.clone());

        let body = json!({
            "metrics": [{
                "metric_name": "icmp_rtt_ms",
                "value": 1.5,
                "timestamp": chrono::Utc::now(),
                "device_id": "default:10.0.0.1",
                "partition": "default",
            }],
            "sysmon": [{
                "partition": "default",
                "metrics": { "cpus": [{"core_id": 0, "usage_percent": 12.0}] },
            }],
        });
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/ingest/telemetry")
                        .header("content-type", "application/json")
                        .header(POLLER_ID_HEADER, "edge-1"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let counts = state.buffers.counts().await;
        assert_eq!(counts.metrics, 1);
        assert_eq!(counts.sysmon, 1);
    }

    #[tokio::test]
    async fn backfill_dry_run_reports_without_mutating() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/backfill/dry-run")
                        .header("content-type", "application/json"),
                )
                .body(Body::from("{}"))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = body_json(resp).await;
        assert_eq!(report["dry_run"], true);
        assert_eq!(report["tombstones_emitted"], 0);
    }

    #[tokio::test]
    async fn list_packages_filters_parse_errors_to_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/onboarding/packages?component_type=gateway"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
