use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use radar_domain::{
    ComponentType, DeviceUpdate, IdentityKey, PackageStatus, SecurityMode,
};
use radar_identity::{build_alias_events, IdentityKvMirror};
use radar_ingest::{
    process_snmp_discovery_results, process_sync_results, ServiceContext, StoreRegistry,
};
use radar_onboarding::{ActivationRequest, CreatePackageRequest};
use radar_reconciler::{backfill, BackfillRequest};
use radar_store::PackageFilter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::auth::require_allowed_poller;
use crate::error::ApiError;
use crate::state::AppState;

const LIFECYCLE_SUBJECT: &str = "events.devices.lifecycle";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.devices.get_devices_by_ip("127.0.0.1").await?;
    Ok(StatusCode::OK)
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let buffers = state.buffers.counts().await;
    Ok(Json(json!({
        "allowed_pollers": state.onboarding.allowed().len().await,
        "buffers": buffers,
        "activation_cache": state.onboarding.cache_stats(),
    })))
}

// ── Ingest ────────────────────────────────────────────────────────────────────

async fn ingest_updates_inner(
    state: &AppState,
    headers: &HeaderMap,
    updates: Vec<DeviceUpdate>,
) -> Result<Json<Value>, ApiError> {
    let poller = require_allowed_poller(state, headers).await?;

    // Diff against current canonical metadata before the updates land.
    let events = build_alias_events(state.devices.as_ref(), &updates).await?;
    state.devices.publish_device_updates(&updates).await?;

    if let Some(publisher) = &state.publisher {
        for event in &events {
            let payload = serde_json::to_value(event).map_err(|e| ApiError::internal(e.to_string()))?;
            if let Err(e) = publisher.publish_event(LIFECYCLE_SUBJECT, &payload).await {
                warn!(device_id = %event.device_id, error = %e, "lifecycle event publish failed");
            }
        }
    }

    Ok(Json(json!({
        "poller_id": poller,
        "accepted": updates.len(),
        "lifecycle_events": events.len(),
    })))
}

pub async fn ingest_updates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(updates): Json<Vec<DeviceUpdate>>,
) -> Result<Json<Value>, ApiError> {
    ingest_updates_inner(&state, &headers, updates).await
}

/// Sweep results are device updates from the sweep pipeline; they share
/// the update ingest path.
pub async fn ingest_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(updates): Json<Vec<DeviceUpdate>>,
) -> Result<Json<Value>, ApiError> {
    ingest_updates_inner(&state, &headers, updates).await
}

pub async fn ingest_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let poller = require_allowed_poller(&state, &headers).await?;
    let registry = StoreRegistry::new(state.devices.clone());
    let stats = process_sync_results(Some(&registry), &body, state.sync_chunk).await?;
    Ok(Json(json!({
        "poller_id": poller,
        "total": stats.total,
        "batches": stats.batches,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryBody {
    #[serde(default)]
    pub metrics: Vec<radar_store::TimeseriesMetric>,
    #[serde(default)]
    pub statuses: Vec<radar_store::ServiceStatus>,
    #[serde(default)]
    pub services: Vec<radar_store::ServiceRecord>,
    #[serde(default)]
    pub sysmon: Vec<radar_store::SysmonBatch>,
}

/// Telemetry lands in the per-poller buffers; the flush loop writes it
/// to storage on its own cadence.
pub async fn ingest_telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TelemetryBody>,
) -> Result<Json<Value>, ApiError> {
    let poller = require_allowed_poller(&state, &headers).await?;
    let accepted = body.metrics.len() + body.statuses.len() + body.services.len() + body.sysmon.len();
    state.buffers.add_metrics(&poller, body.metrics).await;
    state.buffers.add_service_statuses(&poller, body.statuses).await;
    state.buffers.add_services(&poller, body.services).await;
    state.buffers.add_sysmon(&poller, body.sysmon).await;
    Ok(Json(json!({
        "poller_id": poller,
        "buffered": accepted,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SnmpQuery {
    pub agent_id: Option<String>,
    pub partition: Option<String>,
}

pub async fn ingest_snmp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SnmpQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let poller = require_allowed_poller(&state, &headers).await?;
    let ctx = ServiceContext {
        agent_id: query.agent_id.unwrap_or_default(),
        poller_id: poller.to_string(),
        partition: query.partition.unwrap_or_else(|| "default".to_string()),
    };
    let registry = StoreRegistry::new(state.devices.clone());
    let stats = process_snmp_discovery_results(
        Some(&registry),
        state.resolver.as_ref(),
        state.devices.as_ref(),
        state.telemetry.as_ref(),
        &body,
        &ctx,
    )
    .await?;
    Ok(Json(json!({
        "devices": stats.devices,
        "interfaces": stats.interfaces,
        "correlated": stats.correlated,
        "topology_events": stats.topology_events,
    })))
}

// ── Canonical lookup ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CanonicalLookupBody {
    #[serde(default)]
    pub identity_keys: Vec<IdentityKey>,
    pub ip_hint: Option<String>,
}

pub async fn get_canonical_device(
    State(state): State<AppState>,
    Json(body): Json<CanonicalLookupBody>,
) -> Result<Json<Value>, ApiError> {
    let resolved = state
        .resolver
        .resolve(&body.identity_keys, body.ip_hint.as_deref())
        .await?;
    Ok(match resolved {
        Some((record, matched_key)) => Json(json!({
            "found": true,
            "record": record,
            "matched_key": matched_key,
            "hydrated": true,
        })),
        None => Json(json!({ "found": false })),
    })
}

// ── Onboarding admin ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreatePackageBody {
    pub label: String,
    pub component_type: ComponentType,
    pub security_mode: SecurityMode,
    pub parent_type: Option<ComponentType>,
    pub parent_id: Option<String>,
    pub poller_id: Option<String>,
    pub site: Option<String>,
    #[serde(default)]
    pub selectors: Vec<String>,
    pub checker_kind: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

pub async fn create_package(
    State(state): State<AppState>,
    Json(body): Json<CreatePackageBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let created = state
        .onboarding
        .create_package(CreatePackageRequest {
            label: body.label,
            component_type: body.component_type,
            security_mode: body.security_mode,
            parent_type: body.parent_type,
            parent_id: body.parent_id,
            poller_id: body.poller_id,
            site: body.site,
            selectors: body.selectors,
            checker_kind: body.checker_kind,
            metadata: body.metadata,
            notes: body.notes,
            created_by: body.created_by.unwrap_or_else(|| "api".to_string()),
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "package": created.package,
            "join_token": created.join_token,
            "download_token": created.download_token,
            "bundle": created.bundle,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DeliverBody {
    pub download_token: String,
}

pub async fn deliver_package(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DeliverBody>,
) -> Result<Json<Value>, ApiError> {
    let delivered = state
        .onboarding
        .deliver_package(id, &body.download_token)
        .await?;
    Ok(Json(json!({
        "package": delivered.package,
        "join_token": delivered.join_token,
        "bundle": delivered.bundle,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: Option<String>,
}

pub async fn revoke_package(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, ApiError> {
    let actor = body.actor.unwrap_or_else(|| "api".to_string());
    let pkg = state.onboarding.revoke_package(id, &actor).await?;
    Ok(Json(json!(pkg)))
}

pub async fn delete_package(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pkg = state.onboarding.delete_package(id, "api").await?;
    Ok(Json(json!(pkg)))
}

#[derive(Debug, Deserialize)]
pub struct ListPackagesQuery {
    pub component_type: Option<String>,
    /// Comma-separated status list.
    pub status: Option<String>,
    pub poller_id: Option<String>,
}

pub async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<ListPackagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let component_type = query
        .component_type
        .as_deref()
        .map(str::parse::<ComponentType>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let statuses = query
        .status
        .as_deref()
        .map(|s| {
            s.split(',')
                .filter(|t| !t.is_empty())
                .map(str::parse::<PackageStatus>)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?
        .unwrap_or_default();

    let packages = state
        .onboarding
        .list_packages(&PackageFilter {
            component_type,
            statuses,
            poller_id: query.poller_id,
        })
        .await?;
    Ok(Json(json!(packages)))
}

pub async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pkg = state.onboarding.get_package(id).await?;
    Ok(Json(json!(pkg)))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

pub async fn list_package_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state
        .onboarding
        .list_events(id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!(events)))
}

#[derive(Debug, Deserialize)]
pub struct TemplatesQuery {
    pub component_type: String,
    pub mode: Option<String>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplatesQuery>,
) -> Result<Json<Value>, ApiError> {
    let component_type = query
        .component_type
        .parse::<ComponentType>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<SecurityMode>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let templates = state
        .onboarding
        .list_component_templates(component_type, mode)
        .await?;
    Ok(Json(json!(templates)))
}

#[derive(Debug, Deserialize)]
pub struct ActivationBody {
    pub component_type: ComponentType,
    pub component_id: String,
    pub poller_id: Option<String>,
    pub source_ip: Option<String>,
    pub spiffe_id: Option<String>,
    pub seen_at: Option<DateTime<Utc>>,
}

pub async fn record_activation(
    State(state): State<AppState>,
    Json(body): Json<ActivationBody>,
) -> Result<Json<Value>, ApiError> {
    let package = state
        .onboarding
        .record_activation(ActivationRequest {
            component_type: body.component_type,
            component_id: body.component_id,
            poller_id: body.poller_id,
            source_ip: body.source_ip,
            spiffe_id: body.spiffe_id,
            seen_at: body.seen_at.unwrap_or_else(Utc::now),
        })
        .await?;
    Ok(Json(json!({
        "activated": package.is_some(),
        "package": package,
    })))
}

// ── Backfill ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct BackfillBody {
    #[serde(default)]
    pub seed_kv_only: bool,
    pub chunk_size: Option<usize>,
    pub lookup_chunk: Option<usize>,
}

async fn run_backfill(
    state: &AppState,
    body: BackfillBody,
    dry_run: bool,
) -> Result<Json<Value>, ApiError> {
    let mirror = IdentityKvMirror::new(state.kv.clone(), state.kv_namespace.clone());
    let report = backfill(
        BackfillRequest {
            dry_run,
            seed_kv_only: body.seed_kv_only,
            chunk_size: body.chunk_size,
            lookup_chunk: body.lookup_chunk,
            shutdown: None,
        },
        state.devices.clone(),
        Some(&mirror),
    )
    .await?;
    Ok(Json(json!(report)))
}

pub async fn post_backfill(
    State(state): State<AppState>,
    body: Option<Json<BackfillBody>>,
) -> Result<Json<Value>, ApiError> {
    run_backfill(&state, body.map(|Json(b)| b).unwrap_or_default(), false).await
}

pub async fn post_backfill_dry_run(
    State(state): State<AppState>,
    body: Option<Json<BackfillBody>>,
) -> Result<Json<Value>, ApiError> {
    run_backfill(&state, body.map(|Json(b)| b).unwrap_or_default(), true).await
}
