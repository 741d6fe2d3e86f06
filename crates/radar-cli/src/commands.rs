use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use radar_api::AppState;
use radar_config::CoreConfig;
use radar_events::EventPublisher;
use radar_identity::{spawn_reaper, CanonicalResolver};
use radar_ingest::{spawn_flush_loop, IngestBuffers};
use radar_onboarding::{LocalTrustDomain, OnboardingService};
use radar_store::{InMemoryKv, InMemoryStore};
use uuid::Uuid;

use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(
    config: Option<PathBuf>,
    port: u16,
    bind: String,
    no_bus: bool,
    rotate_token: bool,
) -> Result<()> {
    let cfg = match &config {
        Some(path) => radar_config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            println!("No config file given; using built-in defaults");
            CoreConfig::default()
        }
    };

    // Reuse the existing token unless rotation is explicitly requested,
    // so server restarts don't invalidate client configurations.
    let token_path = default_token_path();
    let token = if !rotate_token {
        match std::fs::read_to_string(&token_path).map(|s| s.trim().to_string()) {
            Ok(existing) if !existing.is_empty() => {
                println!("Reusing existing token from {}", token_path.display());
                existing
            }
            _ => {
                let t = generate_token();
                write_token(&token_path, &t)?;
                println!("Generated new token (written to {})", token_path.display());
                t
            }
        }
    } else {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Rotated token (written to {})", token_path.display());
        println!("New token: {}", t);
        t
    };

    println!("Using in-memory store; point the store traits at the streaming engine for production");
    let store = Arc::new(InMemoryStore::with_sighting_ttl(cfg.reaper.sighting_ttl));
    let kv = Arc::new(InMemoryKv::new());
    let trust = Arc::new(LocalTrustDomain::new());

    let onboarding = Arc::new(
        OnboardingService::new(
            store.clone(),
            store.clone(),
            kv.clone(),
            trust,
            cfg.onboarding.clone(),
        )
        .map_err(|e| anyhow::anyhow!("onboarding service init: {}", e))?,
    );
    onboarding.start().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let publisher = if no_bus {
        println!("Event bus disabled (--no-bus); lifecycle events are dropped");
        None
    } else {
        match EventPublisher::connect(cfg.bus.clone(), shutdown_rx.clone()).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Event bus unavailable ({}); continuing without it", e);
                None
            }
        }
    };

    let buffers = Arc::new(IngestBuffers::new());
    let flush_task = spawn_flush_loop(
        buffers.clone(),
        store.clone(),
        cfg.ingest.flush_interval,
        shutdown_rx.clone(),
    );
    let reaper_task = spawn_reaper(
        cfg.reaper.interval,
        cfg.reaper.stale_device_ttl,
        store.clone(),
        shutdown_rx.clone(),
    );

    let state = AppState {
        devices: store.clone(),
        telemetry: store.clone(),
        kv,
        resolver: Arc::new(CanonicalResolver::new(store)),
        onboarding: onboarding.clone(),
        buffers,
        publisher,
        auth_token: Arc::new(token),
        kv_namespace: cfg.kv_namespace.clone(),
        sync_chunk: cfg.ingest.sync_chunk,
    };
    let app = radar_api::build_app(state);

    let addr = format!("{bind}:{port}");
    println!("Starting radar-core API server on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("Shutting down…");
        })
        .await
        .context("Server error")?;

    // Cancel → wait → close side channels.
    let _ = shutdown_tx.send(true);
    let _ = flush_task.await;
    let _ = reaper_task.await;
    onboarding.stop().await;

    Ok(())
}

// ── Backfill ──────────────────────────────────────────────────────────────────

pub async fn backfill(
    dry_run: bool,
    seed_kv_only: bool,
    chunk_size: Option<usize>,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let url = server_url(remote);
    let token = resolve_token(token)?;
    let path = if dry_run { "/backfill/dry-run" } else { "/backfill" };

    let body = serde_json::json!({
        "seed_kv_only": seed_kv_only,
        "chunk_size": chunk_size,
    });
    let resp = authed_client(&token)
        .post(format!("{}{}", url, path))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let status = resp.status();
    let report: serde_json::Value = resp.json().await.context("Invalid backfill response")?;
    if !status.is_success() {
        anyhow::bail!("backfill failed ({}): {}", status, report);
    }
    print!("{}", output::render_backfill_report(&report));
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(remote: Option<String>, token: Option<String>) -> Result<()> {
    let url = server_url(remote);
    let token = resolve_token(token)?;
    let resp = authed_client(&token)
        .get(format!("{}/status", url))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let status: serde_json::Value = resp.json().await.context("Invalid status response")?;
    print!("{}", output::render_status(&status));
    Ok(())
}

// ── Packages ──────────────────────────────────────────────────────────────────

pub async fn packages(
    component_type: Option<String>,
    status: Option<String>,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let url = server_url(remote);
    let token = resolve_token(token)?;

    let mut req = authed_client(&token).get(format!("{}/onboarding/packages", url));
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(t) = component_type {
        query.push(("component_type", t));
    }
    if let Some(s) = status {
        query.push(("status", s));
    }
    if !query.is_empty() {
        req = req.query(&query);
    }

    let resp = req
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let packages: serde_json::Value = resp.json().await.context("Invalid packages response")?;
    print!("{}", output::render_packages(&packages));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{}{}", a, b)
}

/// Resolve the token to use for API calls.
///
/// Priority: explicit value (from --token / RADAR_TOKEN) → ~/.radar/token file
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .with_context(|| {
            format!(
                "No token provided and could not read token file at {}. \
                 Use --token, RADAR_TOKEN, or run `radar-core serve` first.",
                path.display()
            )
        })
}

/// Write the token to the token file with owner-only permissions.
fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token)
        .with_context(|| format!("Failed to write token to {}", path.display()))?;

    // Set owner-only read/write permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".radar").join("token")
}

fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {}", token);
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer)
            .expect("token contains invalid header characters"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}

fn server_url(remote: Option<String>) -> String {
    remote.unwrap_or_else(|| "http://localhost:8090".into())
}
