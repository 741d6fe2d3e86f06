use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use radar_config::OnboardingConfig;
use radar_domain::{
    sanitize_slug, ComponentType, DeviceId, DeviceSource, DeviceUpdate, OnboardingEvent,
    OnboardingEventType, OnboardingPackage, PackageStatus, SecurityMode,
};
use radar_store::{DeviceStore, KvStore, OnboardingStore, PackageFilter};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::allowed::{spawn_allowed_refresh, AllowedPollers};
use crate::cache::{ActivationCache, CacheLookup, CacheStats};
use crate::crypto::{generate_download_token, hash_download_token, verify_download_token, BundleCipher};
use crate::error::OnboardingError;
use crate::kv_project::{template_vars, KvProjector};
use crate::mtls::MtlsMinter;
use crate::spire::{DownstreamEntryRequest, TrustDomainClient};

const ID_SUFFIX_ATTEMPTS: usize = 8;
const ID_SUFFIX_LEN: usize = 4;

// ── Request/response shapes ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreatePackageRequest {
    pub label: String,
    pub component_type: ComponentType,
    pub security_mode: SecurityMode,
    pub parent_type: Option<ComponentType>,
    pub parent_id: Option<String>,
    pub poller_id: Option<String>,
    pub site: Option<String>,
    pub selectors: Vec<String>,
    pub checker_kind: Option<String>,
    pub metadata: HashMap<String, String>,
    pub notes: Option<String>,
    pub created_by: String,
}

/// A freshly-issued package with its one-time secrets in the clear. This
/// is the only moment they exist outside ciphertext.
#[derive(Debug, Clone)]
pub struct CreatedPackage {
    pub package: OnboardingPackage,
    pub join_token: Option<String>,
    pub download_token: String,
    pub bundle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveredPackage {
    pub package: OnboardingPackage,
    pub join_token: Option<String>,
    pub bundle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub component_type: ComponentType,
    pub component_id: String,
    pub poller_id: Option<String>,
    pub source_ip: Option<String>,
    pub spiffe_id: Option<String>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Default)]
struct RunState {
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

// ── Service ───────────────────────────────────────────────────────────────────

/// The edge onboarding control plane: package lifecycle, credential
/// minting, KV projection, and the allowed-pollers ingress gate.
pub struct OnboardingService {
    store: Arc<dyn OnboardingStore>,
    devices: Arc<dyn DeviceStore>,
    trust: Arc<dyn TrustDomainClient>,
    cipher: BundleCipher,
    minter: MtlsMinter,
    projector: KvProjector,
    allowed: Arc<AllowedPollers>,
    cache: ActivationCache,
    cfg: OnboardingConfig,
    run: Mutex<RunState>,
}

impl OnboardingService {
    pub fn new(
        store: Arc<dyn OnboardingStore>,
        devices: Arc<dyn DeviceStore>,
        kv: Arc<dyn KvStore>,
        trust: Arc<dyn TrustDomainClient>,
        cfg: OnboardingConfig,
    ) -> Result<Self, OnboardingError> {
        Ok(OnboardingService {
            store,
            devices,
            trust,
            cipher: BundleCipher::new(&cfg.encryption_key)?,
            minter: MtlsMinter::new(cfg.mtls.clone()),
            projector: KvProjector::new(kv),
            allowed: Arc::new(AllowedPollers::new()),
            cache: ActivationCache::new(cfg.activation_cache_ttl),
            cfg,
            run: Mutex::new(RunState::default()),
        })
    }

    pub fn allowed(&self) -> Arc<AllowedPollers> {
        self.allowed.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start background loops (allowed-pollers refresh). Idempotent.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if run.running {
            return;
        }
        let (tx, rx) = watch::channel(false);
        run.tasks.push(spawn_allowed_refresh(
            self.allowed.clone(),
            self.store.clone(),
            self.cfg.allowed_refresh_interval,
            self.cfg.allowed_refresh_timeout,
            rx,
        ));
        run.shutdown = Some(tx);
        run.running = true;
        info!("onboarding service started");
    }

    /// Cancel → wait → drop. Idempotent.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if !run.running {
            return;
        }
        if let Some(tx) = run.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in run.tasks.drain(..) {
            let _ = task.await;
        }
        run.running = false;
        info!("onboarding service stopped");
    }

    // ── Create ────────────────────────────────────────────────────────────────

    pub async fn create_package(
        &self,
        req: CreatePackageRequest,
    ) -> Result<CreatedPackage, OnboardingError> {
        let now = Utc::now();
        let component_id = self.resolve_component_id(&req).await?;
        let poller_id = self.resolve_poller_id(&req, &component_id).await?;

        if req.component_type == ComponentType::Checker && req.checker_kind.is_none() {
            return Err(OnboardingError::InvalidRequest(
                "checker packages require a checker_kind".to_string(),
            ));
        }

        let download_token = generate_download_token();
        let mut pkg = OnboardingPackage {
            package_id: Uuid::new_v4(),
            label: req.label.clone(),
            component_id: component_id.clone(),
            component_type: req.component_type,
            parent_type: req.parent_type.or(match req.component_type {
                ComponentType::Agent => Some(ComponentType::Poller),
                ComponentType::Checker => Some(ComponentType::Agent),
                ComponentType::Poller => None,
            }),
            parent_id: req.parent_id.clone(),
            poller_id: poller_id.clone(),
            site: req.site.clone(),
            security_mode: req.security_mode,
            status: PackageStatus::Issued,
            downstream_entry_id: None,
            downstream_spiffe_id: None,
            selectors: req.selectors.clone(),
            join_token_ciphertext: None,
            join_token_expires_at: None,
            bundle_ciphertext: None,
            download_token_hash: Some(hash_download_token(&download_token)),
            download_token_expires_at: Some(now + self.cfg.download_token_ttl),
            created_by: req.created_by.clone(),
            created_at: now,
            updated_at: now,
            delivered_at: None,
            activated_at: None,
            activated_from_ip: None,
            last_seen_spiffe_id: None,
            revoked_at: None,
            deleted_at: None,
            deleted_by: None,
            metadata: req.metadata.clone(),
            checker_kind: req.checker_kind.clone(),
            checker_config_json: None,
            notes: req.notes.clone(),
            kv_revision: None,
        };

        let (join_token, bundle) = match req.security_mode {
            SecurityMode::Spire => {
                let token = self.trust.mint_join_token(self.cfg.join_token_ttl).await?;
                let spiffe_id = format!(
                    "spiffe://{}/{}/{}",
                    self.cfg.trust_domain, req.component_type, component_id
                );
                let entry_id = self
                    .trust
                    .create_downstream_entry(&DownstreamEntryRequest {
                        parent_id: self.cfg.join_token_parent.clone(),
                        spiffe_id: spiffe_id.clone(),
                        selectors: req.selectors.clone(),
                        x509_ttl: self.cfg.join_token_ttl,
                        jwt_ttl: self.cfg.join_token_ttl,
                    })
                    .await?;
                pkg.downstream_entry_id = Some(entry_id);
                pkg.downstream_spiffe_id = Some(spiffe_id);

                // Any failure from here until the package persists must
                // delete the downstream entry we just created.
                match self.seal_spire_material(&mut pkg, &token, now).await {
                    Ok(bundle) => (Some(token), Some(bundle)),
                    Err(e) => {
                        self.cleanup_downstream(&pkg).await;
                        return Err(e);
                    }
                }
            }
            SecurityMode::Mtls => {
                let bundle = self.minter.mint(&component_id, now)?;
                let bundle_json = serde_json::to_string(&bundle)
                    .map_err(|e| OnboardingError::InvalidRequest(e.to_string()))?;
                pkg.bundle_ciphertext = Some(self.cipher.encrypt(bundle_json.as_bytes())?);
                (None, Some(bundle_json))
            }
        };

        if let Err(e) = self.store.upsert_package(&pkg).await {
            self.cleanup_downstream(&pkg).await;
            return Err(e.into());
        }

        self.append_event(&pkg, OnboardingEventType::Issued, &req.created_by, None, None)
            .await;

        if let Some(poller) = &pkg.poller_id {
            self.allowed.insert(poller).await;
        }

        // Projection failures don't unwind the package; the next create or
        // an operator re-issue converges the document.
        let vars = template_vars(
            &pkg,
            &self.cfg.mtls.cert_dir.display().to_string(),
            &self.cfg.mtls.server_name,
        );
        match self.projector.project(&pkg, &vars).await {
            Ok(Some(revision)) => {
                pkg.kv_revision = Some(revision);
                if let Err(e) = self.store.upsert_package(&pkg).await {
                    warn!(package = %pkg.package_id, error = %e, "failed to record kv revision");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(package = %pkg.package_id, error = %e, "kv projection failed"),
        }

        info!(
            package = %pkg.package_id,
            component = %pkg.component_id,
            mode = %pkg.security_mode,
            "issued onboarding package"
        );
        Ok(CreatedPackage { package: pkg, join_token, download_token, bundle })
    }

    async fn seal_spire_material(
        &self,
        pkg: &mut OnboardingPackage,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<String, OnboardingError> {
        let bundle = self.trust.fetch_trust_bundle().await?;
        let bundle_str = String::from_utf8_lossy(&bundle).into_owned();
        pkg.join_token_ciphertext = Some(self.cipher.encrypt(token.as_bytes())?);
        pkg.join_token_expires_at = Some(now + self.cfg.join_token_ttl);
        pkg.bundle_ciphertext = Some(self.cipher.encrypt(bundle_str.as_bytes())?);
        Ok(bundle_str)
    }

    async fn cleanup_downstream(&self, pkg: &OnboardingPackage) {
        if let Some(entry_id) = &pkg.downstream_entry_id {
            if let Err(e) = self.trust.delete_downstream_entry(entry_id).await {
                warn!(entry = %entry_id, error = %e, "failed to delete dangling downstream entry");
            }
        }
    }

    async fn resolve_component_id(
        &self,
        req: &CreatePackageRequest,
    ) -> Result<String, OnboardingError> {
        let prefix = match req.component_type {
            ComponentType::Poller => self.cfg.poller_prefix.as_deref(),
            _ => None,
        };
        let base = sanitize_slug(&req.label, prefix)?;
        if !self
            .store
            .component_id_in_use(req.component_type, &base)
            .await?
        {
            return Ok(base);
        }

        for _ in 0..ID_SUFFIX_ATTEMPTS {
            let mut stem = base.clone();
            stem.truncate(63 - ID_SUFFIX_LEN - 1);
            let candidate = format!("{}-{}", stem.trim_end_matches('-'), random_suffix());
            if !self
                .store
                .component_id_in_use(req.component_type, &candidate)
                .await?
            {
                return Ok(candidate);
            }
        }
        Err(OnboardingError::Conflict(format!(
            "component id '{}' and {} suffixed variants are taken",
            base, ID_SUFFIX_ATTEMPTS
        )))
    }

    async fn resolve_poller_id(
        &self,
        req: &CreatePackageRequest,
        component_id: &str,
    ) -> Result<Option<String>, OnboardingError> {
        match req.component_type {
            ComponentType::Poller => Ok(Some(component_id.to_string())),
            ComponentType::Agent => req
                .poller_id
                .clone()
                .filter(|s| !s.is_empty())
                .map(Some)
                .ok_or_else(|| {
                    OnboardingError::InvalidRequest(
                        "agent packages require a poller_id".to_string(),
                    )
                }),
            ComponentType::Checker => {
                let parent_id = req
                    .parent_id
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        OnboardingError::InvalidRequest(
                            "checker packages require a parent_id".to_string(),
                        )
                    })?;
                if let Some(poller) = req.poller_id.clone().filter(|s| !s.is_empty()) {
                    return Ok(Some(poller));
                }
                let parent = self
                    .store
                    .find_package(ComponentType::Agent, parent_id)
                    .await?
                    .ok_or_else(|| {
                        OnboardingError::NotFound(format!("agent parent '{}'", parent_id))
                    })?;
                parent.poller_id.map(Some).ok_or_else(|| {
                    OnboardingError::InvalidRequest(format!(
                        "agent parent '{}' has no poller binding",
                        parent_id
                    ))
                })
            }
        }
    }

    // ── Deliver ───────────────────────────────────────────────────────────────

    /// One-shot bundle retrieval. Consumes the download token: the stored
    /// hash is cleared, so a replay fails even with the right token.
    pub async fn deliver_package(
        &self,
        package_id: Uuid,
        download_token: &str,
    ) -> Result<DeliveredPackage, OnboardingError> {
        let now = Utc::now();
        let mut pkg = self
            .store
            .get_package(package_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound(package_id.to_string()))?;

        match pkg.status {
            PackageStatus::Issued => {}
            PackageStatus::Delivered | PackageStatus::Activated => {
                return Err(OnboardingError::PackageDelivered)
            }
            status => {
                return Err(OnboardingError::InvalidRequest(format!(
                    "package is {}",
                    status
                )))
            }
        }

        let Some(stored_hash) = pkg.download_token_hash.clone() else {
            return Err(OnboardingError::PackageDelivered);
        };
        if let Some(expires) = pkg.download_token_expires_at {
            if now > expires {
                return Err(OnboardingError::DownloadInvalid);
            }
        }
        if !verify_download_token(download_token, &stored_hash) {
            return Err(OnboardingError::DownloadInvalid);
        }

        let join_token = pkg
            .join_token_ciphertext
            .as_deref()
            .map(|c| self.cipher.decrypt(c))
            .transpose()?
            .map(|b| String::from_utf8_lossy(&b).into_owned());
        let bundle = pkg
            .bundle_ciphertext
            .as_deref()
            .map(|c| self.cipher.decrypt(c))
            .transpose()?
            .map(|b| String::from_utf8_lossy(&b).into_owned());

        pkg.download_token_hash = None;
        pkg.download_token_expires_at = None;
        pkg.status = PackageStatus::Delivered;
        pkg.delivered_at = Some(now);
        pkg.touch(now);
        self.store.upsert_package(&pkg).await?;
        self.append_event(&pkg, OnboardingEventType::Delivered, "download", None, None)
            .await;

        Ok(DeliveredPackage { package: pkg, join_token, bundle })
    }

    // ── Activation ────────────────────────────────────────────────────────────

    /// First-seen-by-identity. Idempotent: at most one status transition;
    /// later calls refresh source ip / spiffe id / poller binding only
    /// when they changed. Terminal packages are invisible: no state
    /// change, no event.
    pub async fn record_activation(
        &self,
        req: ActivationRequest,
    ) -> Result<Option<OnboardingPackage>, OnboardingError> {
        let mut pkg = match self.cache.get(req.component_type, &req.component_id).await {
            CacheLookup::NegativeHit => return Ok(None),
            CacheLookup::Hit(pkg) => *pkg,
            CacheLookup::Miss => {
                match self
                    .store
                    .find_package(req.component_type, &req.component_id)
                    .await?
                {
                    Some(pkg) => pkg,
                    None => {
                        self.cache
                            .store_negative(req.component_type, &req.component_id)
                            .await;
                        return Ok(None);
                    }
                }
            }
        };

        if pkg.status.is_terminal() || pkg.revoked_at.is_some() {
            self.cache
                .store_negative(req.component_type, &req.component_id)
                .await;
            return Ok(None);
        }

        let mut changed = false;
        let transitioned = matches!(pkg.status, PackageStatus::Issued | PackageStatus::Delivered);
        if transitioned {
            pkg.status = PackageStatus::Activated;
            pkg.activated_at = Some(req.seen_at);
            changed = true;
        }

        if let Some(ip) = &req.source_ip {
            if pkg.activated_from_ip.as_deref() != Some(ip.as_str()) {
                pkg.activated_from_ip = Some(ip.clone());
                changed = true;
            }
        }
        if let Some(spiffe) = &req.spiffe_id {
            if pkg.last_seen_spiffe_id.as_deref() != Some(spiffe.as_str()) {
                pkg.last_seen_spiffe_id = Some(spiffe.clone());
                changed = true;
            }
        }
        if let Some(poller) = &req.poller_id {
            if pkg.poller_id.as_deref() != Some(poller.as_str()) {
                pkg.poller_id = Some(poller.clone());
                changed = true;
            }
        }

        if changed {
            pkg.touch(Utc::now());
            self.store.upsert_package(&pkg).await?;
        }
        if transitioned {
            self.append_event(
                &pkg,
                OnboardingEventType::Activated,
                "edge",
                req.source_ip.as_deref(),
                req.spiffe_id
                    .as_deref()
                    .map(|s| serde_json::json!({ "spiffe_id": s })),
            )
            .await;
        }
        self.cache.store(&pkg).await;
        Ok(Some(pkg))
    }

    // ── Revoke / delete ───────────────────────────────────────────────────────

    pub async fn revoke_package(
        &self,
        package_id: Uuid,
        actor: &str,
    ) -> Result<OnboardingPackage, OnboardingError> {
        let now = Utc::now();
        let mut pkg = self
            .store
            .get_package(package_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound(package_id.to_string()))?;

        if !matches!(
            pkg.status,
            PackageStatus::Issued | PackageStatus::Delivered | PackageStatus::Activated
        ) {
            return Err(OnboardingError::InvalidRequest(format!(
                "cannot revoke a {} package",
                pkg.status
            )));
        }

        // SPIRE mode: the downstream entry must go before the package is
        // marked revoked, or a half-revoked component keeps its identity.
        if pkg.security_mode == SecurityMode::Spire {
            if let Some(entry_id) = pkg.downstream_entry_id.clone() {
                self.trust.delete_downstream_entry(&entry_id).await?;
            }
        }

        pkg.downstream_entry_id = None;
        pkg.join_token_ciphertext = None;
        pkg.join_token_expires_at = None;
        pkg.bundle_ciphertext = None;
        pkg.download_token_hash = None;
        pkg.download_token_expires_at = None;
        pkg.status = PackageStatus::Revoked;
        pkg.revoked_at = Some(now);
        pkg.touch(now);
        self.store.upsert_package(&pkg).await?;
        self.append_event(&pkg, OnboardingEventType::Revoked, actor, None, None)
            .await;

        if let Some(poller) = &pkg.poller_id {
            self.allowed.remove(poller).await;
        }
        self.cache
            .store_negative(pkg.component_type, &pkg.component_id)
            .await;
        if let Some(poller) = &pkg.poller_id {
            self.cache
                .store_negative(ComponentType::Poller, poller)
                .await;
        }

        // Best-effort: tombstone the component's self-reported device so
        // the inventory stops showing a revoked edge as live.
        let partition = pkg.site.clone().unwrap_or_else(|| "default".to_string());
        let tombstone = DeviceUpdate {
            device_id: Some(DeviceId::new(format!("{}:{}", partition, pkg.component_id))),
            partition,
            ip: String::new(),
            source: DeviceSource::SelfReported,
            timestamp: now,
            is_available: false,
            metadata: [(radar_domain::update::DELETED.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
            hostname: None,
            mac: None,
        };
        if let Err(e) = self.devices.publish_device_updates(&[tombstone]).await {
            warn!(package = %pkg.package_id, error = %e, "failed to tombstone revoked component device");
        }

        info!(package = %pkg.package_id, component = %pkg.component_id, "revoked onboarding package");
        Ok(pkg)
    }

    pub async fn delete_package(
        &self,
        package_id: Uuid,
        actor: &str,
    ) -> Result<OnboardingPackage, OnboardingError> {
        let now = Utc::now();
        let mut pkg = self
            .store
            .get_package(package_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound(package_id.to_string()))?;

        if !pkg.is_deletable() {
            return Err(OnboardingError::NotDeletable(format!(
                "package is {}; revoke or expire it first",
                pkg.status
            )));
        }

        self.store.delete_package(package_id).await?;
        pkg.status = PackageStatus::Deleted;
        pkg.deleted_at = Some(now);
        pkg.deleted_by = Some(actor.to_string());
        pkg.touch(now);
        self.append_event(&pkg, OnboardingEventType::Deleted, actor, None, None)
            .await;

        self.cache
            .store_negative(pkg.component_type, &pkg.component_id)
            .await;
        if let Some(poller) = &pkg.poller_id {
            self.cache
                .store_negative(ComponentType::Poller, poller)
                .await;
            self.allowed.remove(poller).await;
        }

        info!(package = %pkg.package_id, component = %pkg.component_id, "deleted onboarding package");
        Ok(pkg)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn get_package(&self, package_id: Uuid) -> Result<OnboardingPackage, OnboardingError> {
        self.store
            .get_package(package_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound(package_id.to_string()))
    }

    pub async fn list_packages(
        &self,
        filter: &PackageFilter,
    ) -> Result<Vec<OnboardingPackage>, OnboardingError> {
        Ok(self.store.list_packages(filter).await?)
    }

    pub async fn list_events(
        &self,
        package_id: Uuid,
        limit: u32,
    ) -> Result<Vec<OnboardingEvent>, OnboardingError> {
        Ok(self.store.list_events(package_id, limit).await?)
    }

    pub async fn list_component_templates(
        &self,
        component_type: ComponentType,
        mode: Option<SecurityMode>,
    ) -> Result<Vec<String>, OnboardingError> {
        self.projector.list_templates(component_type, mode).await
    }

    async fn append_event(
        &self,
        pkg: &OnboardingPackage,
        event_type: OnboardingEventType,
        actor: &str,
        source_ip: Option<&str>,
        details: Option<serde_json::Value>,
    ) {
        let event = OnboardingEvent {
            package_id: pkg.package_id,
            event_time: pkg.updated_at,
            event_type,
            actor: actor.to_string(),
            source_ip: source_ip.map(str::to_string),
            details,
        };
        // The audit trail is best-effort; a failed append never unwinds
        // the transition it records.
        if let Err(e) = self.store.append_event(&event).await {
            warn!(package = %pkg.package_id, event = %event_type, error = %e, "failed to append onboarding event");
        }
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_SUFFIX_LEN)
        .map(|_| {
            let n = rng.gen_range(0..36u32);
            char::from_digit(n, 36).unwrap_or('0')
        })
        .collect()
}
