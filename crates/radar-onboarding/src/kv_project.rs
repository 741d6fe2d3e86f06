//! KV projection of onboarding packages: per-component config documents
//! rendered from centrally-stored templates.

use std::collections::HashMap;
use std::sync::Arc;

use radar_domain::{ComponentType, OnboardingPackage, SecurityMode};
use radar_store::{KvError, KvStore};
use tracing::{debug, warn};

use crate::error::OnboardingError;

/// Metadata keys that may flow into template substitution. Everything else
/// is ignored, never rejected: operators stash free-form notes in metadata.
const METADATA_WHITELIST: &[&str] = &[
    "site",
    "region",
    "environment",
    "partition",
    "endpoint",
    "listen_addr",
    "port",
];

/// Substrings that disqualify a value from substitution entirely.
const FORBIDDEN_FRAGMENTS: &[&str] = &["{{", "${", "../", "..\\", "\n", "\r", "\0", "${jndi", "${env"];

/// KV key for a package's projected config document.
pub fn config_key(pkg: &OnboardingPackage) -> Option<String> {
    match pkg.component_type {
        ComponentType::Poller => Some(format!("config/pollers/{}.json", pkg.component_id)),
        ComponentType::Agent => {
            let poller = pkg.poller_id.as_deref()?;
            Some(format!(
                "config/pollers/{}/agents/{}.json",
                poller, pkg.component_id
            ))
        }
        ComponentType::Checker => {
            let agent = pkg.parent_id.as_deref()?;
            let kind = pkg.checker_kind.as_deref()?;
            Some(format!("agents/{}/checkers/{}.json", agent, kind))
        }
    }
}

fn template_key(component_type: ComponentType, mode: Option<SecurityMode>, kind: &str) -> String {
    match mode {
        Some(mode) => format!("templates/{}/{}/{}.json", component_type.template_dir(), mode, kind),
        None => format!("templates/{}/{}.json", component_type.template_dir(), kind),
    }
}

/// Whether a value is safe to substitute: ASCII-printable and free of
/// template/traversal/injection fragments.
pub fn is_safe_placeholder_value(value: &str) -> bool {
    if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return false;
    }
    !FORBIDDEN_FRAGMENTS.iter().any(|frag| value.contains(frag))
}

/// Replace `{{NAME}}` and `${NAME}` placeholders from `vars`. Unknown
/// placeholders are left in place for the next tier to notice.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        if !is_safe_placeholder_value(value) {
            warn!(placeholder = %name, "skipping unsafe template value");
            continue;
        }
        out = out.replace(&format!("{{{{{}}}}}", name), value);
        out = out.replace(&format!("${{{}}}", name), value);
    }
    out
}

/// Substitution variables for a package: derived fields plus whitelisted
/// metadata, all upper-cased.
pub fn template_vars(pkg: &OnboardingPackage, cert_dir: &str, server_name: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("COMPONENT_ID".to_string(), pkg.component_id.clone());
    vars.insert("CLIENT_CERT_NAME".to_string(), pkg.component_id.clone());
    vars.insert("CERT_DIR".to_string(), cert_dir.to_string());
    vars.insert("SERVER_NAME".to_string(), server_name.to_string());
    if let Some(spiffe) = &pkg.downstream_spiffe_id {
        vars.insert("DOWNSTREAM_SPIFFE_ID".to_string(), spiffe.clone());
    }
    if let Some(kind) = &pkg.checker_kind {
        vars.insert("CHECKER_KIND".to_string(), kind.clone());
    }
    let agent_id = match pkg.component_type {
        ComponentType::Agent => Some(pkg.component_id.as_str()),
        ComponentType::Checker => pkg.parent_id.as_deref(),
        ComponentType::Poller => None,
    };
    if let Some(agent) = agent_id {
        vars.insert("AGENT_ID".to_string(), agent.to_string());
    }
    for key in METADATA_WHITELIST {
        if let Some(value) = pkg.metadata.get(*key) {
            vars.insert(key.to_uppercase(), value.clone());
        }
    }
    vars
}

/// Writes config projections into the KV store.
pub struct KvProjector {
    kv: Arc<dyn KvStore>,
}

impl KvProjector {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        KvProjector { kv }
    }

    /// Project a freshly-issued package. Returns the revision of the
    /// document this package now corresponds to, or None when the backend
    /// doesn't support projection.
    pub async fn project(
        &self,
        pkg: &OnboardingPackage,
        vars: &HashMap<String, String>,
    ) -> Result<Option<u64>, OnboardingError> {
        let Some(key) = config_key(pkg) else {
            return Err(OnboardingError::InvalidRequest(format!(
                "package {} lacks the fields for a kv projection",
                pkg.package_id
            )));
        };

        match pkg.component_type {
            ComponentType::Poller | ComponentType::Agent => {
                let body = self
                    .rendered_config(pkg, vars)
                    .await?
                    .unwrap_or_else(|| default_document(pkg));
                match self.kv.put(&key, body.as_bytes()).await {
                    Ok(rev) => Ok(Some(rev)),
                    Err(KvError::Unimplemented) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            ComponentType::Checker => {
                // Existing checker configs are user-owned: witness, never
                // overwrite.
                match self.kv.get(&key).await {
                    Ok(Some(existing)) => {
                        debug!(key = %key, revision = existing.revision, "checker config exists; preserving");
                        return Ok(Some(existing.revision));
                    }
                    Ok(None) => {}
                    Err(KvError::Unimplemented) => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
                let body = self
                    .rendered_config(pkg, vars)
                    .await?
                    .unwrap_or_else(|| default_document(pkg));
                let revision = match self.kv.put_if_absent(&key, body.as_bytes()).await {
                    Ok(rev) => rev,
                    // Lost a create race; whoever won owns the document.
                    Err(KvError::AlreadyExists(_)) => {
                        self.kv.get(&key).await?.map(|e| e.revision).unwrap_or(0)
                    }
                    Err(KvError::Unimplemented) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                self.patch_poller_checks(pkg).await?;
                Ok(Some(revision))
            }
        }
    }

    async fn rendered_config(
        &self,
        pkg: &OnboardingPackage,
        vars: &HashMap<String, String>,
    ) -> Result<Option<String>, OnboardingError> {
        let kind = match pkg.component_type {
            ComponentType::Checker => pkg.checker_kind.as_deref().unwrap_or("config"),
            _ => "config",
        };
        // Mode-specific template wins over the generic one.
        for key in [
            template_key(pkg.component_type, Some(pkg.security_mode), kind),
            template_key(pkg.component_type, None, kind),
        ] {
            match self.kv.get(&key).await {
                Ok(Some(entry)) => {
                    let template = String::from_utf8_lossy(&entry.value).into_owned();
                    return Ok(Some(render_template(&template, vars)));
                }
                Ok(None) => {}
                Err(KvError::Unimplemented) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Add a grpc check entry for a new checker to its poller's config,
    /// dropping legacy entries that used the checker kind as service type.
    async fn patch_poller_checks(&self, pkg: &OnboardingPackage) -> Result<(), OnboardingError> {
        let (Some(poller_id), Some(kind), Some(agent_id)) = (
            pkg.poller_id.as_deref(),
            pkg.checker_kind.as_deref(),
            pkg.parent_id.as_deref(),
        ) else {
            return Ok(());
        };
        let key = format!("config/pollers/{}.json", poller_id);
        let entry = match self.kv.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(key = %key, "poller config absent; skipping check patch");
                return Ok(());
            }
            Err(KvError::Unimplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut doc: serde_json::Value = serde_json::from_slice(&entry.value)
            .unwrap_or_else(|_| serde_json::json!({}));
        let checks = doc
            .as_object_mut()
            .map(|o| o.entry("checks").or_insert_with(|| serde_json::json!([])));
        let Some(serde_json::Value::Array(checks)) = checks else {
            return Ok(());
        };

        checks.retain(|c| {
            c.get("service_type").and_then(|v| v.as_str()) != Some(kind)
                && !(c.get("service_type").and_then(|v| v.as_str()) == Some("grpc")
                    && c.get("service_name").and_then(|v| v.as_str()) == Some(kind))
        });
        checks.push(serde_json::json!({
            "service_name": kind,
            "service_type": "grpc",
            "agent_id": agent_id,
        }));

        let body = serde_json::to_vec(&doc)
            .map_err(|e| OnboardingError::InvalidRequest(e.to_string()))?;
        match self.kv.update(&key, &body, entry.revision).await {
            Ok(_) => Ok(()),
            Err(KvError::Aborted(_)) => {
                warn!(key = %key, "poller config moved during check patch; leaving for next create");
                Ok(())
            }
            Err(KvError::Unimplemented) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Template keys available for a component type, optionally narrowed
    /// to a security mode.
    pub async fn list_templates(
        &self,
        component_type: ComponentType,
        mode: Option<SecurityMode>,
    ) -> Result<Vec<String>, OnboardingError> {
        let prefix = match mode {
            Some(mode) => format!("templates/{}/{}/", component_type.template_dir(), mode),
            None => format!("templates/{}/", component_type.template_dir()),
        };
        match self.kv.list_keys(&prefix).await {
            Ok(keys) => Ok(keys),
            Err(KvError::Unimplemented) => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }
}

fn default_document(pkg: &OnboardingPackage) -> String {
    let doc = match pkg.component_type {
        ComponentType::Poller => serde_json::json!({
            "poller_id": pkg.component_id,
            "partition": pkg.site.clone().unwrap_or_else(|| "default".to_string()),
            "checks": [],
        }),
        ComponentType::Agent => serde_json::json!({
            "agent_id": pkg.component_id,
            "poller_id": pkg.poller_id,
        }),
        ComponentType::Checker => serde_json::json!({
            "kind": pkg.checker_kind,
            "agent_id": pkg.parent_id,
        }),
    };
    doc.to_string()
}
