use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Component & security enums ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Poller,
    Agent,
    Checker,
}

impl ComponentType {
    /// KV directory segment used by template and config projection.
    pub fn template_dir(&self) -> &'static str {
        match self {
            ComponentType::Poller => "pollers",
            ComponentType::Agent => "agents",
            ComponentType::Checker => "checkers",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentType::Poller => write!(f, "poller"),
            ComponentType::Agent => write!(f, "agent"),
            ComponentType::Checker => write!(f, "checker"),
        }
    }
}

impl std::str::FromStr for ComponentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poller" => Ok(ComponentType::Poller),
            "agent" => Ok(ComponentType::Agent),
            "checker" => Ok(ComponentType::Checker),
            other => Err(DomainError::InvalidComponentType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Trust-domain join token + downstream entry.
    Spire,
    /// Internally-minted CA-signed client certificate bundle.
    Mtls,
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMode::Spire => write!(f, "spire"),
            SecurityMode::Mtls => write!(f, "mtls"),
        }
    }
}

impl std::str::FromStr for SecurityMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spire" => Ok(SecurityMode::Spire),
            "mtls" => Ok(SecurityMode::Mtls),
            other => Err(DomainError::InvalidSecurityMode(other.to_string())),
        }
    }
}

// ── Package lifecycle ─────────────────────────────────────────────────────────

/// Onboarding package status.
///
/// Transitions:
///   issued → delivered → activated
///   issued | delivered | activated → revoked
///   issued | delivered → expired
///   revoked | expired → deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Issued,
    Delivered,
    Activated,
    Revoked,
    Expired,
    Deleted,
}

impl PackageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PackageStatus::Revoked | PackageStatus::Expired | PackageStatus::Deleted
        )
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageStatus::Issued => "issued",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Activated => "activated",
            PackageStatus::Revoked => "revoked",
            PackageStatus::Expired => "expired",
            PackageStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PackageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(PackageStatus::Issued),
            "delivered" => Ok(PackageStatus::Delivered),
            "activated" => Ok(PackageStatus::Activated),
            "revoked" => Ok(PackageStatus::Revoked),
            "expired" => Ok(PackageStatus::Expired),
            "deleted" => Ok(PackageStatus::Deleted),
            other => Err(DomainError::InvalidPackageStatus(other.to_string())),
        }
    }
}

// ── Onboarding package ────────────────────────────────────────────────────────

/// A cryptographic enrollment package admitting one edge component into the
/// trust boundary. Created once, mutated only through explicit lifecycle
/// transitions; `updated_at` is strictly monotone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingPackage {
    pub package_id: Uuid,
    pub label: String,
    pub component_id: String,
    pub component_type: ComponentType,
    pub parent_type: Option<ComponentType>,
    pub parent_id: Option<String>,
    pub poller_id: Option<String>,
    pub site: Option<String>,
    pub security_mode: SecurityMode,
    pub status: PackageStatus,

    pub downstream_entry_id: Option<String>,
    pub downstream_spiffe_id: Option<String>,
    pub selectors: Vec<String>,

    /// Base64 of the AES-GCM ciphertext; cleared on revoke.
    pub join_token_ciphertext: Option<String>,
    pub join_token_expires_at: Option<DateTime<Utc>>,
    pub bundle_ciphertext: Option<String>,
    /// SHA-256 hex of the download token; cleared after delivery.
    pub download_token_hash: Option<String>,
    pub download_token_expires_at: Option<DateTime<Utc>>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_from_ip: Option<String>,
    pub last_seen_spiffe_id: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub checker_kind: Option<String>,
    pub checker_config_json: Option<String>,
    pub notes: Option<String>,
    /// Revision of the KV projection written (or witnessed) at create time.
    pub kv_revision: Option<u64>,
}

impl OnboardingPackage {
    /// Only revoked/expired packages (or any package that has been through
    /// a revoke) may be deleted.
    pub fn is_deletable(&self) -> bool {
        matches!(self.status, PackageStatus::Revoked | PackageStatus::Expired)
            || self.revoked_at.is_some()
    }

    /// Advance `updated_at` to `now`, preserving strict monotonicity: if
    /// the clock has not moved past the previous write, step 1ms beyond it.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now <= self.updated_at {
            self.updated_at += chrono::Duration::milliseconds(1);
        } else {
            self.updated_at = now;
        }
    }
}

// ── Onboarding events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnboardingEventType {
    Issued,
    Delivered,
    Activated,
    Revoked,
    Deleted,
}

impl std::fmt::Display for OnboardingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OnboardingEventType::Issued => "issued",
            OnboardingEventType::Delivered => "delivered",
            OnboardingEventType::Activated => "activated",
            OnboardingEventType::Revoked => "revoked",
            OnboardingEventType::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// Append-only audit record for a package lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingEvent {
    pub package_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub event_type: OnboardingEventType,
    pub actor: String,
    pub source_ip: Option<String>,
    pub details: Option<serde_json::Value>,
}
