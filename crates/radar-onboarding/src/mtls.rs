//! Internally-minted mTLS credential bundles: a CA-signed client
//! certificate plus key, sealed for one edge component.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use radar_config::MtlsConfig;
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OnboardingError;

const DEFAULT_CA_CERT: &str = "ca.pem";
const DEFAULT_CA_KEY: &str = "ca-key.pem";
const CLIENT_KEY_BITS: usize = 2048;
/// Internal DNS suffix every client certificate carries alongside its name.
const CLIENT_DNS_SUFFIX: &str = ".serviceradar";

/// The plaintext credential bundle, JSON-encoded before encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsBundle {
    pub ca_cert_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub server_name: String,
    pub endpoints: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// Advisory: mirrors the certificate's notAfter for edge display.
    pub expires_at: DateTime<Utc>,
}

pub struct MtlsMinter {
    cfg: MtlsConfig,
    ca_cert_name: String,
    ca_key_name: String,
}

impl MtlsMinter {
    pub fn new(cfg: MtlsConfig) -> Self {
        MtlsMinter {
            cfg,
            ca_cert_name: DEFAULT_CA_CERT.to_string(),
            ca_key_name: DEFAULT_CA_KEY.to_string(),
        }
    }

    pub fn with_ca_files(mut self, cert_name: &str, key_name: &str) -> Self {
        self.ca_cert_name = cert_name.to_string();
        self.ca_key_name = key_name.to_string();
        self
    }

    /// Mint a client certificate for `client_name`, signed by the
    /// configured CA. SANs cover the client name, its internal DNS alias,
    /// the server name, and every endpoint host (IP SANs for IP-form
    /// endpoints).
    pub fn mint(&self, client_name: &str, now: DateTime<Utc>) -> Result<MtlsBundle, OnboardingError> {
        let ca_cert_path = resolve_in_dir(&self.cfg.cert_dir, &self.ca_cert_name)?;
        let ca_key_path = resolve_in_dir(&self.cfg.cert_dir, &self.ca_key_name)?;
        let ca_cert_pem = read_pem(&ca_cert_path)?;
        let ca_key_pem = read_pem(&ca_key_path)?;

        let ca_key = KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| OnboardingError::CertMint(format!("ca key: {}", e)))?;
        let ca_params = CertificateParams::from_ca_cert_pem(&ca_cert_pem)
            .map_err(|e| OnboardingError::CertMint(format!("ca cert: {}", e)))?;
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|e| OnboardingError::CertMint(format!("ca reload: {}", e)))?;

        let mut sans: Vec<String> = vec![
            client_name.to_string(),
            format!("{}{}", client_name, CLIENT_DNS_SUFFIX),
            self.cfg.server_name.clone(),
        ];
        for endpoint in &self.cfg.endpoints {
            let host = endpoint_host(endpoint);
            if !host.is_empty() && !sans.iter().any(|s| s == host) {
                sans.push(host.to_string());
            }
        }

        let mut params = CertificateParams::new(sans)
            .map_err(|e| OnboardingError::CertMint(format!("client params: {}", e)))?;
        params
            .distinguished_name
            .push(DnType::CommonName, client_name);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let ttl = Duration::days(i64::from(self.cfg.cert_ttl_days));
        let expires_at = now + ttl;
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(expires_at)?;

        let (client_key, client_key_pem) = generate_client_key()?;
        let client_cert = params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .map_err(|e| OnboardingError::CertMint(format!("sign: {}", e)))?;

        debug!(client = client_name, expires = %expires_at, "minted mtls client certificate");
        Ok(MtlsBundle {
            ca_cert_pem,
            client_cert_pem: client_cert.pem(),
            client_key_pem,
            server_name: self.cfg.server_name.clone(),
            endpoints: self.cfg.endpoints.clone(),
            generated_at: now,
            expires_at,
        })
    }
}

/// Fresh 2048-bit RSA client keypair: the PKCS#8 PEM that ships in the
/// bundle plus the rcgen handle used for CA signing. rcgen only generates
/// ECDSA/Ed25519 keys itself, so the key material comes from the `rsa`
/// crate and is re-imported.
fn generate_client_key() -> Result<(KeyPair, String), OnboardingError> {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, CLIENT_KEY_BITS)
        .map_err(|e| OnboardingError::CertMint(format!("rsa keygen: {}", e)))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| OnboardingError::CertMint(format!("rsa encode: {}", e)))?;
    let key_pair = KeyPair::from_pem(&pem)
        .map_err(|e| OnboardingError::CertMint(format!("client key import: {}", e)))?;
    Ok((key_pair, pem.to_string()))
}

/// Join `name` under `base`, rejecting anything that could escape it:
/// absolute paths, parent components, embedded separators.
fn resolve_in_dir(base: &Path, name: &str) -> Result<PathBuf, OnboardingError> {
    if name.is_empty()
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || Path::new(name).is_absolute()
    {
        return Err(OnboardingError::PathTraversal(name.to_string()));
    }
    Ok(base.join(name))
}

fn read_pem(path: &Path) -> Result<String, OnboardingError> {
    std::fs::read_to_string(path)
        .map_err(|e| OnboardingError::CertMint(format!("read {}: {}", path.display(), e)))
}

/// The host part of `host[:port]`, with IPv6 brackets stripped.
fn endpoint_host(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !host.contains(':') => {
            host
        }
        _ => endpoint,
    }
}

fn to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime, OnboardingError> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| OnboardingError::CertMint(format!("timestamp: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, IsCa};
    use rsa::traits::PublicKeyParts;

    fn write_test_ca(dir: &Path) {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, "test-ca");
        let ca_cert = params.self_signed(&ca_key).unwrap();
        std::fs::write(dir.join(DEFAULT_CA_CERT), ca_cert.pem()).unwrap();
        std::fs::write(dir.join(DEFAULT_CA_KEY), ca_key.serialize_pem()).unwrap();
    }

    fn config(dir: &Path) -> MtlsConfig {
        MtlsConfig {
            cert_dir: dir.to_path_buf(),
            server_name: "core.example".to_string(),
            endpoints: vec!["core.example:50051".to_string(), "10.1.2.3:50052".to_string()],
            cert_ttl_days: 30,
        }
    }

    #[test]
    fn mint_produces_signed_bundle_with_rsa_2048_key() {
        use rsa::pkcs8::DecodePrivateKey;

        let dir = tempfile::tempdir().unwrap();
        write_test_ca(dir.path());
        let minter = MtlsMinter::new(config(dir.path()));

        let now = Utc::now();
        let bundle = minter.mint("edge-poller", now).unwrap();
        assert!(bundle.client_cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.ca_cert_pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(bundle.server_name, "core.example");
        assert_eq!(bundle.expires_at, now + Duration::days(30));

        // The bundled key round-trips as 2048-bit RSA.
        let key = RsaPrivateKey::from_pkcs8_pem(&bundle.client_key_pem).unwrap();
        assert_eq!(key.size() * 8, 2048);
    }

    #[test]
    fn traversal_in_ca_name_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_test_ca(dir.path());
        let minter =
            MtlsMinter::new(config(dir.path())).with_ca_files("../../etc/ca.pem", DEFAULT_CA_KEY);
        assert!(matches!(
            minter.mint("edge-poller", Utc::now()),
            Err(OnboardingError::PathTraversal(_))
        ));
    }

    #[test]
    fn endpoint_host_strips_port_and_brackets() {
        assert_eq!(endpoint_host("core.example:50051"), "core.example");
        assert_eq!(endpoint_host("10.1.2.3:50052"), "10.1.2.3");
        assert_eq!(endpoint_host("[2001:db8::1]:50051"), "2001:db8::1");
        assert_eq!(endpoint_host("bare-host"), "bare-host");
    }

    #[test]
    fn missing_ca_reports_mint_error_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let minter = MtlsMinter::new(config(dir.path()));
        assert!(matches!(
            minter.mint("edge-poller", Utc::now()),
            Err(OnboardingError::CertMint(_))
        ));
    }
}
