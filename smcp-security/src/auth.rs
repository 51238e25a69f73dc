//! API-key authentication
//!
//! Keys are opaque `smcp_`-prefixed secrets. Only the SHA-256 of a key is
//! ever stored or loaded; the plaintext exists exactly once, in the return
//! value of [`AuthManager::generate`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

use smcp_protocol::{AggregatorError, AggregatorResult};

use crate::permissions::permission_matches;

/// Environment variable enabling authentication
pub const AUTH_ENABLED_ENV: &str = "AUTH_ENABLED";

/// Environment variable overriding the key store location
pub const AUTH_KEYS_FILE_ENV: &str = "AUTH_KEYS_FILE";

/// Default key store location
pub const DEFAULT_KEYS_PATH: &str = "./config/api-keys.json";

/// Prefix carried by every generated key
const KEY_PREFIX: &str = "smcp_";

/// Persisted API key record; the plaintext is never part of this shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Opaque identifier
    pub id: String,

    /// Hex SHA-256 of the plaintext key
    #[serde(rename = "hashedKey")]
    pub hashed_key: String,

    /// Human-readable label
    pub name: String,

    /// Granted permission patterns
    pub permissions: Vec<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(rename = "lastUsedAt", skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    pub enabled: bool,
}

/// On-disk key store shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStoreFile {
    #[serde(rename = "authEnabled")]
    pub auth_enabled: bool,

    #[serde(rename = "apiKeys", default)]
    pub api_keys: Vec<ApiKey>,
}

/// Per-request identity and permission snapshot; never stored
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Key id, or "anonymous" when auth is disabled
    pub api_key_id: String,

    /// Granted permission patterns
    pub permissions: Vec<String>,

    /// Whether a real key backed this context
    pub authenticated: bool,
}

impl AuthContext {
    /// Context used when authentication is disabled
    pub fn anonymous() -> Self {
        Self {
            api_key_id: "anonymous".to_string(),
            permissions: vec!["*".to_string()],
            authenticated: false,
        }
    }

    /// Check a required permission, failing with an authorization error
    pub fn require_permission(&self, required: &str) -> AggregatorResult<()> {
        if permission_matches(&self.permissions, required) {
            Ok(())
        } else {
            Err(AggregatorError::Authorization {
                reason: format!("Missing permission: {}", required),
            })
        }
    }
}

/// A freshly generated key together with its one-time plaintext
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub key: ApiKey,
    pub plaintext: String,
}

/// Process-wide API-key manager
pub struct AuthManager {
    enabled: bool,
    keys: RwLock<HashMap<String, ApiKey>>,
    path: Option<PathBuf>,
}

impl AuthManager {
    /// Manager with authentication switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            keys: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Load the key store from disk.
    ///
    /// A missing file means authentication stays disabled even when it was
    /// requested; there is nothing to validate against.
    pub async fn load(path: impl AsRef<Path>, requested: bool) -> AggregatorResult<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if requested {
                    tracing::warn!(path = %path.display(), "key store missing, auth disabled");
                }
                return Ok(Self {
                    enabled: false,
                    keys: RwLock::new(HashMap::new()),
                    path: Some(path.to_path_buf()),
                });
            }
            Err(e) => {
                return Err(AggregatorError::configuration(format!(
                    "Failed to read key store {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let store: KeyStoreFile = serde_json::from_str(&content).map_err(|e| {
            AggregatorError::configuration(format!(
                "Failed to parse key store {}: {}",
                path.display(),
                e
            ))
        })?;

        let keys = store
            .api_keys
            .into_iter()
            .map(|key| (key.hashed_key.clone(), key))
            .collect();

        Ok(Self {
            enabled: requested && store.auth_enabled,
            keys: RwLock::new(keys),
            path: Some(path.to_path_buf()),
        })
    }

    /// Load from the environment: `AUTH_ENABLED` plus `AUTH_KEYS_FILE`
    pub async fn from_env() -> AggregatorResult<Self> {
        let requested = std::env::var(AUTH_ENABLED_ENV)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let path = std::env::var(AUTH_KEYS_FILE_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_KEYS_PATH.to_string());
        Self::load(path, requested).await
    }

    /// Whether authentication is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Override the enabled flag, e.g. when provisioning the first key
    /// into a store that does not exist yet
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a new key and persist the store.
    ///
    /// The returned plaintext is shown once and never recoverable.
    pub async fn generate(
        &self,
        name: impl Into<String>,
        permissions: Vec<String>,
        expires_in: Option<ChronoDuration>,
    ) -> AggregatorResult<GeneratedKey> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let plaintext = format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(secret));

        let key = ApiKey {
            id: uuid::Uuid::new_v4().to_string(),
            hashed_key: hash_key(&plaintext),
            name: name.into(),
            permissions,
            created_at: Utc::now(),
            expires_at: expires_in.map(|d| Utc::now() + d),
            last_used_at: None,
            enabled: true,
        };

        {
            let mut keys = self.keys.write().await;
            keys.insert(key.hashed_key.clone(), key.clone());
        }
        self.save().await?;

        Ok(GeneratedKey { key, plaintext })
    }

    /// Validate a presented key and build the request's auth context.
    ///
    /// With auth disabled every caller gets the anonymous wildcard context.
    pub async fn validate(&self, plaintext: Option<&str>) -> AggregatorResult<AuthContext> {
        if !self.enabled {
            return Ok(AuthContext::anonymous());
        }

        let plaintext = plaintext.ok_or_else(|| AggregatorError::Authentication {
            reason: "API key required".to_string(),
        })?;
        let hashed = hash_key(plaintext);

        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&hashed)
            .ok_or_else(|| AggregatorError::Authentication {
                reason: "Invalid API key".to_string(),
            })?;

        if !key.enabled {
            return Err(AggregatorError::Authentication {
                reason: "API key disabled".to_string(),
            });
        }
        if let Some(expires_at) = key.expires_at {
            if Utc::now() > expires_at {
                return Err(AggregatorError::Authentication {
                    reason: "API key expired".to_string(),
                });
            }
        }

        key.last_used_at = Some(Utc::now());
        Ok(AuthContext {
            api_key_id: key.id.clone(),
            permissions: key.permissions.clone(),
            authenticated: true,
        })
    }

    /// Persist the store to its configured path
    pub async fn save(&self) -> AggregatorResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let keys = self.keys.read().await;
        let mut api_keys: Vec<ApiKey> = keys.values().cloned().collect();
        api_keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let store = KeyStoreFile {
            auth_enabled: self.enabled,
            api_keys,
        };

        let content = serde_json::to_string_pretty(&store)
            .map_err(|e| AggregatorError::configuration(format!("Failed to serialize key store: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AggregatorError::configuration(format!(
                        "Failed to create key store directory: {}",
                        e
                    ))
                })?;
            }
        }
        tokio::fs::write(path, content).await.map_err(|e| {
            AggregatorError::configuration(format!(
                "Failed to write key store {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Hex SHA-256 of a plaintext key
pub fn hash_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_store(dir: &tempfile::TempDir) -> AuthManager {
        let path = dir.path().join("api-keys.json");
        let store = KeyStoreFile {
            auth_enabled: true,
            api_keys: vec![],
        };
        tokio::fs::write(&path, serde_json::to_string(&store).unwrap())
            .await
            .unwrap();
        AuthManager::load(&path, true).await.unwrap()
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_key("smcp_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls
        assert_eq!(hash, hash_key("smcp_test"));
    }

    #[tokio::test]
    async fn test_generate_and_validate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_store(&dir).await;

        let generated = manager
            .generate("ci", vec!["tools:*".to_string()], None)
            .await
            .unwrap();
        assert!(generated.plaintext.starts_with("smcp_"));

        let context = manager.validate(Some(&generated.plaintext)).await.unwrap();
        assert!(context.authenticated);
        assert_eq!(context.api_key_id, generated.key.id);
        assert!(context.require_permission("tools:echo.say").is_ok());
        assert!(context.require_permission("admin:keys").is_err());
    }

    #[tokio::test]
    async fn test_unknown_and_missing_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_store(&dir).await;

        let err = manager.validate(Some("smcp_bogus")).await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_ERROR");

        let err = manager.validate(None).await.unwrap_err();
        assert!(err.to_string().contains("API key required"));
    }

    #[tokio::test]
    async fn test_expired_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_store(&dir).await;

        let generated = manager
            .generate("short-lived", vec!["*".to_string()], Some(ChronoDuration::seconds(-1)))
            .await
            .unwrap();

        let err = manager.validate(Some(&generated.plaintext)).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_disabled_auth_yields_anonymous_wildcard() {
        let manager = AuthManager::disabled();
        let context = manager.validate(None).await.unwrap();
        assert!(!context.authenticated);
        assert_eq!(context.api_key_id, "anonymous");
        assert!(context.require_permission("tools:anything").is_ok());
    }

    #[tokio::test]
    async fn test_missing_store_file_disables_auth() {
        let dir = tempfile::tempdir().unwrap();
        let manager = AuthManager::load(dir.path().join("absent.json"), true)
            .await
            .unwrap();
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_store_round_trip_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-keys.json");
        tokio::fs::write(
            &path,
            serde_json::to_string(&KeyStoreFile {
                auth_enabled: true,
                api_keys: vec![],
            })
            .unwrap(),
        )
        .await
        .unwrap();

        let manager = AuthManager::load(&path, true).await.unwrap();
        let generated = manager
            .generate(
                "roundtrip",
                vec!["tools:echo.*".to_string()],
                Some(ChronoDuration::days(30)),
            )
            .await
            .unwrap();

        let reloaded = AuthManager::load(&path, true).await.unwrap();
        let keys = reloaded.keys.read().await;
        let key = keys.get(&generated.key.hashed_key).unwrap();

        assert_eq!(key.id, generated.key.id);
        assert_eq!(key.hashed_key, generated.key.hashed_key);
        assert_eq!(key.name, "roundtrip");
        assert_eq!(key.permissions, vec!["tools:echo.*"]);
        assert_eq!(key.created_at, generated.key.created_at);
        assert_eq!(key.expires_at, generated.key.expires_at);
        assert!(key.enabled);

        // Plaintext never touches the file
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains(&generated.plaintext));
    }
}
