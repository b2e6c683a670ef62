use crate::domain::ports::SettingsStore;
use crate::utils::error::{Result, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

/// Expiry is rounded up to this window so every process holding the same
/// secret derives the identical token within a window.
const TOKEN_WINDOW_SECS: i64 = 7 * 24 * 3600;
/// A token is re-derived rather than handed out when it is closer than this
/// to its expiry.
const TOKEN_MIN_VALIDITY_SECS: i64 = 24 * 3600;

/// A signed bearer credential for one backend connection. Persisted next to
/// the connection's configuration so it survives process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Derives and persists bearer credentials for backends secured by a shared
/// secret. Derivation is deterministic (HS256 over fixed claims with a
/// rounded expiry): concurrent or independent refreshes regenerate the
/// same token, and there is deliberately no lock around `refresh`.
#[derive(Clone)]
pub struct TokenManager {
    secret: String,
    role: String,
    settings_key: String,
    store: Arc<dyn SettingsStore>,
}

impl TokenManager {
    pub fn new(
        secret: impl Into<String>,
        role: impl Into<String>,
        settings_key: impl Into<String>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            secret: secret.into(),
            role: role.into(),
            settings_key: settings_key.into(),
            store,
        }
    }

    /// Returns the persisted credential when it is still comfortably valid,
    /// deriving and persisting a fresh one otherwise.
    pub async fn current(&self) -> Result<Credential> {
        if let Some(raw) = self.store.get(&self.settings_key).await? {
            if let Ok(credential) = serde_json::from_str::<Credential>(&raw) {
                let remaining = credential.expires_at.timestamp() - Utc::now().timestamp();
                if remaining > TOKEN_MIN_VALIDITY_SECS {
                    return Ok(credential);
                }
            }
        }
        self.refresh().await
    }

    /// Re-derives the credential from the shared secret and persists it.
    /// Called by adapters after a 401; the request is then retried exactly
    /// once with the new token.
    pub async fn refresh(&self) -> Result<Credential> {
        let credential = self.derive_at(Utc::now())?;
        self.store
            .put(&self.settings_key, &serde_json::to_string(&credential)?)
            .await?;
        tracing::info!(
            "🔑 refreshed bearer token, valid until {}",
            credential.expires_at
        );
        Ok(credential)
    }

    /// HS256 JWT with `role` and a window-rounded `exp` claim.
    pub fn derive_at(&self, now: DateTime<Utc>) -> Result<Credential> {
        let now_ts = now.timestamp();
        let mut exp = (now_ts / TOKEN_WINDOW_SECS + 1) * TOKEN_WINDOW_SECS;
        if exp - now_ts < TOKEN_MIN_VALIDITY_SECS {
            exp += TOKEN_WINDOW_SECS;
        }

        let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
        let claims = URL_SAFE_NO_PAD.encode(json!({ "role": self.role, "exp": exp }).to_string());
        let signing_input = format!("{}.{}", header, claims);

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).map_err(|e| {
            StoreError::AuthError {
                message: format!("cannot derive token from secret: {}", e),
            }
        })?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(Credential {
            token: format!("{}.{}", signing_input, signature),
            expires_at: Utc.timestamp_opt(exp, 0).single().unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::FileSettings;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, secret: &str) -> TokenManager {
        TokenManager::new(
            secret,
            "web_user",
            "postgrest.credential",
            Arc::new(FileSettings::new(dir.path().join("settings.json"))),
        )
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let a = manager(&dir, "shared-secret");
        let b = manager(&dir, "shared-secret");
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();

        assert_eq!(a.derive_at(now).unwrap(), b.derive_at(now).unwrap());
    }

    #[test]
    fn test_different_secrets_differ() {
        let dir = TempDir::new().unwrap();
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let a = manager(&dir, "secret-a").derive_at(now).unwrap();
        let b = manager(&dir, "secret-b").derive_at(now).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_expiry_is_window_rounded_with_min_validity() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "s");

        // any two instants inside the same window derive the same expiry
        let t1 = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let t2 = t1 + chrono::Duration::hours(1);
        let c1 = m.derive_at(t1).unwrap();
        let c2 = m.derive_at(t2).unwrap();
        assert_eq!(c1.expires_at, c2.expires_at);
        assert!(c1.expires_at.timestamp() - t1.timestamp() >= TOKEN_MIN_VALIDITY_SECS);
        assert_eq!(c1.expires_at.timestamp() % TOKEN_WINDOW_SECS, 0);
    }

    #[test]
    fn test_token_shape_is_three_segments() {
        let dir = TempDir::new().unwrap();
        let credential = manager(&dir, "s").derive_at(Utc::now()).unwrap();
        assert_eq!(credential.token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn test_refresh_persists_credential() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, "shared-secret");

        let refreshed = m.refresh().await.unwrap();
        let current = m.current().await.unwrap();
        assert_eq!(refreshed, current);

        // a second manager over the same store picks up the persisted value
        let other = manager(&dir, "shared-secret");
        assert_eq!(other.current().await.unwrap(), refreshed);
    }
}
