//! Credential handling for broker authentication.
//!
//! Token signing is injected through [`TokenSigner`] so the crate never
//! touches key material directly; the host application supplies the HMAC
//! implementation. Device-key credentials are minted with a fixed lifetime
//! and proactively renewed once most of that lifetime has elapsed.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

/// Lifetime of a freshly minted token, in seconds.
pub const SAS_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Fraction of the lifetime after which a device-key token is renewed.
pub const SAS_REFRESH_MULTIPLIER: f64 = 0.8;

/// How the session authenticates to the broker.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Shared device key; tokens are minted and rotated by the session.
    DeviceKey(String),
    /// Caller-supplied long-lived token; never rotated.
    SasToken(String),
    /// Mutual-TLS client certificate; no password is sent.
    X509,
}

/// Errors raised while obtaining or validating credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("shared access token is malformed: {0}")]
    MalformedToken(String),

    #[error("shared access token expired at unix time {0}")]
    ExpiredToken(u64),

    #[error("device-key auth requires a token signer")]
    MissingSigner,
}

/// Signs a resource scope into a shared access token.
///
/// Implementations own the key-derivation and HMAC details; the session only
/// supplies the scope string and the desired expiry.
pub trait TokenSigner: Send {
    fn sign(&self, key: &str, scope: &str, expiry_unix: u64) -> Result<String, AuthError>;
}

/// A credential ready to present on connect.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Resource scope the credential covers (`{host}/devices/{device_id}`).
    pub scope: String,
    /// Password field for the connect packet; `None` for certificate auth.
    pub token: Option<String>,
    /// Unix expiry of the token, zero when not applicable.
    pub expires_at: u64,
    issued_at: Instant,
}

/// Mints, caches, and rotates the connect credential.
pub struct CredentialManager {
    mode: AuthMode,
    signer: Option<Box<dyn TokenSigner>>,
    scope: String,
    current: Option<Credential>,
}

impl CredentialManager {
    /// Builds a manager for the given mode and resource scope.
    ///
    /// Fails with [`AuthError::MissingSigner`] when the mode needs minting
    /// but no signer was supplied.
    pub fn new(
        mode: AuthMode,
        signer: Option<Box<dyn TokenSigner>>,
        scope: String,
    ) -> Result<Self, AuthError> {
        if matches!(mode, AuthMode::DeviceKey(_)) && signer.is_none() {
            return Err(AuthError::MissingSigner);
        }
        Ok(Self {
            mode,
            signer,
            scope,
            current: None,
        })
    }

    /// Returns a credential valid at `now`, minting one if necessary.
    pub fn obtain(&mut self, now: Instant) -> Result<Credential, AuthError> {
        let credential = match &self.mode {
            AuthMode::DeviceKey(key) => {
                let signer = self.signer.as_ref().ok_or(AuthError::MissingSigner)?;
                let expiry = unix_now() + SAS_TOKEN_LIFETIME_SECS;
                let token = signer.sign(key, &self.scope, expiry)?;
                debug!(expiry, "minted shared access token");
                Credential {
                    scope: self.scope.clone(),
                    token: Some(token),
                    expires_at: expiry,
                    issued_at: now,
                }
            }
            AuthMode::SasToken(token) => {
                let expiry = parse_sas_expiry(token)?;
                if expiry <= unix_now() {
                    return Err(AuthError::ExpiredToken(expiry));
                }
                Credential {
                    scope: self.scope.clone(),
                    token: Some(token.clone()),
                    expires_at: expiry,
                    issued_at: now,
                }
            }
            AuthMode::X509 => Credential {
                scope: self.scope.clone(),
                token: None,
                expires_at: 0,
                issued_at: now,
            },
        };
        self.current = Some(credential.clone());
        Ok(credential)
    }

    /// True when a minted token has consumed enough of its lifetime that the
    /// connection should be torn down and re-established with a fresh one.
    /// Only device-key credentials rotate.
    pub fn needs_renewal(&self, now: Instant) -> bool {
        if !matches!(self.mode, AuthMode::DeviceKey(_)) {
            return false;
        }
        let Some(current) = &self.current else {
            return false;
        };
        let renew_after = (SAS_TOKEN_LIFETIME_SECS as f64 * SAS_REFRESH_MULTIPLIER) as u64;
        now.duration_since(current.issued_at).as_secs() >= renew_after
    }

    /// True when no password will be sent on connect.
    pub fn is_certificate(&self) -> bool {
        matches!(self.mode, AuthMode::X509)
    }
}

/// Extracts the `se=` expiry claim from a shared access token.
fn parse_sas_expiry(token: &str) -> Result<u64, AuthError> {
    token
        .split(['&', ' '])
        .find_map(|part| part.strip_prefix("se="))
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| AuthError::MalformedToken("missing or invalid se= claim".to_string()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::FakeSigner;
    use std::time::Duration;

    fn manager(mode: AuthMode) -> CredentialManager {
        let signer: Option<Box<dyn TokenSigner>> = match mode {
            AuthMode::DeviceKey(_) => Some(Box::new(FakeSigner)),
            _ => None,
        };
        CredentialManager::new(mode, signer, "host/devices/d1".to_string())
            .expect("manager should build")
    }

    #[test]
    fn test_device_key_requires_signer() {
        let result = CredentialManager::new(
            AuthMode::DeviceKey("key".to_string()),
            None,
            "scope".to_string(),
        );
        assert!(matches!(result, Err(AuthError::MissingSigner)));
    }

    #[test]
    fn test_device_key_mints_token_with_lifetime() {
        let mut mgr = manager(AuthMode::DeviceKey("key".to_string()));
        let cred = mgr.obtain(Instant::now()).expect("obtain");
        let token = cred.token.expect("token");
        assert!(token.contains("sr=host/devices/d1"));
        assert!(cred.expires_at >= unix_now() + SAS_TOKEN_LIFETIME_SECS - 5);
    }

    #[test]
    fn test_user_token_passed_through() {
        let future = unix_now() + 1000;
        let raw = format!("SharedAccessSignature sr=s&sig=x&se={future}");
        let mut mgr = manager(AuthMode::SasToken(raw.clone()));
        let cred = mgr.obtain(Instant::now()).expect("obtain");
        assert_eq!(cred.token.as_deref(), Some(raw.as_str()));
        assert_eq!(cred.expires_at, future);
    }

    #[test]
    fn test_expired_user_token_rejected() {
        let raw = "SharedAccessSignature sr=s&sig=x&se=1000".to_string();
        let mut mgr = manager(AuthMode::SasToken(raw));
        assert!(matches!(
            mgr.obtain(Instant::now()),
            Err(AuthError::ExpiredToken(1000))
        ));
    }

    #[test]
    fn test_malformed_user_token_rejected() {
        let mut mgr = manager(AuthMode::SasToken("not-a-token".to_string()));
        assert!(matches!(
            mgr.obtain(Instant::now()),
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_renewal_threshold() {
        let mut mgr = manager(AuthMode::DeviceKey("key".to_string()));
        let issued = Instant::now();
        mgr.obtain(issued).expect("obtain");
        assert!(!mgr.needs_renewal(issued + Duration::from_secs(2879)));
        assert!(mgr.needs_renewal(issued + Duration::from_secs(2880)));
    }

    #[test]
    fn test_user_token_never_renews() {
        let future = unix_now() + 10_000;
        let raw = format!("sr=s&sig=x&se={future}");
        let mut mgr = manager(AuthMode::SasToken(raw));
        let issued = Instant::now();
        mgr.obtain(issued).expect("obtain");
        assert!(!mgr.needs_renewal(issued + Duration::from_secs(100_000)));
    }

    #[test]
    fn test_x509_has_no_token() {
        let mut mgr = manager(AuthMode::X509);
        let cred = mgr.obtain(Instant::now()).expect("obtain");
        assert!(cred.token.is_none());
        assert!(mgr.is_certificate());
    }
}
