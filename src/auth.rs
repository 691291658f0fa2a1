//! Auth manager (§4.I): a single configured method/token pair, checked on
//! every dispatch through the auth gate.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{AuthError, KvError};
use crate::kv::{KvStore, AUTH_CONFIG_KEY};
use crate::secret::SecretBytes;

/// The configured authentication scheme (§3 "AuthConfig.method").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    None,
    Bearer,
    ApiKey,
    Basic,
    OAuth,
    Custom,
}

/// A caller's presented credentials, checked against the configured
/// [`AuthConfig`] by [`AuthManager::validate`].
pub struct Credential {
    pub method: AuthMethod,
    pub token: Option<Vec<u8>>,
}

impl Credential {
    /// No credentials presented.
    pub fn none() -> Self {
        Self {
            method: AuthMethod::None,
            token: None,
        }
    }
}

/// The persisted snapshot written under [`AUTH_CONFIG_KEY`] when
/// `persistent` is set (§6 "Persistent storage keys").
#[derive(Serialize, Deserialize)]
struct PersistedAuth {
    method: AuthMethod,
    #[serde(with = "token_b64")]
    token: Option<Vec<u8>>,
}

mod token_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => STANDARD.encode(bytes).serialize(ser),
            None => None::<String>.serialize(ser),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(de)?;
        match encoded {
            Some(s) => STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Policy for an unauthenticated caller against a configured method other
/// than `None` (§9 Design Notes, Open Question: the described behavior —
/// "caller method `None` always passes" — is a likely bug in the source
/// description; the strict variant, which requires a matching method, is
/// the default here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonymousPolicy {
    /// An anonymous caller is rejected whenever a non-`None` method is
    /// configured. The default.
    Strict,
    /// An anonymous caller always passes, regardless of configured method.
    /// Exists only for hosts that explicitly opt into the legacy behavior.
    PermissiveFallback,
}

impl Default for AnonymousPolicy {
    fn default() -> Self {
        AnonymousPolicy::Strict
    }
}

/// Holds the active auth configuration and validates callers against it
/// (§4.I).
pub struct AuthManager {
    method: AuthMethod,
    token: Option<SecretBytes>,
    persistent: bool,
    policy: AnonymousPolicy,
}

impl AuthManager {
    /// Start with auth open (`method = None`), per `init(initial_open)`
    /// when `initial_open` is true; a closed start can be built with
    /// [`AuthManager::set`] immediately after.
    pub fn init(initial_open: bool) -> Self {
        Self {
            method: if initial_open { AuthMethod::None } else { AuthMethod::Custom },
            token: None,
            persistent: false,
            policy: AnonymousPolicy::default(),
        }
    }

    /// Override the anonymous-caller policy. Hosts that need the legacy
    /// permissive behavior opt in explicitly; new deployments should leave
    /// this at its strict default.
    pub fn set_anonymous_policy(&mut self, policy: AnonymousPolicy) {
        self.policy = policy;
    }

    /// Configure the active method/token, optionally persisting it.
    pub fn set(&mut self, method: AuthMethod, token: Option<Vec<u8>>, persistent: bool) -> Result<(), AuthError> {
        if method != AuthMethod::None && token.is_none() {
            return Err(AuthError::InvalidConfig(
                "a token is required for any method other than None".to_string(),
            ));
        }
        self.method = method;
        self.token = token.map(SecretBytes::new);
        self.persistent = persistent;
        Ok(())
    }

    /// Reset to open (`method = None`, no token).
    pub fn clear(&mut self) {
        self.method = AuthMethod::None;
        self.token = None;
        self.persistent = false;
    }

    /// Whether any credential is currently required.
    pub fn is_required(&self) -> bool {
        self.method != AuthMethod::None
    }

    /// Current status, for `system.getAuthStatus` — never reveals the
    /// token itself.
    pub fn status_json(&self) -> Json {
        serde_json::json!({
            "method": serde_json::to_value(self.method).unwrap(),
            "required": self.is_required(),
            "persistent": self.persistent,
        })
    }

    /// Check `credential` against the configured method/token (§4.I
    /// validation rules):
    /// 1. configured method `None` -> any caller passes;
    /// 2. caller presents `None` against a configured non-`None` method ->
    ///    rejected under [`AnonymousPolicy::Strict`] (the default), or
    ///    passes under [`AnonymousPolicy::PermissiveFallback`];
    /// 3. otherwise the methods must match and the tokens must be
    ///    byte-equal.
    pub fn validate(&self, credential: &Credential) -> bool {
        if self.method == AuthMethod::None {
            return true;
        }
        if credential.method == AuthMethod::None {
            return self.policy == AnonymousPolicy::PermissiveFallback;
        }
        if credential.method != self.method {
            return false;
        }
        match (&self.token, &credential.token) {
            (Some(expected), Some(presented)) => expected.equals_bytes(presented),
            _ => false,
        }
    }

    /// Persist the current config under [`AUTH_CONFIG_KEY`] if
    /// `persistent` is set; a no-op otherwise.
    pub fn save(&self, kv: &dyn KvStore) -> Result<(), KvError> {
        if !self.persistent {
            return Ok(());
        }
        let snapshot = PersistedAuth {
            method: self.method,
            token: self.token.as_ref().map(|t| t.with_bytes(<[u8]>::to_vec)),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| KvError::WriteFailed(format!("auth config serialization failed: {e}")))?;
        kv.write(AUTH_CONFIG_KEY, &bytes)
    }

    /// Load a previously persisted config, if any, leaving the current
    /// state untouched when none is stored.
    pub fn load(&mut self, kv: &dyn KvStore) -> Result<(), KvError> {
        let Some(bytes) = kv.read(AUTH_CONFIG_KEY)? else {
            return Ok(());
        };
        let snapshot: PersistedAuth = serde_json::from_slice(&bytes).map_err(|e| KvError::Corrupt {
            key: AUTH_CONFIG_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.method = snapshot.method;
        self.token = snapshot.token.map(SecretBytes::new);
        self.persistent = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[test]
    fn open_auth_passes_any_caller() {
        let auth = AuthManager::init(true);
        assert!(auth.validate(&Credential::none()));
    }

    #[test]
    fn bearer_requires_matching_token() {
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"secret-token".to_vec()), false).unwrap();
        assert!(auth.validate(&Credential {
            method: AuthMethod::Bearer,
            token: Some(b"secret-token".to_vec()),
        }));
        assert!(!auth.validate(&Credential {
            method: AuthMethod::Bearer,
            token: Some(b"wrong".to_vec()),
        }));
    }

    #[test]
    fn mismatched_method_is_rejected() {
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"tok".to_vec()), false).unwrap();
        assert!(!auth.validate(&Credential {
            method: AuthMethod::ApiKey,
            token: Some(b"tok".to_vec()),
        }));
    }

    #[test]
    fn anonymous_caller_rejected_by_default_strict_policy() {
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"tok".to_vec()), false).unwrap();
        assert!(!auth.validate(&Credential::none()));
    }

    #[test]
    fn anonymous_caller_passes_under_permissive_fallback() {
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"tok".to_vec()), false).unwrap();
        auth.set_anonymous_policy(AnonymousPolicy::PermissiveFallback);
        assert!(auth.validate(&Credential::none()));
    }

    #[test]
    fn clear_reopens_auth() {
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"tok".to_vec()), false).unwrap();
        auth.clear();
        assert!(auth.validate(&Credential::none()));
    }

    #[test]
    fn persistence_survives_reload() {
        let kv = MemoryKvStore::new();
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::ApiKey, Some(b"k-1".to_vec()), true).unwrap();
        auth.save(&kv).unwrap();

        let mut reloaded = AuthManager::init(true);
        reloaded.load(&kv).unwrap();
        assert!(reloaded.validate(&Credential {
            method: AuthMethod::ApiKey,
            token: Some(b"k-1".to_vec()),
        }));
    }

    #[test]
    fn non_persistent_config_is_not_saved() {
        let kv = MemoryKvStore::new();
        let mut auth = AuthManager::init(true);
        auth.set(AuthMethod::Bearer, Some(b"tok".to_vec()), false).unwrap();
        auth.save(&kv).unwrap();
        assert_eq!(kv.read(AUTH_CONFIG_KEY).unwrap(), None);
    }

    #[test]
    fn non_none_method_requires_token() {
        let mut auth = AuthManager::init(true);
        let err = auth.set(AuthMethod::Bearer, None, false).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
    }
}
