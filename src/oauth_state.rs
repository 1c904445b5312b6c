//! OAuth2 CSRF state.
//!
//! A state is issued when the user leaves for Discord and must come back,
//! unchanged, on the callback together with the `oauth_state` cookie. Stores
//! differ in what the cookie carries and where the issued state is
//! remembered.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::config::{State as StateConfig, StoreKind};

/// Cookie binding the state to the browser.
pub const STATE_COOKIE: &str = "oauth_state";
const STATE_LENGTH: usize = 32;
const KEY_LENGTH: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("cannot read random bytes: {0}")]
    Random(#[from] rand::Error),
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("invalid signing key")]
    InvalidKey(#[from] hmac::digest::InvalidLength),
    #[error("system clock is before unix epoch")]
    Clock(#[from] std::time::SystemTimeError),
    #[error("state lifetime of {0:?} is out of range")]
    Ttl(Duration),
}

/// Freshly issued state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedState {
    /// Value sent to Discord as `state` query parameter.
    pub state: String,
    /// Value of the `oauth_state` cookie.
    pub cookie: String,
}

/// Issue and check OAuth2 states.
pub trait StateStore: Send + Sync {
    /// Create a new, unique, state.
    fn issue(&self) -> Result<IssuedState, StateError>;

    /// Check that `state` was issued to the browser sending `cookie`.
    /// A state is consumed by this call, whatever its result.
    fn verify(&self, cookie: Option<&str>, state: &str) -> bool;
}

/// Hex-encoded random token.
fn random_state() -> Result<String, StateError> {
    let mut bytes = [0u8; STATE_LENGTH];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

fn unix_now() -> Result<u64, StateError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// The cookie holds the state itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct CookieStore;

impl StateStore for CookieStore {
    fn issue(&self) -> Result<IssuedState, StateError> {
        let state = random_state()?;
        Ok(IssuedState {
            cookie: state.clone(),
            state,
        })
    }

    fn verify(&self, cookie: Option<&str>, state: &str) -> bool {
        cookie == Some(state)
    }
}

/// The cookie holds `state.expires_at.signature`, signed with HMAC-SHA256.
pub struct SignedCookieStore {
    mac: HmacSha256,
    ttl: Duration,
}

impl SignedCookieStore {
    pub fn new(key: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, StateError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(StateError::EmptyKey);
        }

        Ok(Self {
            mac: HmacSha256::new_from_slice(key)?,
            ttl,
        })
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    fn sign(&self, state: &str, expires_at: u64) -> String {
        let payload = format!("{state}.{expires_at}");
        let signature = self.mac(&payload).finalize().into_bytes();
        format!("{payload}.{}", hex::encode(signature))
    }
}

impl StateStore for SignedCookieStore {
    fn issue(&self) -> Result<IssuedState, StateError> {
        let state = random_state()?;
        let expires_at = unix_now()?
            .checked_add(self.ttl.as_secs())
            .ok_or(StateError::Ttl(self.ttl))?;

        Ok(IssuedState {
            cookie: self.sign(&state, expires_at),
            state,
        })
    }

    fn verify(&self, cookie: Option<&str>, state: &str) -> bool {
        let Some((payload, signature)) = cookie.and_then(|c| c.rsplit_once('.')) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        if self.mac(payload).verify_slice(&signature).is_err() {
            return false;
        }

        let Some((signed_state, expires_at)) = payload.split_once('.') else {
            return false;
        };
        let fresh = match (expires_at.parse::<u64>(), unix_now()) {
            (Ok(expires_at), Ok(now)) => now <= expires_at,
            _ => false,
        };

        fresh && signed_state == state
    }
}

/// States are kept in memory and can only be used once.
/// The cookie holds the state itself.
pub struct MemoryStore {
    states: DashMap<String, Instant>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: DashMap::new(),
            ttl,
        }
    }

    /// Number of states waiting for a callback.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for MemoryStore {
    fn issue(&self) -> Result<IssuedState, StateError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(self.ttl)
            .ok_or(StateError::Ttl(self.ttl))?;
        // Clean abandoned flows.
        self.states.retain(|_, expires_at| *expires_at > now);

        let state = random_state()?;
        self.states.insert(state.clone(), expires_at);

        Ok(IssuedState {
            cookie: state.clone(),
            state,
        })
    }

    fn verify(&self, cookie: Option<&str>, state: &str) -> bool {
        let issued = self
            .states
            .remove(state)
            .is_some_and(|(_, expires_at)| expires_at > Instant::now());

        issued && cookie == Some(state)
    }
}

/// Build the store selected on configuration.
pub fn from_config(config: &StateConfig) -> Result<Arc<dyn StateStore>, StateError> {
    let ttl = Duration::from_secs(config.ttl);

    let store: Arc<dyn StateStore> = match config.store {
        StoreKind::Cookie => Arc::new(CookieStore),
        StoreKind::Signed => {
            let key = match config.secret.as_deref().filter(|s| !s.is_empty()) {
                Some(secret) => secret.as_bytes().to_vec(),
                None => {
                    tracing::warn!(
                        "`STATE_SECRET` not provided; generated a temporary key. Pending logins will fail after restart."
                    );
                    let mut key = vec![0u8; KEY_LENGTH];
                    OsRng.try_fill_bytes(&mut key)?;
                    key
                },
            };
            Arc::new(SignedCookieStore::new(key, ttl)?)
        },
        StoreKind::Memory => Arc::new(MemoryStore::new(ttl)),
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_states_are_unique() {
        let store = CookieStore;
        let first = store.issue().unwrap();
        let second = store.issue().unwrap();

        assert_eq!(first.state.len(), STATE_LENGTH * 2);
        assert!(first.state.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first.state, second.state);
    }

    #[test]
    fn test_cookie_store() {
        let store = CookieStore;
        let issued = store.issue().unwrap();

        assert_eq!(issued.cookie, issued.state);
        assert!(store.verify(Some(&issued.cookie), &issued.state));
        assert!(!store.verify(None, &issued.state));
        assert!(!store.verify(Some("other"), &issued.state));
    }

    #[test]
    fn test_signed_store() {
        let store = SignedCookieStore::new(b"secret", TTL).unwrap();
        let issued = store.issue().unwrap();

        assert!(issued.cookie.starts_with(&issued.state));
        assert!(store.verify(Some(&issued.cookie), &issued.state));
        assert!(!store.verify(None, &issued.state));
        assert!(!store.verify(Some(&issued.cookie), "other"));
        assert!(!store.verify(Some(&issued.state), &issued.state));
    }

    #[test]
    fn test_signed_store_rejects_tampering() {
        let store = SignedCookieStore::new(b"secret", TTL).unwrap();
        let issued = store.issue().unwrap();

        // Push expiry far away without re-signing.
        let (state, rest) = issued.cookie.split_once('.').unwrap();
        let (_, signature) = rest.split_once('.').unwrap();
        let forged = format!("{state}.{}.{signature}", u64::MAX);
        assert!(!store.verify(Some(&forged), state));

        let other = SignedCookieStore::new(b"another secret", TTL).unwrap();
        assert!(!other.verify(Some(&issued.cookie), &issued.state));
    }

    #[test]
    fn test_signed_store_rejects_expired() {
        let store = SignedCookieStore::new(b"secret", TTL).unwrap();
        let cookie = store.sign("abcdef", unix_now().unwrap() - 1);

        assert!(!store.verify(Some(&cookie), "abcdef"));
    }

    #[test]
    fn test_signed_store_requires_key() {
        assert!(matches!(
            SignedCookieStore::new(b"", TTL),
            Err(StateError::EmptyKey)
        ));
    }

    #[test]
    fn test_signed_store_rejects_huge_ttl() {
        let store = SignedCookieStore::new(b"secret", Duration::MAX).unwrap();
        assert!(matches!(store.issue(), Err(StateError::Ttl(_))));
    }

    #[test]
    fn test_memory_store_rejects_huge_ttl() {
        let store = MemoryStore::new(Duration::from_secs(u64::MAX));
        assert!(matches!(store.issue(), Err(StateError::Ttl(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_is_one_time() {
        let store = MemoryStore::new(TTL);
        let issued = store.issue().unwrap();
        assert_eq!(store.len(), 1);

        assert!(store.verify(Some(&issued.cookie), &issued.state));
        assert!(store.is_empty());
        // Replay.
        assert!(!store.verify(Some(&issued.cookie), &issued.state));
    }

    #[test]
    fn test_memory_store_consumes_on_mismatch() {
        let store = MemoryStore::new(TTL);
        let issued = store.issue().unwrap();

        assert!(!store.verify(Some("other"), &issued.state));
        assert!(!store.verify(Some(&issued.cookie), &issued.state));
    }

    #[test]
    fn test_memory_store_rejects_unknown_and_expired() {
        let store = MemoryStore::new(Duration::ZERO);
        let issued = store.issue().unwrap();

        assert!(!store.verify(Some("unknown"), "unknown"));
        assert!(!store.verify(Some(&issued.cookie), &issued.state));
    }

    #[test]
    fn test_from_config() {
        let mut config = StateConfig::default();
        let store = from_config(&config).unwrap();
        let issued = store.issue().unwrap();
        assert_eq!(issued.cookie, issued.state);

        config.store = StoreKind::Signed;
        let store = from_config(&config).unwrap();
        let issued = store.issue().unwrap();
        assert_ne!(issued.cookie, issued.state);
        assert!(store.verify(Some(&issued.cookie), &issued.state));
    }
}
