//! Auth token cache: per-host, mutually-exclusive-per-scheme. Entries live
//! for the process lifetime unless a new challenge replaces the scheme.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::auth::challenge::Scheme;

struct Entry {
    scheme: Scheme,
    /// Empty string key for Basic (single token per host); the rendered
    /// scope string for Bearer (one token per distinct scope set).
    tokens: HashMap<String, String>,
}

#[derive(Default)]
pub struct Cache {
    by_host: Mutex<HashMap<String, Entry>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token only if the stored scheme for this host
    /// matches `scheme`.
    pub async fn try_get_token(&self, host: &str, scheme: Scheme, key: &str) -> Option<String> {
        let guard = self.by_host.lock().await;
        let entry = guard.get(host)?;
        if entry.scheme != scheme {
            return None;
        }
        entry.tokens.get(key).cloned()
    }

    /// Set a token for `(host, scheme, key)`. Setting a different scheme
    /// than the one currently stored replaces the entry wholesale; setting
    /// the same scheme updates or inserts the token under `key`.
    pub async fn set_token(&self, host: &str, scheme: Scheme, key: &str, token: String) {
        let mut guard = self.by_host.lock().await;
        let entry = guard.entry(host.to_string()).or_insert_with(|| Entry {
            scheme,
            tokens: HashMap::new(),
        });
        if entry.scheme != scheme {
            *entry = Entry {
                scheme,
                tokens: HashMap::new(),
            };
        }
        entry.tokens.insert(key.to_string(), token);
    }

    pub async fn scheme_for(&self, host: &str) -> Option<Scheme> {
        self.by_host.lock().await.get(host).map(|e| e.scheme)
    }
}
