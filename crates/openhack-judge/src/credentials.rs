// Persistent credential store: bearer token and cached judge snapshot.
//
// Mirrors browser localStorage semantics. With no backend every read is
// `None` and every write is skipped; backend failures are logged and treated
// the same way so persistence problems never block a judging session.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::Judge;
use crate::storage::KeyValueStore;

pub const TOKEN_KEY: &str = "auth_token";
pub const JUDGE_DATA_KEY: &str = "judge_data";

#[derive(Clone)]
pub struct CredentialStore {
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("available", &self.is_available())
            .finish()
    }
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A store with no persistence backend.
    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    // -- token --

    pub fn save(&self, token: &str) {
        self.write(TOKEN_KEY, token);
    }

    pub fn load(&self) -> Option<String> {
        self.read(TOKEN_KEY)
    }

    pub fn remove(&self) {
        self.delete(TOKEN_KEY);
    }

    // -- judge snapshot --

    pub fn save_judge(&self, judge: &Judge) {
        match serde_json::to_string(judge) {
            Ok(json) => self.write(JUDGE_DATA_KEY, &json),
            Err(e) => warn!("Failed to serialize judge snapshot: {}", e),
        }
    }

    /// Load the cached judge. A snapshot that does not decode is treated as
    /// absent.
    pub fn load_judge(&self) -> Option<Judge> {
        let raw = self.read(JUDGE_DATA_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(judge) => Some(judge),
            Err(e) => {
                warn!("Ignoring malformed judge snapshot: {}", e);
                None
            }
        }
    }

    pub fn remove_judge(&self) {
        self.delete(JUDGE_DATA_KEY);
    }

    // -- backend access --

    fn read(&self, key: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Credential store read failed: {}", e);
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        let Some(backend) = &self.backend else {
            debug!(key, "No persistence backend; skipping write");
            return;
        };
        if let Err(e) = backend.set(key, value) {
            warn!(key, "Credential store write failed: {}", e);
        }
    }

    fn delete(&self, key: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = backend.remove(key) {
            warn!(key, "Credential store remove failed: {}", e);
        }
    }
}
