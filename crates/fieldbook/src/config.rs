//! Engine configuration consumed by the facade at init.

/// Which storage engine `init` should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Relational engine first, KV engine as the fallback.
    #[default]
    Auto,
    /// Relational engine only; init fails if it cannot open.
    Sqlite,
    /// KV engine only; degrades to the unavailable backend if it cannot open.
    Kv,
}

/// Everything the facade needs to assemble a live field store.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the on-device store (one per signed-in profile).
    pub app_data_dir: String,
    /// Base URL of the field API.
    pub api_base_url: String,
    /// Bearer token for the field API, when the operator is signed in.
    pub api_token: Option<String>,
    /// Storage engine preference.
    pub backend: BackendPreference,
}

impl EngineConfig {
    pub fn new(app_data_dir: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            app_data_dir: app_data_dir.into(),
            api_base_url: api_base_url.into(),
            api_token: None,
            backend: BackendPreference::Auto,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }
}
