/// Lazily-validated backend handle.
///
/// Every orchestrator calls `ensure_ready()` before touching the network.
/// It validates the stored key with one lightweight models call, and when the
/// key is missing or invalid it loops on the credential-prompt collaborator
/// until the user supplies a key that validates (or gives up). Validation
/// happens once per missing/invalid state — after it succeeds the gate is a
/// cheap flag check.
use anyhow::{Result, anyhow};

use crate::client::ModelApi;

// ── Collaborator traits ───────────────────────────────────────────────────────

/// User-scope credential persistence. The real implementation writes the key
/// back into the config file.
pub trait CredentialStore {
    fn get(&self) -> Option<String>;
    fn set(&mut self, key: &str) -> Result<()>;
}

/// Interactive key entry. `reason` tells the user why they are being asked
/// again (first ask, empty key, failed validation). Returning `None` means
/// the user gave up.
pub trait CredentialPrompt {
    async fn request_key(&mut self, reason: &str) -> Option<String>;
}

/// For flows that must not block on input (single-shot mode with an explicit
/// `--api-key`, tests of the abort path).
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    async fn request_key(&mut self, _reason: &str) -> Option<String> {
        None
    }
}

// ── Prompt reasons ────────────────────────────────────────────────────────────

pub const REASON_MISSING: &str =
    "You have not set your API key yet, please enter your API key to use marginalia.";
pub const REASON_EMPTY: &str = "The API Key can not be empty";
pub const REASON_INVALID: &str = "Your API key is invalid";

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct Backend<A: ModelApi> {
    pub api: A,
    validated: bool,
}

impl<A: ModelApi> Backend<A> {
    pub fn new(api: A) -> Self {
        Self { api, validated: false }
    }

    pub fn is_ready(&self) -> bool {
        self.validated
    }

    /// The single suspension point shared by the ask and edit flows. On
    /// success the api handle carries a validated key. Errors only when the
    /// user declines to supply a key.
    pub async fn ensure_ready(
        &mut self,
        store: &mut impl CredentialStore,
        prompt: &mut impl CredentialPrompt,
    ) -> Result<()> {
        if self.validated {
            return Ok(());
        }

        if !self.api.has_key() {
            if let Some(stored) = store.get() {
                if !stored.is_empty() {
                    self.api.set_key(stored);
                }
            }
        }

        let mut reason = if self.api.has_key() {
            match self.api.list_models().await {
                Ok(_) => {
                    self.validated = true;
                    return Ok(());
                }
                Err(_) => REASON_INVALID,
            }
        } else {
            REASON_MISSING
        };

        loop {
            let Some(candidate) = prompt.request_key(reason).await else {
                return Err(anyhow!("no API key provided"));
            };
            if candidate.is_empty() {
                reason = REASON_EMPTY;
                continue;
            }
            self.api.set_key(candidate.clone());
            match self.api.list_models().await {
                Ok(_) => {
                    store.set(&candidate)?;
                    self.validated = true;
                    return Ok(());
                }
                Err(_) => reason = REASON_INVALID,
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
