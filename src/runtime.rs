//! Seam to the inference runtime
//!
//! The cache only resolves file paths. Loading them is up to a
//! [`ModelRuntime`], and one-time native initialization is tracked by an
//! explicit [`RuntimeState`] value handed to whoever needs it.

use crate::error::{CacheError, Result};
use crate::models::cache::ModelFiles;
use std::path::PathBuf;
use std::sync::Mutex;

/// Options for bringing up the native runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub name: Option<String>,
    /// Shared library to load instead of the default search path
    pub library_path: Option<PathBuf>,
}

/// Tracks whether the native runtime has been initialized
#[derive(Debug, Default)]
pub struct RuntimeState {
    initialized: Mutex<Option<RuntimeOptions>>,
}

impl RuntimeState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `init` once; later calls are no-ops
    ///
    /// Returns `true` when this call performed the initialization. A failed
    /// `init` leaves the state uninitialized so it can be retried.
    pub fn init<F>(&self, options: RuntimeOptions, init: F) -> Result<bool>
    where
        F: FnOnce(&RuntimeOptions) -> Result<()>,
    {
        let mut guard = self
            .initialized
            .lock()
            .map_err(|_| CacheError::Runtime("runtime state lock poisoned".to_string()))?;

        if guard.is_some() {
            tracing::debug!("Runtime already initialized");
            return Ok(false);
        }

        init(&options)?;
        tracing::info!(
            "Runtime initialized ({})",
            options.name.as_deref().unwrap_or("default")
        );
        *guard = Some(options);
        Ok(true)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Options the runtime was initialized with
    #[must_use]
    pub fn options(&self) -> Option<RuntimeOptions> {
        self.initialized.lock().ok().and_then(|guard| guard.clone())
    }
}

/// Inference runtime consuming resolved model and tokenizer paths
pub trait ModelRuntime {
    type Session;

    fn load(&self, files: &ModelFiles) -> Result<Self::Session>;
}
