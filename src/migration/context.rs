//! Per-execution context handed to migration bodies

use crate::migration::MigrationKey;
use std::sync::{Arc, Mutex, PoisonError};

/// Accumulates log lines while one migration body runs.
///
/// The orchestrator keeps a second handle to the same buffer, so lines written
/// before a timeout or panic still end up in the failure record. The buffer
/// is discarded once the outcome is recorded; only failures persist it.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    key: MigrationKey,
    lines: Arc<Mutex<Vec<String>>>,
}

impl MigrationContext {
    pub(crate) fn new(key: MigrationKey) -> Self {
        Self {
            key,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn key(&self) -> &MigrationKey {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Appends a line to this execution's log.
    ///
    /// ```
    /// # use driftguard::migration::{MigrationContext, MigrationRegistry};
    /// let mut registry = MigrationRegistry::new();
    /// registry.register_default("backfill_slugs", |ctx: &mut MigrationContext| {
    ///     ctx.log(format!("updated {} rows", 42));
    ///     Ok(())
    /// })?;
    /// # Ok::<(), driftguard::migration::MigrationError>(())
    /// ```
    pub fn log(&mut self, line: impl Into<String>) {
        self.push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All lines joined with `\n`.
    pub fn log_string(&self) -> String {
        self.lines().join("\n")
    }

    pub(crate) fn push(&self, line: String) {
        log::debug!(target: "driftguard::migration", "[{}] {}", self.key, line);
        // A body that panicked mid-append still leaves a usable buffer
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}
