//! Migration registry
//!
//! Applications build one [`MigrationRegistry`] at startup, register every
//! migration in the order it must run, and hand the registry to a
//! [`MigrationManager`](crate::migration::MigrationManager). Nothing here is
//! global: tests can build as many independent registries as they like.

use crate::migration::state_table::MAX_KEY_PART_LEN;
use crate::migration::{MigrationContext, MigrationError, MigrationKey};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Namespace used by [`MigrationRegistry::register_default`].
pub const DEFAULT_NAMESPACE: &str = "app";

/// Error type migration bodies return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A registered migration body.
///
/// Bodies run on a watchdog thread when a deadline is configured, hence the
/// `Send + Sync + 'static` bounds.
pub type MigrationFn = Arc<dyn Fn(&mut MigrationContext) -> Result<(), BoxError> + Send + Sync>;

/// An idempotent schema synchronisation step (e.g. `CREATE TABLE IF NOT EXISTS`).
pub type SchemaSyncFn = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// One registered migration.
#[derive(Clone)]
pub struct MigrationItem {
    key: MigrationKey,
    func: MigrationFn,
}

impl MigrationItem {
    pub fn key(&self) -> &MigrationKey {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub(crate) fn func(&self) -> MigrationFn {
        Arc::clone(&self.func)
    }
}

impl fmt::Debug for MigrationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationItem").field("key", &self.key).finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub(crate) struct SchemaSync {
    pub(crate) name: String,
    pub(crate) func: SchemaSyncFn,
}

/// Ordered collection of migrations.
///
/// Order of registration is order of execution. `(namespace, name)` must be
/// unique; a second registration of the same key is a configuration error.
#[derive(Clone)]
pub struct MigrationRegistry {
    default_namespace: String,
    items: Vec<MigrationItem>,
    keys: HashSet<MigrationKey>,
    schema_syncs: Vec<SchemaSync>,
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("default_namespace", &self.default_namespace)
            .field("items", &self.items)
            .field("schema_syncs", &self.schema_syncs.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            items: Vec::new(),
            keys: HashSet::new(),
            schema_syncs: Vec::new(),
        }
    }

    /// Changes the namespace used by [`register_default`](Self::register_default).
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidMigration` if the namespace is empty or contains `:`.
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Result<Self, MigrationError> {
        let namespace = namespace.into();
        validate_namespace(&namespace, "<default>")?;
        self.default_namespace = namespace;
        Ok(self)
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Appends a migration to the sequence.
    ///
    /// # Errors
    ///
    /// - `MigrationError::DuplicateMigration` if `(namespace, name)` is already registered
    /// - `MigrationError::InvalidMigration` if either part is empty or longer than the
    ///   log table's 120-character columns, or the namespace contains `:`
    ///
    /// # Example
    ///
    /// ```
    /// use driftguard::migration::MigrationRegistry;
    ///
    /// let mut registry = MigrationRegistry::new();
    /// registry
    ///     .register("billing", "add_invoice_index", |ctx| {
    ///         ctx.log("creating idx_invoices_customer");
    ///         Ok(())
    ///     })?
    ///     .register("billing", "backfill_currency", |_| Ok(()))?;
    ///
    /// assert_eq!(registry.len(), 2);
    /// # Ok::<(), driftguard::migration::MigrationError>(())
    /// ```
    pub fn register<F>(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        func: F,
    ) -> Result<&mut Self, MigrationError>
    where
        F: Fn(&mut MigrationContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let key = MigrationKey::new(namespace, name);
        validate_namespace(&key.namespace, &key.name)?;
        let reason = if key.name.trim().is_empty() {
            Some("name must not be empty")
        } else if too_long(&key.name) {
            Some("name exceeds 120 characters")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(MigrationError::InvalidMigration {
                namespace: key.namespace,
                name: key.name,
                reason: reason.to_string(),
            });
        }
        if self.keys.contains(&key) {
            return Err(MigrationError::DuplicateMigration { key: key.to_string() });
        }

        log::debug!("registered migration {}", key);
        self.keys.insert(key.clone());
        self.items.push(MigrationItem {
            key,
            func: Arc::new(func),
        });
        Ok(self)
    }

    /// [`register`](Self::register) in the default namespace.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_default<F>(&mut self, name: impl Into<String>, func: F) -> Result<&mut Self, MigrationError>
    where
        F: Fn(&mut MigrationContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let namespace = self.default_namespace.clone();
        self.register(namespace, name, func)
    }

    /// Registers an idempotent schema synchronisation step.
    ///
    /// These run on every orchestration run, after the lock is taken and
    /// before history is read, and leave no audit records. Use them for
    /// statements that are safe to repeat; anything that must happen exactly
    /// once belongs in [`register`](Self::register).
    pub fn register_schema_sync<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.schema_syncs.push(SchemaSync {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    /// Registered migrations, in registration order.
    pub fn items(&self) -> &[MigrationItem] {
        &self.items
    }

    pub(crate) fn schema_syncs(&self) -> &[SchemaSync] {
        &self.schema_syncs
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.keys.contains(key)
    }

    /// Distinct namespaces in order of first appearance.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .map(MigrationItem::namespace)
            .filter(|ns| seen.insert(*ns))
            .collect()
    }
}

// A part that cannot be stored would run on every startup without ever being recorded
fn too_long(part: &str) -> bool {
    part.chars().count() > MAX_KEY_PART_LEN as usize
}

fn validate_namespace(namespace: &str, name: &str) -> Result<(), MigrationError> {
    let reason = if namespace.trim().is_empty() {
        "namespace must not be empty"
    } else if namespace.contains(':') {
        "namespace must not contain ':'"
    } else if too_long(namespace) {
        "namespace exceeds 120 characters"
    } else {
        return Ok(());
    };
    Err(MigrationError::InvalidMigration {
        namespace: namespace.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut MigrationContext) -> Result<(), BoxError> {
        Ok(())
    }

    #[test]
    fn test_preserves_registration_order() {
        let mut registry = MigrationRegistry::new();
        registry
            .register("b", "first", noop)
            .unwrap()
            .register("a", "second", noop)
            .unwrap()
            .register("b", "third", noop)
            .unwrap();

        let names: Vec<_> = registry.items().iter().map(|i| i.key().to_string()).collect();
        assert_eq!(names, vec!["b:first", "a:second", "b:third"]);
        assert_eq!(registry.namespaces(), vec!["b", "a"]);
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let mut registry = MigrationRegistry::new();
        registry.register("app", "seed", noop).unwrap();

        let err = registry.register("app", "seed", noop).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration { ref key } if key == "app:seed"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_name_different_namespace_is_allowed() {
        let mut registry = MigrationRegistry::new();
        registry.register("tenantX", "m1", noop).unwrap();
        registry.register("tenantY", "m1", noop).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rejects_invalid_identity() {
        let mut registry = MigrationRegistry::new();
        assert!(matches!(
            registry.register("", "m1", noop),
            Err(MigrationError::InvalidMigration { .. })
        ));
        assert!(matches!(
            registry.register("a:b", "m1", noop),
            Err(MigrationError::InvalidMigration { .. })
        ));
        assert!(matches!(
            registry.register("app", "  ", noop),
            Err(MigrationError::InvalidMigration { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_parts_wider_than_log_columns() {
        let mut registry = MigrationRegistry::new();
        let at_limit = "n".repeat(120);
        let over_limit = "n".repeat(121);

        registry.register(at_limit.as_str(), at_limit.as_str(), noop).unwrap();
        assert!(matches!(
            registry.register("app", over_limit.as_str(), noop),
            Err(MigrationError::InvalidMigration { ref reason, .. }) if reason.contains("120")
        ));
        assert!(matches!(
            registry.register(over_limit.as_str(), "m1", noop),
            Err(MigrationError::InvalidMigration { .. })
        ));
        // width is counted in characters, like VARCHAR
        registry.register("app", "é".repeat(120), noop).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_default_uses_default_namespace() {
        let mut registry = MigrationRegistry::new();
        registry.register_default("seed", noop).unwrap();
        assert!(registry.contains(&MigrationKey::new("app", "seed")));

        let mut custom = MigrationRegistry::new().with_default_namespace("core").unwrap();
        custom.register_default("seed", noop).unwrap();
        assert!(custom.contains(&MigrationKey::new("core", "seed")));

        assert!(MigrationRegistry::new().with_default_namespace("bad:ns").is_err());
    }

    #[test]
    fn test_schema_syncs_are_kept_separately() {
        let mut registry = MigrationRegistry::new();
        registry.register_schema_sync("users_table", || Ok(()));
        assert!(registry.is_empty());
        assert_eq!(registry.schema_syncs().len(), 1);
        assert_eq!(registry.schema_syncs()[0].name, "users_table");
    }
}
