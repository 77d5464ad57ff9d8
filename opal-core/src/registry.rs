//! Decorator registry (C4): a concurrent, read-mostly map keyed by decorator path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::descriptor::{Descriptor, RoleSet};

/// One registered decorator: its built descriptor plus whichever role implementations it
/// supplied.
#[derive(Clone)]
pub struct RegistryEntry {
    /// The decorator's validated metadata.
    pub descriptor: Descriptor,
    /// The role implementations this decorator supplied.
    pub roles: RoleSet,
}

/// Concurrent map keyed by decorator path (spec.md §4.4). Read-mostly: `lookup` takes a read
/// lock, `register` takes the write lock. One process-wide instance exists (`global()`), but the
/// constructor is public so tests and the executor façade can inject an isolated instance instead
/// (spec.md §9, "keep the constructor form functional"). `entries` is `Arc`-wrapped so a
/// `Registry` handle can be cloned into a spawned pipeline-stage task (`eval::execute_pipeline`)
/// without cloning the map itself.
#[derive(Clone)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Registry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under its own `path` with the given `roles`. Rejects an empty role
    /// set as an `invariant!` failure — a decorator implementing no role is a decorator-authoring
    /// bug, not a user error (spec.md §4.4: "A decorator implementing none is rejected").
    pub fn register(&self, descriptor: Descriptor, roles: RoleSet) {
        crate::invariant!(
            !roles.is_empty(),
            "decorator {} registered with no roles",
            descriptor.path
        );

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            descriptor.path.clone(),
            RegistryEntry { descriptor, roles },
        );
    }

    /// Looks up the entry registered under `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<RegistryEntry> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(path).cloned()
    }

    /// A snapshot of every registered descriptor, for tooling.
    pub fn export(&self) -> Vec<Descriptor> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.values().map(|e| e.descriptor.clone()).collect()
    }
}

static GLOBAL_REGISTRY: std::sync::OnceLock<Registry> = std::sync::OnceLock::new();

/// The process-wide [`Registry`] instance (one of the three globals named in spec.md §9).
pub fn global() -> &'static Registry {
    GLOBAL_REGISTRY.get_or_init(Registry::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Capabilities, BlockPolicy, DescriptorBuilder, IoCapabilities, Purity, TransportScope};

    fn sample_descriptor(path: &str) -> Descriptor {
        DescriptorBuilder::new(path)
            .summary("test decorator")
            .capabilities(Capabilities {
                transport_scope: TransportScope::Any,
                purity: Purity::Pure,
                idempotent: true,
                block: BlockPolicy::Forbidden,
                io: IoCapabilities::default(),
            })
            .build()
            .expect("valid descriptor")
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = Registry::new();
        registry.register(sample_descriptor("test.echo"), RoleSet::new().with_annotate());

        let entry = registry.lookup("test.echo").expect("registered entry");
        assert_eq!(entry.descriptor.path, "test.echo");
    }

    #[test]
    fn lookup_miss_returns_none() {
        let registry = Registry::new();
        assert!(registry.lookup("nonexistent").is_none());
    }

    #[test]
    fn export_returns_every_descriptor() {
        let registry = Registry::new();
        registry.register(sample_descriptor("a"), RoleSet::new().with_annotate());
        registry.register(sample_descriptor("b"), RoleSet::new().with_annotate());

        let mut paths: Vec<_> = registry.export().into_iter().map(|d| d.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    #[should_panic(expected = "registered with no roles")]
    fn register_with_empty_roles_panics() {
        let registry = Registry::new();
        registry.register(sample_descriptor("test.bad"), RoleSet::new());
    }
}
