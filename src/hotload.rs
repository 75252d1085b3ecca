//! Hotload registry: rewritten identities mapped back to real ones
//!
//! Every hotloaded module gets a [`RewriteRecord`] tying its synthetic name to
//! the identity it declared on disk. Records are created once per successful
//! rewrite+load, never mutated, and never evicted while the process runs;
//! repeated reloads accumulate records by design, because the runtime cannot
//! unload an individual module version. Only the bookkeeping is cleared at
//! shutdown.
//!
//! The registry is read from arbitrary threads (any load can trigger an
//! identity query) and written by loader threads, so the record map is a
//! concurrent map and an insert is atomic from a reader's perspective.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::identity::{ModuleIdentity, ModuleRef};
use crate::{HostError, Result};

/// A compiled module resident in the host runtime.
///
/// The `Arc<LoadedModule>` pointer is the opaque module handle; reverse
/// lookups compare handles by pointer identity.
pub struct LoadedModule {
    /// The compiled wasmer module.
    pub module: wasmer::Module,
    /// The identity the loaded bytes declare. For hotloaded modules this is
    /// the synthetic, rewritten identity.
    pub declared: ModuleIdentity,
    /// Dependency references carried by the module.
    pub refs: Vec<ModuleRef>,
    /// Where the bytes came from, when loaded from disk.
    pub path: Option<PathBuf>,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("declared", &self.declared)
            .field("refs", &self.refs)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Maps a rewritten identity back to the original one, together with the
/// module loaded under it.
pub struct RewriteRecord {
    pub rewritten_name: String,
    pub original: ModuleIdentity,
    pub module: Arc<LoadedModule>,
}

/// Who is asking for a module's identity.
///
/// The registry's own bookkeeping legitimately wants the rewritten name; all
/// other callers must see the original identity. The explicit scope replaces
/// call-stack inspection: only registry-internal helpers pass `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScope {
    /// Registry-internal bookkeeping: answer with the declared (possibly
    /// rewritten) identity.
    Internal,
    /// Any other caller: answer with the original identity.
    External,
}

/// Concurrent registry of rewrite records and of every module the host has
/// loaded, in load order.
#[derive(Default)]
pub struct HotloadRegistry {
    records: DashMap<String, Arc<RewriteRecord>>,
    loaded: RwLock<Vec<Arc<LoadedModule>>>,
}

impl HotloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a rewritten name is already taken.
    pub fn contains(&self, rewritten_name: &str) -> bool {
        self.records.contains_key(rewritten_name)
    }

    /// Record a rewritten load. Fails with `IdentityCollision` if the
    /// synthetic name is already registered; collisions are fatal for the
    /// load attempt and are never retried silently.
    pub fn register(
        &self,
        rewritten_name: String,
        original: ModuleIdentity,
        module: Arc<LoadedModule>,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(rewritten_name.clone()) {
            Entry::Occupied(_) => Err(HostError::IdentityCollision(rewritten_name)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RewriteRecord {
                    rewritten_name,
                    original,
                    module,
                }));
                Ok(())
            }
        }
    }

    /// Track a module in the loaded list (hotloaded or not).
    pub fn track_loaded(&self, module: Arc<LoadedModule>) {
        self.loaded
            .write()
            .expect("loaded module list poisoned")
            .push(module);
    }

    /// Snapshot of every module loaded so far, in load order.
    pub fn loaded_modules(&self) -> Vec<Arc<LoadedModule>> {
        self.loaded
            .read()
            .expect("loaded module list poisoned")
            .clone()
    }

    /// Look up a hotloaded module by its synthetic name.
    pub fn resolve_by_rewritten_name(&self, name: &str) -> Option<Arc<LoadedModule>> {
        self.records.get(name).map(|r| Arc::clone(&r.module))
    }

    /// Reverse lookup: the rewrite record for a loaded handle, if any.
    pub fn record_for(&self, module: &Arc<LoadedModule>) -> Option<Arc<RewriteRecord>> {
        self.records
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.value().module, module))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// The identity of a loaded module, as seen from `scope`.
    ///
    /// External callers of a hotloaded module get the original identity; a
    /// module that was never hotloaded answers with its declared identity
    /// either way.
    pub fn identity_of(&self, module: &Arc<LoadedModule>, scope: IdentityScope) -> ModuleIdentity {
        match scope {
            IdentityScope::Internal => module.declared.clone(),
            IdentityScope::External => self
                .record_for(module)
                .map(|record| record.original.clone())
                .unwrap_or_else(|| module.declared.clone()),
        }
    }

    /// Drop every record pointing at `module`. The module itself stays
    /// resident; only the bookkeeping goes away.
    pub fn forget(&self, module: &Arc<LoadedModule>) {
        self.records
            .retain(|_, record| !Arc::ptr_eq(&record.module, module));
        self.loaded
            .write()
            .expect("loaded module list poisoned")
            .retain(|m| !Arc::ptr_eq(m, module));
    }

    /// Clear all bookkeeping. Intended for shutdown.
    pub fn clear(&self) {
        self.records.clear();
        self.loaded
            .write()
            .expect("loaded module list poisoned")
            .clear();
    }

    /// Number of rewrite records currently held.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
