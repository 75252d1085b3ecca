//! Host context - owns the runtime engine, registry, catalog and resolvers
//!
//! One [`HostContext`] is created at startup and passed to every component
//! that needs it; it replaces ambient global state with an explicit,
//! lifetime-scoped object. All module loading funnels through it so the
//! hotload policy and the registry bookkeeping stay consistent.

use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::{error, info};
use wasmer::{Engine, Module, Store};

use crate::catalog::LibraryCatalog;
use crate::config::HostConfig;
use crate::hotload::{HotloadRegistry, LoadedModule};
use crate::identity::ModuleIdentity;
use crate::resolver::{DependencyResolver, ModuleResolver};
use crate::rewrite;
use crate::{HostError, Result};

/// Process-wide host state: engine, hotload registry, on-disk catalog, and
/// the pre-resolution hook chain.
pub struct HostContext {
    engine: Engine,
    registry: HotloadRegistry,
    catalog: RwLock<LibraryCatalog>,
    resolvers: RwLock<Vec<Box<dyn ModuleResolver>>>,
    config: HostConfig,
}

impl HostContext {
    /// Create a context with the default resolver chain (the dependency
    /// resolver over loaded modules and the library catalog).
    pub fn new(config: HostConfig) -> Self {
        let ctx = Self {
            engine: Engine::default(),
            registry: HotloadRegistry::new(),
            catalog: RwLock::new(LibraryCatalog::new()),
            resolvers: RwLock::new(Vec::new()),
            config,
        };
        ctx.add_resolver(Box::new(DependencyResolver));
        ctx
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &HotloadRegistry {
        &self.registry
    }

    /// Read access to the current library catalog.
    pub fn catalog(&self) -> RwLockReadGuard<'_, LibraryCatalog> {
        self.catalog.read().expect("library catalog poisoned")
    }

    /// Replace the catalog wholesale with a freshly built one.
    pub fn swap_catalog(&self, catalog: LibraryCatalog) {
        *self.catalog.write().expect("library catalog poisoned") = catalog;
    }

    /// Append a resolver to the pre-resolution hook chain.
    pub fn add_resolver(&self, resolver: Box<dyn ModuleResolver>) {
        self.resolvers
            .write()
            .expect("resolver chain poisoned")
            .push(resolver);
    }

    /// Load a module from raw bytes.
    ///
    /// With hotloading enabled the bytes are identity-rewritten first, so the
    /// same logical module can be loaded again later without colliding. With
    /// hotloading disabled the bytes load verbatim under their declared
    /// identity.
    pub fn load_module_bytes(&self, bytes: &[u8], path: Option<&Path>) -> Result<Arc<LoadedModule>> {
        let origin = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());

        if !self.config.hotload {
            let (declared, refs) = rewrite::peek_identity(bytes)?;
            let module = self.compile(bytes, &origin)?;
            let loaded = Arc::new(LoadedModule {
                module,
                declared,
                refs,
                path: path.map(Path::to_path_buf),
            });
            self.registry.track_loaded(Arc::clone(&loaded));
            return Ok(loaded);
        }

        let out = rewrite::rewrite(bytes)?;
        if self.registry.contains(&out.new_name) {
            // A six-hex-char collision points at a broken randomness source;
            // fail the load loudly instead of retrying.
            error!(name = %out.new_name, "rewritten identity collision");
            return Err(HostError::IdentityCollision(out.new_name));
        }

        let module = self.compile(&out.bytes, &origin)?;
        let declared = ModuleIdentity {
            name: out.new_name.clone(),
            ..out.original.clone()
        };
        let loaded = Arc::new(LoadedModule {
            module,
            declared,
            refs: out.refs,
            path: path.map(Path::to_path_buf),
        });
        self.registry
            .register(out.new_name.clone(), out.original.clone(), Arc::clone(&loaded))?;
        self.registry.track_loaded(Arc::clone(&loaded));
        info!(original = %out.original, rewritten = %out.new_name, "hotloaded module");
        Ok(loaded)
    }

    /// Load a module file from disk through the hotload path.
    pub fn load_module_file(&self, path: &Path) -> Result<Arc<LoadedModule>> {
        let bytes = std::fs::read(path).map_err(|e| HostError::ModuleLoadFailure {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.load_module_bytes(&bytes, Some(path))
    }

    fn compile(&self, bytes: &[u8], origin: &str) -> Result<Module> {
        // Modules are engine-scoped; the store here only exists for the
        // compile call and each plugin gets its own store at instantiation.
        let store = Store::new(self.engine.clone());
        Module::new(&store, bytes).map_err(|e| HostError::ModuleLoadFailure {
            path: origin.to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve a module reference the way the host runtime would: first among
    /// loaded modules by declared identity, then through the resolver chain.
    ///
    /// Returns `None` when nothing satisfies the request; the caller is
    /// expected to fail its own load with that miss.
    pub fn resolve_dependency(&self, request: &ModuleIdentity) -> Option<Arc<LoadedModule>> {
        // Primary resolution: a loaded module declaring the requested name.
        // Hotloaded modules declare synthetic names, so plain-name requests
        // fall through to the chain.
        if let Some(found) = self
            .registry
            .loaded_modules()
            .into_iter()
            .find(|m| m.declared.satisfies(request))
        {
            return Some(found);
        }

        let resolvers = self.resolvers.read().expect("resolver chain poisoned");
        for resolver in resolvers.iter() {
            match resolver.resolve(self, request) {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(e) => {
                    error!(request = %request, error = %e, "resolver failed");
                }
            }
        }

        error!(request = %request, "could not find dependency");
        None
    }
}
