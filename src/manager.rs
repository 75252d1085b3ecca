//! Plugin lifecycle manager
//!
//! Drives scan -> load -> instantiate -> unload -> reload over the plugin
//! directory. Every module file found is hotloaded (failures are isolated per
//! file; one bad module never blocks the others), and modules exposing
//! exactly one `plugin/<Name>` entry export are instantiated into containers.
//! Modules with zero entries stay resident as libraries for other plugins;
//! modules with several entries are skipped as ambiguous.
//!
//! Reload requests are serialized: a single-slot pending flag coalesces
//! bursts and the state mutex guarantees an in-flight reload finishes before
//! the next one starts. Unload never interleaves with load. The filesystem
//! watcher never reloads directly; plugin containers hold live runtime
//! instances that must stay on the thread owning the manager, so the
//! watcher's delivery thread only forwards a nudge over a channel and the
//! owning thread drives the reload.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};
use wasmer::Store;

use crate::catalog::{module_files, LibraryCatalog};
use crate::host::HostContext;
use crate::hotload::{IdentityScope, LoadedModule};
use crate::identity::ModuleIdentity;
use crate::linker;
use crate::{HostError, Result};

/// Export-name prefix marking a plugin entry point of type `() -> ()`.
pub const PLUGIN_EXPORT_PREFIX: &str = "plugin/";

/// Optional export invoked best-effort when a container is destroyed.
const TEARDOWN_EXPORT: &str = "teardown";

/// Lifecycle phases, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Scanning,
    Loading,
    Instantiated,
    Unloading,
}

/// Wraps exactly one instantiated plugin. The manager is the sole owner; no
/// other component may hold one across a reload boundary.
pub struct PluginContainer {
    name: String,
    module: Arc<LoadedModule>,
    instance: wasmer::Instance,
    store: Store,
}

impl PluginContainer {
    /// The plugin's declared name (the entry-export suffix).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    fn teardown(&mut self) {
        if let Ok(func) = self.instance.exports.get_function(TEARDOWN_EXPORT) {
            if let Err(e) = func.call(&mut self.store, &[]) {
                warn!(plugin = %self.name, error = %e, "teardown failed");
            }
        }
    }
}

/// Introspection snapshot of a loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub identity: ModuleIdentity,
    pub path: Option<PathBuf>,
}

struct ManagerState {
    plugins: Vec<PluginContainer>,
    phase: LifecyclePhase,
}

type LoadedCallback = Box<dyn Fn(&[String]) + Send + Sync>;

/// Drives the plugin lifecycle against one [`HostContext`].
pub struct PluginManager {
    ctx: Arc<HostContext>,
    state: Mutex<ManagerState>,
    reload_pending: AtomicBool,
    callbacks: Mutex<Vec<LoadedCallback>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl PluginManager {
    pub fn new(ctx: Arc<HostContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(ManagerState {
                plugins: Vec::new(),
                phase: LifecyclePhase::Idle,
            }),
            reload_pending: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    /// Register a callback fired after every successful load with the names
    /// of the loaded plugins. Callbacks run while the lifecycle lock is held
    /// and must not call back into the manager.
    pub fn on_plugins_loaded(&self, callback: impl Fn(&[String]) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("callback list poisoned")
            .push(Box::new(callback));
    }

    /// Scan the plugin directory, load every module, and instantiate the
    /// qualifying plugins. Returns the loaded plugin names.
    pub fn load_plugins(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().expect("plugin state poisoned");
        let names = self.load_locked(&mut state);
        self.drain_pending(&mut state);
        Ok(names)
    }

    /// Destroy every container in reverse registration order. The underlying
    /// modules stay resident until process exit.
    pub fn unload_plugins(&self) {
        let mut state = self.state.lock().expect("plugin state poisoned");
        self.unload_locked(&mut state);
        self.drain_pending(&mut state);
    }

    /// Unload and load again. Concurrent requests coalesce: if a reload is
    /// already pending it will cover this request too, and a request made
    /// while one is in flight runs after it rather than interleaving.
    pub fn reload(&self) {
        if self.reload_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().expect("plugin state poisoned");
        self.drain_pending(&mut state);
    }

    fn drain_pending(&self, state: &mut ManagerState) {
        while self.reload_pending.swap(false, Ordering::SeqCst) {
            info!("reloading plugins");
            self.unload_locked(state);
            self.load_locked(state);
        }
    }

    fn load_locked(&self, state: &mut ManagerState) -> Vec<String> {
        let config = self.ctx.config();
        state.phase = LifecyclePhase::Scanning;

        // The catalog is rebuilt wholesale so resolution sees the directory
        // state of this scan, with plugin-provided libraries overriding the
        // shared ones.
        self.ctx.swap_catalog(LibraryCatalog::build(
            &config.libraries_dir,
            &config.plugins_dir,
            &config.module_extension,
        ));

        let mut qualifying: Vec<(Arc<LoadedModule>, String, String)> = Vec::new();
        for path in module_files(&config.plugins_dir, &config.module_extension) {
            let module = match self.ctx.load_module_file(&path) {
                Ok(module) => module,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "could not load module");
                    continue;
                }
            };

            let entries = plugin_entries(&module.module);
            match entries.len() {
                1 => {
                    let (export, name) = entries.into_iter().next().expect("one entry");
                    qualifying.push((module, export, name));
                }
                0 => {
                    debug!(path = %path.display(), "module has no plugin entry; kept as library");
                }
                n => {
                    warn!(
                        path = %path.display(),
                        entries = n,
                        "module exposes multiple plugin entries; skipping as ambiguous"
                    );
                }
            }
        }

        state.phase = LifecyclePhase::Loading;
        for (module, export, name) in qualifying {
            let identity = self
                .ctx
                .registry()
                .identity_of(&module, IdentityScope::External);
            let path = module.path.clone();
            match self.instantiate(&module, &export) {
                Ok((instance, store)) => {
                    info!(
                        plugin = %name,
                        identity = %identity,
                        path = %path.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
                        "loaded plugin"
                    );
                    state.plugins.push(PluginContainer {
                        name,
                        module,
                        instance,
                        store,
                    });
                }
                Err(e) => {
                    error!(plugin = %name, identity = %identity, error = %e, "could not instantiate plugin");
                }
            }
        }

        state.phase = LifecyclePhase::Instantiated;
        let names: Vec<String> = state.plugins.iter().map(|p| p.name.clone()).collect();

        let callbacks = self.callbacks.lock().expect("callback list poisoned");
        for callback in callbacks.iter() {
            callback(&names);
        }
        names
    }

    fn instantiate(
        &self,
        module: &Arc<LoadedModule>,
        entry_export: &str,
    ) -> Result<(wasmer::Instance, Store)> {
        let mut store = Store::new(self.ctx.engine().clone());
        let instance = linker::instantiate(&self.ctx, module, &mut store)?;
        let entry = instance
            .exports
            .get_function(entry_export)
            .map_err(|e| HostError::Instantiation(format!("entry '{entry_export}': {e}")))?
            .clone();
        entry
            .call(&mut store, &[])
            .map_err(|e| HostError::Instantiation(format!("entry '{entry_export}': {e}")))?;
        Ok((instance, store))
    }

    fn unload_locked(&self, state: &mut ManagerState) {
        state.phase = LifecyclePhase::Unloading;
        while let Some(mut container) = state.plugins.pop() {
            debug!(plugin = %container.name, "unloading plugin");
            container.teardown();
        }
        state.phase = LifecyclePhase::Idle;
    }

    /// Watch the plugin directory for any create, modify, remove or rename
    /// under it. Each relevant event sends one nudge over the returned
    /// channel; the caller drains the channel and calls [`reload`] from the
    /// thread that owns the manager. The watcher callback captures nothing
    /// but the channel sender, so no runtime state crosses onto the
    /// watcher's delivery thread. Failure to set up the watcher is surfaced
    /// as an error but is safe to ignore (hot reload simply stays off).
    ///
    /// [`reload`]: Self::reload
    pub fn watch(&self) -> Result<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                debug!(paths = ?event.paths, "plugin directory changed");
                let _ = tx.send(());
            },
            NotifyConfig::default(),
        )
        .map_err(|e| HostError::Watch(e.to_string()))?;

        let plugins_dir = &self.ctx.config().plugins_dir;
        if plugins_dir.exists() {
            watcher
                .watch(plugins_dir, RecursiveMode::Recursive)
                .map_err(|e| HostError::Watch(e.to_string()))?;
        }
        *self.watcher.lock().expect("watcher slot poisoned") = Some(watcher);
        Ok(rx)
    }

    /// Names of the loaded plugins, in registration order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("plugin state poisoned")
            .plugins
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn plugin_count(&self) -> usize {
        self.state
            .lock()
            .expect("plugin state poisoned")
            .plugins
            .len()
    }

    /// Look up a plugin by declared name. Name collisions are not
    /// deduplicated at load time, so the last registration wins here.
    pub fn get_plugin(&self, name: &str) -> Option<PluginInfo> {
        let state = self.state.lock().expect("plugin state poisoned");
        state
            .plugins
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| self.info(p))
    }

    /// Look up the plugin instantiated from a given module handle.
    pub fn get_plugin_for_module(&self, module: &Arc<LoadedModule>) -> Option<PluginInfo> {
        let state = self.state.lock().expect("plugin state poisoned");
        state
            .plugins
            .iter()
            .find(|p| Arc::ptr_eq(&p.module, module))
            .map(|p| self.info(p))
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.lock().expect("plugin state poisoned").phase
    }

    /// Unload everything and clear the registry bookkeeping.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("plugin state poisoned");
        self.unload_locked(&mut state);
        *self.watcher.lock().expect("watcher slot poisoned") = None;
        self.ctx.registry().clear();
    }

    fn info(&self, container: &PluginContainer) -> PluginInfo {
        PluginInfo {
            name: container.name.clone(),
            identity: self
                .ctx
                .registry()
                .identity_of(&container.module, IdentityScope::External),
            path: container.module.path.clone(),
        }
    }
}

/// Qualifying plugin entries of a compiled module: function exports whose
/// name starts with [`PLUGIN_EXPORT_PREFIX`]. Returns `(export_name,
/// declared_plugin_name)` pairs.
fn plugin_entries(module: &wasmer::Module) -> Vec<(String, String)> {
    module
        .exports()
        .filter(|export| matches!(export.ty(), wasmer::ExternType::Function(_)))
        .filter_map(|export| {
            export
                .name()
                .strip_prefix(PLUGIN_EXPORT_PREFIX)
                .filter(|suffix| !suffix.is_empty())
                .map(|suffix| (export.name().to_string(), suffix.to_string()))
        })
        .collect()
}
