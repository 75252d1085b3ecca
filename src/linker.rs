//! Import construction for module instantiation
//!
//! Two kinds of imports are linked: the `host` namespace (the host API every
//! module may use) and dependency namespaces. Any other import namespace is
//! treated as a module reference: the namespace is resolved like a failed
//! module lookup (minimum version taken from the consumer's reference table),
//! the dependency is instantiated in the same store, and its exports are
//! registered under the namespace. Dependencies may have dependencies of
//! their own; a cycle fails the load.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::info;
use wasmer::{Function, FunctionEnv, FunctionEnvMut, Imports, Instance, Memory, MemoryView, Store, WasmPtr};

use crate::host::HostContext;
use crate::hotload::{IdentityScope, LoadedModule};
use crate::identity::{ModuleIdentity, ModuleVersion};
use crate::{HostError, Result};

/// Namespace reserved for the host API; never resolved as a dependency.
pub const HOST_NAMESPACE: &str = "host";

/// Upper bound on strings read out of module memory.
const MAX_STRING_LEN: u32 = 65536;

/// Shared state between host functions and the host.
pub struct HostEnv {
    /// Reference to module memory (set after instantiation).
    memory: Arc<RwLock<Option<Memory>>>,
    /// Module name, for log attribution.
    module_name: String,
}

impl HostEnv {
    fn new(module_name: String) -> Self {
        Self {
            memory: Arc::new(RwLock::new(None)),
            module_name,
        }
    }

    fn set_memory(&mut self, memory: Memory) {
        if let Ok(mut mem) = self.memory.write() {
            *mem = Some(memory);
        }
    }
}

/// Read a string from module memory, bounds-checked.
fn read_string(memory: &Memory, store: &wasmer::StoreMut, ptr: u32, len: u32) -> Option<String> {
    if len == 0 {
        return Some(String::new());
    }
    if len > MAX_STRING_LEN {
        return None;
    }

    let view: MemoryView = memory.view(store);
    let mut buffer = vec![0u8; len as usize];

    let wasm_ptr: WasmPtr<u8> = WasmPtr::new(ptr);
    let slice = wasm_ptr.slice(&view, len).ok()?;
    slice.read_slice(&mut buffer).ok()?;

    String::from_utf8(buffer).ok()
}

fn host_log(mut env: FunctionEnvMut<HostEnv>, ptr: u32, len: u32) {
    let (data, store) = env.data_and_store_mut();
    if let Ok(memory_guard) = data.memory.read() {
        if let Some(ref memory) = *memory_guard {
            if let Some(message) = read_string(memory, &store, ptr, len) {
                info!(module = %data.module_name, "{message}");
            }
        }
    }
}

fn host_imports(store: &mut Store, env: &FunctionEnv<HostEnv>) -> Imports {
    let mut imports = Imports::new();
    imports.define(
        HOST_NAMESPACE,
        "log",
        Function::new_typed_with_env(store, env, host_log),
    );
    imports
}

/// Instantiate a loaded module in `store`, resolving and instantiating its
/// dependency namespaces first.
pub fn instantiate(
    ctx: &HostContext,
    module: &Arc<LoadedModule>,
    store: &mut Store,
) -> Result<Instance> {
    let mut chain = Vec::new();
    instantiate_with_deps(ctx, module, store, &mut chain)
}

fn instantiate_with_deps(
    ctx: &HostContext,
    module: &Arc<LoadedModule>,
    store: &mut Store,
    chain: &mut Vec<String>,
) -> Result<Instance> {
    let name = ctx
        .registry()
        .identity_of(module, IdentityScope::External)
        .name;
    if chain.contains(&name) {
        return Err(HostError::CircularDependency(name));
    }
    chain.push(name.clone());

    let env = FunctionEnv::new(store, HostEnv::new(name));
    let mut imports = host_imports(store, &env);

    let mut linked: HashSet<String> = HashSet::new();
    for import in module.module.imports() {
        let namespace = import.module().to_string();
        if namespace == HOST_NAMESPACE || !linked.insert(namespace.clone()) {
            continue;
        }

        let minimum = module
            .refs
            .iter()
            .find(|r| r.name == namespace)
            .map(|r| r.version)
            .unwrap_or(ModuleVersion::ZERO);
        let request = ModuleIdentity::new(namespace.clone(), minimum);

        let dependency = ctx
            .resolve_dependency(&request)
            .ok_or_else(|| HostError::MissingDependency(request.to_string()))?;
        let dep_instance = instantiate_with_deps(ctx, &dependency, store, chain)?;
        for (export_name, ext) in dep_instance.exports.iter() {
            imports.define(&namespace, export_name, ext.clone());
        }
    }

    let instance = Instance::new(store, &module.module, &imports)
        .map_err(|e| HostError::Instantiation(e.to_string()))?;

    if let Ok(memory) = instance.exports.get_memory("memory") {
        env.as_mut(store).set_memory(memory.clone());
    }

    chain.pop();
    Ok(instance)
}
