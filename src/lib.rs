//! hotmod - a hot-reloading WASM plugin host
//!
//! # Overview
//!
//! hotmod loads compiled WASM modules from disk at runtime and lets the *same
//! logical module* be loaded side by side with its previous versions. Each
//! load rewrites the module's declared identity to a fresh synthetic name, so
//! a newer copy never collides with an already-resident older copy, and a
//! registry maps the synthetic names back to the real ones.
//!
//! # Core Concepts
//!
//! ## Hotloading
//!
//! ```text
//! greeter.wasm (identity "greeter 1.0.0.0")
//!     | rewrite
//!     v
//! "greeter-3fa2c1"  -- loaded by wasmer, registry remembers "greeter"
//! ```
//!
//! A module that asks "who am I" through the registry receives its original
//! identity, not the synthetic one.
//!
//! ## Dependency resolution
//!
//! When instantiation needs a module the host cannot find by declared name,
//! a resolver chain supplies candidates from already-loaded modules and from
//! on-disk library directories. Candidates are ordered by version and the
//! lowest version that still satisfies the requested minimum wins.
//!
//! ## Plugin lifecycle
//!
//! The [`PluginManager`] scans a plugins directory recursively, hotloads every
//! module file, instantiates one container per module exposing exactly one
//! `plugin/<Name>` entry export, and reloads everything when the directory
//! changes on disk.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotmod::{HostConfig, HostContext, PluginManager};
//!
//! let ctx = Arc::new(HostContext::new(HostConfig::default()));
//! let manager = PluginManager::new(ctx);
//! manager.load_plugins().unwrap();
//! for name in manager.plugin_names() {
//!     println!("loaded plugin: {name}");
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod host;
pub mod hotload;
pub mod identity;
pub mod linker;
pub mod manager;
pub mod resolver;
pub mod rewrite;

pub use catalog::{CatalogEntry, LibraryCatalog};
pub use config::HostConfig;
pub use host::HostContext;
pub use hotload::{HotloadRegistry, IdentityScope, LoadedModule};
pub use identity::{ModuleIdentity, ModuleRef, ModuleVersion};
pub use manager::{PluginContainer, PluginManager};
pub use resolver::{DependencyResolver, ModuleResolver};
pub use rewrite::{peek_identity, rewrite, RewriteOutput};

/// Error types for the module host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid module format: {0}")]
    InvalidModuleFormat(String),

    #[error("module load failed for {path}: {reason}")]
    ModuleLoadFailure { path: String, reason: String },

    #[error("rewritten identity '{0}' already registered; refusing to retry")]
    IdentityCollision(String),

    #[error("instantiation error: {0}")]
    Instantiation(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("circular dependency through module '{0}'")]
    CircularDependency(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("watch error: {0}")]
    Watch(String),
}

impl From<toml::de::Error> for HostError {
    fn from(e: toml::de::Error) -> Self {
        HostError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
