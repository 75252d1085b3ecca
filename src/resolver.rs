//! Dependency resolution chain
//!
//! Invoked only after the host's primary lookup misses. Candidates come from
//! two sources: modules already resident (matched by their *original*
//! identity, so hotloaded modules answer under their real names) and the
//! on-disk library catalog. The single best candidate across both sources
//! wins: sorted ascending by version, the first candidate at or above the
//! requested minimum. Favoring the lowest sufficient version keeps already
//! resident copies in use instead of pulling newer on-disk duplicates into
//! memory.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::CatalogEntry;
use crate::host::HostContext;
use crate::hotload::{IdentityScope, LoadedModule};
use crate::identity::{ModuleIdentity, ModuleVersion};
use crate::Result;

/// A pre-resolution hook. The host walks its chain in registration order
/// whenever its own lookup fails; returning `Ok(None)` means "no opinion".
pub trait ModuleResolver: Send + Sync {
    fn resolve(
        &self,
        ctx: &HostContext,
        request: &ModuleIdentity,
    ) -> Result<Option<Arc<LoadedModule>>>;
}

enum Candidate {
    Loaded(Arc<LoadedModule>),
    Disk(CatalogEntry),
}

/// Resolves module references from loaded modules and the library catalog.
pub struct DependencyResolver;

impl ModuleResolver for DependencyResolver {
    fn resolve(
        &self,
        ctx: &HostContext,
        request: &ModuleIdentity,
    ) -> Result<Option<Arc<LoadedModule>>> {
        let mut candidates: Vec<(ModuleVersion, Candidate)> = Vec::new();

        // Loaded candidates first: on a version tie the resident copy wins
        // because the sort below is stable.
        for module in ctx.registry().loaded_modules() {
            let identity = ctx.registry().identity_of(&module, IdentityScope::External);
            if identity.name == request.name {
                candidates.push((identity.version, Candidate::Loaded(module)));
            }
        }
        {
            let catalog = ctx.catalog();
            for entry in catalog.candidates(&request.name) {
                candidates.push((entry.identity.version, Candidate::Disk(entry.clone())));
            }
        }

        candidates.sort_by_key(|(version, _)| *version);

        for (version, candidate) in candidates {
            if version < request.version {
                continue;
            }
            return match candidate {
                Candidate::Loaded(module) => {
                    debug!(request = %request, version = %version, "resolved from loaded modules");
                    Ok(Some(module))
                }
                Candidate::Disk(entry) => {
                    info!(
                        name = %entry.identity.name,
                        version = %entry.identity.version,
                        path = %entry.path.display(),
                        "loading library"
                    );
                    ctx.load_module_file(&entry.path).map(Some)
                }
            };
        }

        debug!(request = %request, "no candidate satisfies request");
        Ok(None)
    }
}
