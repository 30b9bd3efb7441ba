//! Back-reference handed to registrants for resolving their dependencies.
//!
//! A [`Resolver`] only exposes lookups (`get`, `get_typed`, `get_as`, `has`). It
//! holds a `Weak` link to the container that created it, so a cached instance
//! keeping its resolver around never keeps the container alive.
//!
//! Every resolver also carries the chain of registrants whose initialization is
//! in progress on its call path. Asking for an uninitialized registrant that is
//! already on that chain fails with [`RegistryError::CircularDependency`]
//! instead of waiting on itself forever. Cycles split across concurrent callers
//! are caught through the waits-for edges kept on each record.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::RegistryError;
use crate::record::Record;
use crate::reference::Reference;
use crate::registrant::{Instance, Registrant};
use crate::registrar::{Registrar, RegistrarInner};
use crate::registry::{Registry, RegistryInner, Resolution};
use crate::types::{Identity, Kind, KIND_SEPARATOR};

/// Registrants being initialized on the current call path, outermost first.
#[derive(Clone, Default)]
pub(crate) struct ResolutionPath {
    chain: Vec<(Kind, Identity)>,
    /// Record of the innermost registrant, whose initializer makes the lookup.
    current: Option<Arc<Record>>,
}

impl ResolutionPath {
    pub(crate) fn contains(&self, kind: &Kind, identity: &Identity) -> bool {
        self.chain.iter().any(|(k, i)| k == kind && i == identity)
    }

    #[must_use]
    pub(crate) fn push(&self, kind: Kind, identity: Identity, record: Arc<Record>) -> Self {
        let mut chain = self.chain.clone();
        chain.push((kind, identity));
        Self {
            chain,
            current: Some(record),
        }
    }

    pub(crate) fn current(&self) -> Option<&Arc<Record>> {
        self.current.as_ref()
    }

    /// Render the cycle closed by `kind:identity`, starting at its first occurrence.
    pub(crate) fn cycle(&self, kind: &Kind, identity: &Identity) -> Vec<String> {
        let start = self
            .chain
            .iter()
            .position(|(k, i)| k == kind && i == identity)
            .unwrap_or(0);
        self.chain[start..]
            .iter()
            .chain(std::iter::once(&(kind.clone(), identity.clone())))
            .map(|(k, i)| format!("{k}{KIND_SEPARATOR}{i}"))
            .collect()
    }

    pub(crate) fn depth(&self) -> usize {
        self.chain.len()
    }
}

impl fmt::Debug for ResolutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.chain.iter().map(|(k, i)| format!("{k}{KIND_SEPARATOR}{i}")))
            .finish()
    }
}

#[derive(Clone)]
pub(crate) enum Scope {
    Registrar(Weak<RegistrarInner>),
    Registry(Weak<RegistryInner>),
    Detached,
}

/// Narrow lookup capability into the owning registrar or registry.
#[derive(Clone)]
pub struct Resolver {
    scope: Scope,
    path: ResolutionPath,
}

impl Resolver {
    pub(crate) fn new(scope: Scope, path: ResolutionPath) -> Self {
        Self { scope, path }
    }

    /// A resolver not connected to any container; every lookup fails.
    pub(crate) fn detached() -> Self {
        Self::new(Scope::Detached, ResolutionPath::default())
    }

    /// Resolve a sibling registrant.
    ///
    /// # Errors
    /// Returns the same errors as [`Registrar::get`], plus
    /// [`RegistryError::ContainerDropped`] if the owning container is gone.
    pub async fn get(&self, reference: impl Into<Reference>) -> Result<Instance, RegistryError> {
        Ok(self.resolve(&reference.into()).await?.instance)
    }

    /// Resolve a sibling registrant by its type.
    ///
    /// # Errors
    /// See [`Resolver::get`].
    pub async fn get_typed<T: Registrant>(&self) -> Result<Arc<T>, RegistryError> {
        self.resolve(&Reference::of::<T>()).await?.downcast::<T>()
    }

    /// Resolve a sibling registrant and downcast it to `T`.
    ///
    /// # Errors
    /// See [`Resolver::get`]; [`RegistryError::TypeMismatch`] if the instance is not a `T`.
    pub async fn get_as<T: Any + Send + Sync>(
        &self,
        reference: impl Into<Reference>,
    ) -> Result<Arc<T>, RegistryError> {
        self.resolve(&reference.into()).await?.downcast::<T>()
    }

    /// Whether a sibling registrant is registered and enabled.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidReference`] for malformed references and
    /// [`RegistryError::ContainerDropped`] if the owning container is gone.
    pub fn has(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let reference = reference.into();
        match &self.scope {
            Scope::Registrar(weak) => Registrar::upgrade(weak)?.has(reference),
            Scope::Registry(weak) => Registry::upgrade(weak)?.has(reference),
            Scope::Detached => Err(RegistryError::ContainerDropped),
        }
    }

    async fn resolve(&self, reference: &Reference) -> Result<Resolution, RegistryError> {
        match &self.scope {
            Scope::Registrar(weak) => {
                let registrar = Registrar::upgrade(weak)?;
                registrar.resolve_with(reference, &self.path).await
            }
            Scope::Registry(weak) => {
                let registry = Registry::upgrade(weak)?;
                registry.resolve_with(reference, &self.path).await
            }
            Scope::Detached => Err(RegistryError::ContainerDropped),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match &self.scope {
            Scope::Registrar(_) => "registrar",
            Scope::Registry(_) => "registry",
            Scope::Detached => "detached",
        };
        f.debug_struct("Resolver")
            .field("scope", &scope)
            .field("path", &self.path)
            .finish()
    }
}
