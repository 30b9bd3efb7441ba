//! Top-level container: one [`Registry`] per kind plus the full options tree.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::RegistryError;
use crate::options::{self, Options, OptionsTree};
use crate::reference::{resolve, resolve_kind, validate_kind, Reference};
use crate::registrant::{Instance, Registrant, RegistrantFactory};
use crate::registry::{Registry, Resolution};
use crate::resolver::ResolutionPath;
use crate::types::Kind;

#[derive(Default)]
pub(crate) struct RegistrarInner {
    registries: RwLock<HashMap<Kind, Registry>>,
    /// Every kind ever configured, including kinds without a registry yet.
    /// Attached registries read and write their options here.
    options: RwLock<OptionsTree>,
    default_kind: RwLock<Option<Kind>>,
}

/// Collection of registries keyed by kind.
///
/// Routes registrations and lookups to the registry of the right kind and
/// holds the options of every attached registry. Registrants built by an attached
/// registry resolve their dependencies through the registrar, so they can
/// reach registrants of any kind.
#[derive(Clone, Default)]
pub struct Registrar {
    inner: Arc<RegistrarInner>,
}

impl Registrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registrar from existing registries and an options tree.
    ///
    /// # Errors
    /// See [`Registrar::register_registry`].
    pub fn from_parts(
        registries: impl IntoIterator<Item = Registry>,
        options: OptionsTree,
    ) -> Result<Self, RegistryError> {
        let registrar = Self::new();
        registrar.set_options(options);
        for registry in registries {
            registrar.register_registry(registry)?;
        }
        Ok(registrar)
    }

    pub(crate) fn upgrade(weak: &Weak<RegistrarInner>) -> Result<Self, RegistryError> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or(RegistryError::ContainerDropped)
    }

    // ---- registries ----

    /// Add a registry. Options the registry collected on its own are merged
    /// into the tree, under any options already configured for its kind.
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateKind`] if a registry of that kind exists
    /// - [`RegistryError::RegistryAttached`] if the registry belongs to another registrar
    /// - [`RegistryError::InvalidReference`] if the kind is not a valid name
    pub fn register_registry(&self, registry: Registry) -> Result<&Self, RegistryError> {
        let kind = registry.kind().clone();
        validate_kind(&kind)?;

        let mut registries = self.inner.registries.write();
        if registries.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind { kind });
        }
        registry.attach(&self.inner)?;

        let mut merged = registry.take_options();
        let mut tree = self.inner.options.write();
        tracing::debug!(
            kind = %kind,
            configured = tree.kind(kind.as_str()).is_some(),
            "Registering registry"
        );
        if let Some(configured) = tree.kind(kind.as_str()) {
            options::merge_into(&mut merged, configured.clone());
        }
        if !merged.is_empty() {
            tree.merge_kind(kind.as_str(), merged);
        }
        drop(tree);

        registries.insert(kind, registry);
        drop(registries);
        Ok(self)
    }

    /// Create, register and return an empty registry for `kind`.
    ///
    /// # Errors
    /// See [`Registrar::register_registry`].
    pub fn register_kind(&self, kind: impl Into<Kind>) -> Result<Registry, RegistryError> {
        let registry = Registry::new(kind);
        self.register_registry(registry.clone())?;
        Ok(registry)
    }

    /// Whether a registry exists for the kind named by `reference`.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidReference`] for malformed references.
    pub fn has_registry(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let kind = resolve_kind(&reference.into())?;
        Ok(self.inner.registries.read().contains_key(&kind))
    }

    /// The registry for the kind named by `reference` (`"resource"`,
    /// `"resource:database"` or a registrant type).
    ///
    /// # Errors
    /// [`RegistryError::InvalidReference`] or [`RegistryError::RegistryNotFound`].
    pub fn get_registry(&self, reference: impl Into<Reference>) -> Result<Registry, RegistryError> {
        let kind = resolve_kind(&reference.into())?;
        self.registry_for(&kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<Kind> {
        let mut kinds: Vec<Kind> = self.inner.registries.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Kind used for bare identities (`"database"`).
    pub fn set_default_kind(&self, kind: impl Into<Kind>) {
        *self.inner.default_kind.write() = Some(kind.into());
    }

    #[must_use]
    pub fn default_kind(&self) -> Option<Kind> {
        self.inner.default_kind.read().clone()
    }

    // ---- registrants ----

    /// Register a registrant type with the registry of its kind.
    ///
    /// # Errors
    /// See [`Registrar::register_factory`].
    pub fn register<T: Registrant>(&self) -> Result<&Self, RegistryError> {
        self.register_factory(RegistrantFactory::of::<T>())
    }

    /// Register a factory with the registry of its kind.
    ///
    /// # Errors
    /// [`RegistryError::RegistryNotFound`] if no registry exists for the kind,
    /// otherwise see [`Registry::register_factory`].
    pub fn register_factory(&self, factory: RegistrantFactory) -> Result<&Self, RegistryError> {
        self.registry_for(factory.kind())?.register_factory(factory)?;
        Ok(self)
    }

    // ---- options ----

    /// Merge a full options tree. Kinds without a registry are kept until one
    /// is registered.
    pub fn set_options(&self, options: OptionsTree) {
        {
            let registries = self.inner.registries.read();
            for kind in options.kinds().filter(|kind| !registries.contains_key(*kind)) {
                tracing::debug!(kind = %kind, "Keeping options for unregistered kind");
            }
        }
        self.inner.options.write().merge(options);
    }

    /// Merge options for a single kind (`{ identity: { option: value } }`).
    pub fn set_registry_options(&self, kind: impl Into<Kind>, options: Options) {
        let kind = kind.into();
        self.inner
            .options
            .write()
            .merge_kind(kind.as_str(), options);
    }

    /// The full options tree, including kinds without a registry.
    #[must_use]
    pub fn options(&self) -> OptionsTree {
        self.inner.options.read().clone()
    }

    /// Options of the registry of the kind named by `reference`.
    ///
    /// # Errors
    /// See [`Registrar::get_registry`].
    pub fn registry_options(&self, reference: impl Into<Reference>) -> Result<Options, RegistryError> {
        Ok(self.get_registry(reference)?.options())
    }

    /// Subtree for `kind`, empty when none is configured.
    pub(crate) fn kind_options(&self, kind: &Kind) -> Options {
        self.inner
            .options
            .read()
            .kind(kind.as_str())
            .cloned()
            .unwrap_or_default()
    }

    // ---- lookup ----

    /// Whether `reference` is registered and enabled. Never instantiates.
    ///
    /// A reference to a kind without a registry is simply absent.
    ///
    /// # Errors
    /// Only for references that cannot name a registrant here:
    /// - [`RegistryError::InvalidReference`] for a malformed reference
    /// - [`RegistryError::AmbiguousReference`] for a bare identity when there
    ///   is no default kind and more than one registry. At the registrar level
    ///   such a reference is malformed, just as an invalid one is; qualify it as
    ///   `kind:identity` or set a default kind.
    pub fn has(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let reference = reference.into();
        match self.route(&reference) {
            Ok(registry) => registry.has(reference),
            Err(RegistryError::RegistryNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get the instance for `reference`, initializing it on first use.
    ///
    /// A bare identity is looked up in the default kind, or in the only
    /// registry when there is exactly one.
    ///
    /// # Errors
    /// - [`RegistryError::RegistryNotFound`] if no registry exists for the kind
    /// - [`RegistryError::AmbiguousReference`] for a bare identity without a default kind
    /// - anything [`Registry::get`] returns
    pub async fn get(&self, reference: impl Into<Reference>) -> Result<Instance, RegistryError> {
        Ok(self
            .resolve_with(&reference.into(), &ResolutionPath::default())
            .await?
            .instance)
    }

    /// Get the instance of registrant type `T`.
    ///
    /// # Errors
    /// See [`Registrar::get`].
    pub async fn get_typed<T: Registrant>(&self) -> Result<Arc<T>, RegistryError> {
        self.resolve_with(&Reference::of::<T>(), &ResolutionPath::default())
            .await?
            .downcast::<T>()
    }

    /// Get the instance for `reference` and downcast it to `T`.
    ///
    /// # Errors
    /// See [`Registrar::get`]; [`RegistryError::TypeMismatch`] if the instance is not a `T`.
    pub async fn get_as<T: Any + Send + Sync>(
        &self,
        reference: impl Into<Reference>,
    ) -> Result<Arc<T>, RegistryError> {
        self.resolve_with(&reference.into(), &ResolutionPath::default())
            .await?
            .downcast::<T>()
    }

    pub(crate) async fn resolve_with(
        &self,
        reference: &Reference,
        path: &ResolutionPath,
    ) -> Result<Resolution, RegistryError> {
        let registry = self.route(reference)?;
        registry.resolve_with(reference, path).await
    }

    /// Pick the registry a reference points into.
    fn route(&self, reference: &Reference) -> Result<Registry, RegistryError> {
        let resolved = resolve(reference)?;
        if let Some(kind) = resolved.kind {
            return self.registry_for(&kind);
        }

        if let Some(kind) = self.default_kind() {
            return self.registry_for(&kind);
        }

        let registries = self.inner.registries.read();
        match registries.values().next() {
            Some(only) if registries.len() == 1 => Ok(only.clone()),
            _ => Err(RegistryError::AmbiguousReference {
                identity: resolved.identity,
            }),
        }
    }

    fn registry_for(&self, kind: &Kind) -> Result<Registry, RegistryError> {
        self.inner
            .registries
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::RegistryNotFound { kind: kind.clone() })
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("kinds", &self.kinds())
            .field("default_kind", &self.default_kind())
            .finish_non_exhaustive()
    }
}
