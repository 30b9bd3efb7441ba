//! Ready-made registrar with a `resource` registry.

use std::ops::Deref;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::options::OptionsTree;
use crate::reference::Reference;
use crate::registrant::{Instance, Registrant, RegistrantFactory};
use crate::registrar::Registrar;
use crate::registry::Registry;

/// Kind of the registry every [`Bootstrap`] starts with.
pub const RESOURCE_KIND: &str = "resource";

/// A [`Registrar`] pre-wired with a `resource` registry, which is also the
/// default kind for bare identities.
///
/// ```ignore
/// let options = OptionsTree::load("config/podlet.yaml")?;
/// let app = Bootstrap::new(
///     [
///         RegistrantFactory::of::<DatabaseResource>(),
///         RegistrantFactory::of::<CacheResource>(),
///     ],
///     options,
/// )?;
///
/// let db = app.resource::<DatabaseResource>().await?;
/// app.register_kind("service")?;
/// app.register::<UserService>()?;
/// ```
#[derive(Clone, Debug)]
pub struct Bootstrap {
    registrar: Registrar,
    resources: Registry,
}

impl Bootstrap {
    /// Register the given resources and apply `options`. Nothing is
    /// instantiated until first use.
    ///
    /// # Errors
    /// Returns the first registration error, e.g.
    /// [`RegistryError::DuplicateIdentity`] or [`RegistryError::KindMismatch`]
    /// for a factory of another kind.
    pub fn new(
        resources: impl IntoIterator<Item = RegistrantFactory>,
        options: OptionsTree,
    ) -> Result<Self, RegistryError> {
        let registrar = Registrar::new();
        let registry = registrar.register_kind(RESOURCE_KIND)?;
        registrar.set_default_kind(RESOURCE_KIND);

        for factory in resources {
            registry.register_factory(factory)?;
        }
        registrar.set_options(options);

        tracing::debug!(
            resources = registry.len(),
            kinds = registrar.options().kinds().count(),
            "Bootstrap ready"
        );

        Ok(Self {
            registrar,
            resources: registry,
        })
    }

    /// Same as `get_registry("resource")?.get(reference)`.
    ///
    /// # Errors
    /// See [`Registry::get`].
    pub async fn get_resource(
        &self,
        reference: impl Into<Reference>,
    ) -> Result<Instance, RegistryError> {
        self.resources.get(reference).await
    }

    /// Typed resource access.
    ///
    /// # Errors
    /// See [`Registry::get_typed`].
    pub async fn resource<T: Registrant>(&self) -> Result<Arc<T>, RegistryError> {
        self.resources.get_typed::<T>().await
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &Registry {
        &self.resources
    }

    #[inline]
    #[must_use]
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    #[must_use]
    pub fn into_registrar(self) -> Registrar {
        self.registrar
    }
}

impl Deref for Bootstrap {
    type Target = Registrar;

    fn deref(&self) -> &Registrar {
        &self.registrar
    }
}
