use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::RegistryError;
use crate::options::{self, Options, OptionsError};
use crate::reference::Reference;
use crate::registrant::{Instance, Registrant};
use crate::resolver::Resolver;
use crate::types::{Identity, Kind};

/// Registrant execution context, the single argument of `Registrant::initialize`.
///
/// It provides:
/// - **Identity**: the kind and identity the registrant was registered under
/// - **Options**: the `options[kind][identity]` slice, raw or typed
/// - **Dependencies**: a [`Resolver`] into the owning container
///
/// ```ignore
/// async fn initialize(ctx: RegistrantCtx) -> anyhow::Result<Self> {
///     // 1. Typed options
///     let cfg: ServiceConfig = ctx.config()?;
///
///     // 2. Sibling registrants, possibly of another kind
///     let db = ctx.get_typed::<DatabaseResource>().await?;
///
///     // 3. Keep the context if options or the resolver are needed later
///     Ok(Self { ctx, cfg, db })
/// }
/// ```
///
/// The options slice is captured when resolution starts. Later `set_options`
/// calls do not reach an already-built context.
#[derive(Clone)]
pub struct RegistrantCtx {
    kind: Kind,
    identity: Identity,
    options: Arc<Options>,
    resolver: Resolver,
}

impl RegistrantCtx {
    pub(crate) fn new(kind: Kind, identity: Identity, options: Options, resolver: Resolver) -> Self {
        Self {
            kind,
            identity,
            options: Arc::new(options),
            resolver,
        }
    }

    /// Context not attached to any container. Useful for exercising a
    /// registrant's `initialize` in isolation; every lookup through it fails
    /// with [`RegistryError::ContainerDropped`].
    #[must_use]
    pub fn detached(kind: Kind, identity: Identity, options: Options) -> Self {
        Self::new(kind, identity, options, Resolver::detached())
    }

    // ---- public read-only API for registrants ----

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Options scoped to this registrant.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Read a single typed option.
    ///
    /// # Errors
    /// Returns [`OptionsError::InvalidOption`] if the value does not fit `T`.
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, OptionsError> {
        options::option(self.identity.as_str(), &self.options, key)
    }

    /// Deserialize the options into `T`, or use defaults if none are configured.
    ///
    /// # Errors
    /// Returns [`OptionsError::InvalidConfig`] if options exist but do not fit `T`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, OptionsError> {
        options::options_or_default(self.identity.as_str(), &self.options)
    }

    /// Deserialize the options into `T`, failing if none are configured.
    ///
    /// # Errors
    /// Returns [`OptionsError::MissingOptions`] or [`OptionsError::InvalidConfig`].
    pub fn config_required<T: DeserializeOwned>(&self) -> Result<T, OptionsError> {
        options::options_required(self.identity.as_str(), &self.options)
    }

    /// Shortcut for [`Resolver::get`].
    ///
    /// # Errors
    /// See [`Resolver::get`].
    pub async fn get(&self, reference: impl Into<Reference>) -> Result<Instance, RegistryError> {
        self.resolver.get(reference).await
    }

    /// Shortcut for [`Resolver::get_typed`].
    ///
    /// # Errors
    /// See [`Resolver::get_typed`].
    pub async fn get_typed<T: Registrant>(&self) -> Result<Arc<T>, RegistryError> {
        self.resolver.get_typed::<T>().await
    }

    /// Shortcut for [`Resolver::get_as`].
    ///
    /// # Errors
    /// See [`Resolver::get_as`].
    pub async fn get_as<T: Any + Send + Sync>(
        &self,
        reference: impl Into<Reference>,
    ) -> Result<Arc<T>, RegistryError> {
        self.resolver.get_as::<T>(reference).await
    }

    /// Shortcut for [`Resolver::has`].
    ///
    /// # Errors
    /// See [`Resolver::has`].
    pub fn has(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        self.resolver.has(reference)
    }
}

impl fmt::Debug for RegistrantCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrantCtx")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("options", &self.options)
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize, Default)]
    struct CacheConfig {
        #[serde(default, rename = "type")]
        backend: String,
        #[serde(default)]
        ttl: u64,
    }

    fn ctx(options: serde_json::Value) -> RegistrantCtx {
        RegistrantCtx::detached(
            Kind::from("resource"),
            Identity::from("cache"),
            options.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn exposes_scoped_options() {
        let ctx = ctx(json!({ "type": "redis", "ttl": 3600 }));
        assert_eq!(ctx.kind(), &Kind::from("resource"));
        assert_eq!(ctx.identity(), &Identity::from("cache"));
        assert_eq!(ctx.options()["type"], "redis");
        assert_eq!(ctx.option::<u64>("ttl").unwrap(), Some(3600));
    }

    #[test]
    fn typed_config_lenient_and_strict() {
        let configured = ctx(json!({ "type": "redis", "ttl": 3600 }));
        let cfg: CacheConfig = configured.config().unwrap();
        assert_eq!(
            cfg,
            CacheConfig {
                backend: "redis".to_owned(),
                ttl: 3600
            }
        );

        let empty = ctx(json!({}));
        assert_eq!(empty.config::<CacheConfig>().unwrap(), CacheConfig::default());
        assert!(matches!(
            empty.config_required::<CacheConfig>(),
            Err(OptionsError::MissingOptions { .. })
        ));
    }

    #[test]
    fn invalid_typed_config_is_reported() {
        let bad = ctx(json!({ "ttl": "forever" }));
        let err = bad.config::<CacheConfig>().unwrap_err();
        assert!(matches!(err, OptionsError::InvalidConfig { ref identity, .. } if identity == "cache"));
    }

    #[tokio::test]
    async fn detached_context_cannot_resolve() {
        let ctx = ctx(json!({}));
        assert!(matches!(
            ctx.get("database").await,
            Err(RegistryError::ContainerDropped)
        ));
    }
}
