//! Homogeneous collection of registrants of one kind.
//!
//! A `Registry` owns:
//! - the record of every registered identity (factory + lazily built instance)
//! - the option subtree for its kind (`{ identity: { option: value } }`) while
//!   standalone; once attached, the subtree lives in the registrar's tree
//!
//! Lookups go through [`crate::reference::resolve`], so a registrant type, its
//! identity string and its `kind:identity` compound string all reach the same
//! cached instance.
//!
//! Notes:
//! - `Registry` is a cheap handle; clones share the same tables.
//! - Registration and option merging are meant for the setup phase. Resolution
//!   is safe from any number of concurrent tasks.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::context::RegistrantCtx;
use crate::error::RegistryError;
use crate::options::{self, Options};
use crate::record::Record;
use crate::reference::{resolve, validate_declared, Reference};
use crate::registrant::{Instance, Registrant, RegistrantFactory};
use crate::registrar::{Registrar, RegistrarInner};
use crate::resolver::{ResolutionPath, Resolver, Scope};
use crate::types::{Identity, Kind};

/// Identity -> record map.
type RecordMap = HashMap<Identity, Arc<Record>>;

pub(crate) struct RegistryInner {
    kind: Kind,
    records: RwLock<RecordMap>,
    /// Only used while no registrar is attached.
    options: RwLock<Options>,
    registrar: RwLock<Weak<RegistrarInner>>,
}

/// A resolved instance together with where it came from.
pub(crate) struct Resolution {
    pub(crate) kind: Kind,
    pub(crate) identity: Identity,
    pub(crate) instance: Instance,
}

impl Resolution {
    pub(crate) fn downcast<T: Any + Send + Sync>(self) -> Result<Arc<T>, RegistryError> {
        let Resolution {
            kind,
            identity,
            instance,
        } = self;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                kind,
                identity,
                expected: std::any::type_name::<T>(),
            })
    }
}

/// Registry of registrants sharing one kind.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    #[must_use]
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                kind: kind.into(),
                records: RwLock::new(HashMap::new()),
                options: RwLock::new(Options::new()),
                registrar: RwLock::new(Weak::new()),
            }),
        }
    }

    /// Create a registry pre-seeded with registrants.
    ///
    /// # Errors
    /// Returns the first registration error, see [`Registry::register_factory`].
    pub fn with_registrants(
        kind: impl Into<Kind>,
        factories: impl IntoIterator<Item = RegistrantFactory>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new(kind);
        for factory in factories {
            registry.register_factory(factory)?;
        }
        Ok(registry)
    }

    pub(crate) fn upgrade(weak: &Weak<RegistryInner>) -> Result<Self, RegistryError> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or(RegistryError::ContainerDropped)
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    // ---- registration ----

    /// Register a registrant type. Nothing is instantiated.
    ///
    /// # Errors
    /// See [`Registry::register_factory`].
    pub fn register<T: Registrant>(&self) -> Result<&Self, RegistryError> {
        self.register_factory(RegistrantFactory::of::<T>())
    }

    /// Register a factory under its declared identity.
    ///
    /// # Errors
    /// - [`RegistryError::KindMismatch`] if the factory declares another kind
    /// - [`RegistryError::DuplicateIdentity`] if the identity is taken; the
    ///   existing record is left untouched
    /// - [`RegistryError::InvalidReference`] for an empty identity or one
    ///   containing the kind separator
    pub fn register_factory(&self, factory: RegistrantFactory) -> Result<&Self, RegistryError> {
        validate_declared(factory.kind(), factory.identity())?;

        if factory.kind() != self.kind() {
            return Err(RegistryError::KindMismatch {
                expected: self.kind().clone(),
                found: factory.kind().clone(),
                identity: factory.identity().clone(),
            });
        }

        let identity = factory.identity().clone();
        let mut records = self.inner.records.write();
        if records.contains_key(&identity) {
            return Err(RegistryError::DuplicateIdentity {
                kind: self.kind().clone(),
                identity,
            });
        }

        tracing::debug!(
            kind = %self.inner.kind,
            identity = %identity,
            type_name = factory.type_name(),
            "Registered registrant"
        );
        records.insert(identity, Arc::new(Record::new(factory)));
        Ok(self)
    }

    // ---- options ----

    /// Merge options for this kind (`{ identity: { option: value } }`).
    ///
    /// Read lazily at resolution time, so this may run before or after
    /// `register`. An instance that is already built is not rebuilt. An
    /// attached registry writes into its registrar's options tree.
    pub fn set_options(&self, options: Options) {
        tracing::debug!(
            kind = %self.inner.kind,
            identities = options.len(),
            "Merging registry options"
        );
        if let Some(registrar) = self.registrar() {
            registrar.set_registry_options(self.kind().clone(), options);
        } else {
            options::merge_into(&mut self.inner.options.write(), options);
        }
    }

    /// All options stored for this kind.
    #[must_use]
    pub fn options(&self) -> Options {
        self.registrar().map_or_else(
            || self.inner.options.read().clone(),
            |registrar| registrar.kind_options(self.kind()),
        )
    }

    /// Options scoped to a single registrant (empty when none are configured).
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidReference`] for malformed references or
    /// [`RegistryError::KindMismatch`] if the reference names another kind.
    pub fn registrant_options(
        &self,
        reference: impl Into<Reference>,
    ) -> Result<Options, RegistryError> {
        let identity = self.identity_of(&reference.into())?;
        Ok(self.scoped_options(&identity))
    }

    fn scoped_options(&self, identity: &Identity) -> Options {
        options::scoped(&self.options(), self.inner.kind.as_str(), identity.as_str())
    }

    /// The registrar this registry is attached to, if it is still alive.
    fn registrar(&self) -> Option<Registrar> {
        Registrar::upgrade(&self.inner.registrar.read()).ok()
    }

    // ---- lookup ----

    /// Whether `reference` is registered and enabled. Never instantiates.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidReference`] for malformed references or
    /// [`RegistryError::KindMismatch`] if the reference names another kind.
    pub fn has(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let identity = self.identity_of(&reference.into())?;
        if !self.inner.records.read().contains_key(&identity) {
            return Ok(false);
        }
        Ok(options::is_enabled(&self.scoped_options(&identity)))
    }

    /// Whether `reference` is registered, enabled or not.
    ///
    /// # Errors
    /// Same as [`Registry::has`].
    pub fn is_registered(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let identity = self.identity_of(&reference.into())?;
        Ok(self.inner.records.read().contains_key(&identity))
    }

    /// Whether `reference` has a cached instance.
    ///
    /// # Errors
    /// Same as [`Registry::has`].
    pub fn is_initialized(&self, reference: impl Into<Reference>) -> Result<bool, RegistryError> {
        let identity = self.identity_of(&reference.into())?;
        Ok(self
            .inner
            .records
            .read()
            .get(&identity)
            .is_some_and(|record| record.is_initialized()))
    }

    /// Registered identities, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.inner.records.read().keys().cloned().collect();
        identities.sort();
        identities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Get the instance for `reference`, initializing it on first use.
    ///
    /// # Errors
    /// - [`RegistryError::InvalidReference`] / [`RegistryError::KindMismatch`] for bad references
    /// - [`RegistryError::NotFound`] if nothing is registered under the identity
    /// - [`RegistryError::Disabled`] if its options say `enabled: false`
    /// - [`RegistryError::Initialization`] if `initialize` failed, now or earlier
    /// - [`RegistryError::CircularDependency`] if initialization needs itself,
    ///   directly or through an initialization running in another task
    pub async fn get(&self, reference: impl Into<Reference>) -> Result<Instance, RegistryError> {
        Ok(self
            .resolve_with(&reference.into(), &ResolutionPath::default())
            .await?
            .instance)
    }

    /// Get the instance of registrant type `T`.
    ///
    /// # Errors
    /// Same as [`Registry::get`].
    pub async fn get_typed<T: Registrant>(&self) -> Result<Arc<T>, RegistryError> {
        self.resolve_with(&Reference::of::<T>(), &ResolutionPath::default())
            .await?
            .downcast::<T>()
    }

    /// Get the instance for `reference` and downcast it to `T`.
    ///
    /// # Errors
    /// Same as [`Registry::get`]; [`RegistryError::TypeMismatch`] if the instance is not a `T`.
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
        let kind = self.kind().clone();
        let identity = self.identity_of(reference)?;
        let record = self.record(&identity)?;

        let options = self.scoped_options(&identity);
        if !options::is_enabled(&options) {
            return Err(RegistryError::Disabled { kind, identity });
        }

        if let Some(outcome) = record.settled() {
            return Self::finish(kind, identity, outcome);
        }

        if path.contains(&kind, &identity) {
            return Err(RegistryError::CircularDependency {
                path: path.cycle(&kind, &identity),
            });
        }

        // The edge goes in before the check, so of two callers closing a
        // cycle at the same time at least one sees the other's edge.
        let waiting = if let Some(current) = path.current() {
            let waiting = Record::wait_on(current, &record);
            if let Some(chain) = Record::waits_for(&record, current) {
                tracing::warn!(
                    kind = %kind,
                    identity = %identity,
                    waiter = %current.label(),
                    "Dependency cycle across concurrent initializations"
                );
                return Err(RegistryError::CircularDependency {
                    path: std::iter::once(current)
                        .chain(&chain)
                        .map(|r| r.label())
                        .collect(),
                });
            }
            Some(waiting)
        } else {
            None
        };

        let resolver =
            self.resolver(path.push(kind.clone(), identity.clone(), Arc::clone(&record)));
        let ctx = RegistrantCtx::new(kind.clone(), identity.clone(), options, resolver);
        let outcome = record
            .get_or_init(|| async {
                tracing::debug!(
                    kind = %kind,
                    identity = %identity,
                    depth = path.depth(),
                    "Initializing registrant"
                );
                let result = record.factory().construct(ctx).await;
                match &result {
                    Ok(_) => tracing::info!(kind = %kind, identity = %identity, "Registrant initialized"),
                    Err(e) => tracing::warn!(
                        kind = %kind,
                        identity = %identity,
                        error = %e,
                        "Registrant failed to initialize"
                    ),
                }
                result
            })
            .await;
        drop(waiting);

        Self::finish(kind, identity, outcome)
    }

    fn finish(
        kind: Kind,
        identity: Identity,
        outcome: Result<Instance, crate::error::InitFailure>,
    ) -> Result<Resolution, RegistryError> {
        match outcome {
            Ok(instance) => Ok(Resolution {
                kind,
                identity,
                instance,
            }),
            Err(source) => Err(RegistryError::Initialization {
                kind,
                identity,
                source,
            }),
        }
    }

    fn record(&self, identity: &Identity) -> Result<Arc<Record>, RegistryError> {
        self.inner
            .records
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: self.kind().clone(),
                identity: identity.clone(),
            })
    }

    /// Resolve `reference` to an identity of this registry.
    fn identity_of(&self, reference: &Reference) -> Result<Identity, RegistryError> {
        let resolved = resolve(reference)?;
        match resolved.kind {
            Some(kind) if &kind != self.kind() => Err(RegistryError::KindMismatch {
                expected: self.kind().clone(),
                found: kind,
                identity: resolved.identity,
            }),
            _ => Ok(resolved.identity),
        }
    }

    /// Back-reference for registrants built by this registry: the owning
    /// registrar when attached, the registry itself otherwise.
    fn resolver(&self, path: ResolutionPath) -> Resolver {
        let registrar = self.inner.registrar.read().clone();
        if registrar.strong_count() > 0 {
            Resolver::new(Scope::Registrar(registrar), path)
        } else {
            Resolver::new(Scope::Registry(Arc::downgrade(&self.inner)), path)
        }
    }

    /// Bind this registry to its registrar.
    pub(crate) fn attach(&self, registrar: &Arc<RegistrarInner>) -> Result<(), RegistryError> {
        let mut current = self.inner.registrar.write();
        if let Some(existing) = current.upgrade() {
            if !Arc::ptr_eq(&existing, registrar) {
                return Err(RegistryError::RegistryAttached {
                    kind: self.kind().clone(),
                });
            }
        }
        *current = Arc::downgrade(registrar);
        Ok(())
    }

    /// Hand over the options collected while standalone.
    pub(crate) fn take_options(&self) -> Options {
        std::mem::take(&mut *self.inner.options.write())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.inner.kind)
            .field("identities", &self.identities())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct CacheResource {
        ctx: RegistrantCtx,
    }

    #[async_trait::async_trait]
    impl Registrant for CacheResource {
        fn kind() -> Kind {
            Kind::from("resource")
        }

        async fn initialize(ctx: RegistrantCtx) -> anyhow::Result<Self> {
            Ok(Self { ctx })
        }
    }

    fn options(value: serde_json::Value) -> Options {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn type_and_string_lookups_share_one_instance() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();

        let by_type = registry.get_typed::<CacheResource>().await.unwrap();
        let by_name = registry.get("cache").await.unwrap();
        let by_compound = registry.get("resource:cache").await.unwrap();

        assert!(std::ptr::addr_eq(Arc::as_ptr(&by_type), Arc::as_ptr(&by_name)));
        assert!(Arc::ptr_eq(&by_name, &by_compound));
        assert!(registry.is_initialized("cache").unwrap());
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();

        let err = registry.register::<CacheResource>().unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIdentity { ref identity, .. } if identity == "cache"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn foreign_kind_is_rejected() {
        let registry = Registry::new("service");
        let err = registry.register::<CacheResource>().unwrap_err();
        assert!(matches!(err, RegistryError::KindMismatch { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_declared_identity_is_rejected() {
        let registry = Registry::new("resource");
        let err = registry
            .register_factory(RegistrantFactory::from_fn("resource", "a:b", |_ctx| async {
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn unknown_identity_is_not_found() {
        let registry = Registry::new("resource");
        let err = registry.get("database").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
        assert!(!registry.has("database").unwrap());
    }

    #[tokio::test]
    async fn reference_for_another_kind_is_rejected() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();
        let err = registry.get("service:cache").await.unwrap_err();
        assert!(matches!(err, RegistryError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn options_are_scoped_to_identity() {
        let registry = Registry::with_registrants(
            "resource",
            [
                RegistrantFactory::of::<CacheResource>(),
                RegistrantFactory::from_fn("resource", "logger", |_ctx| async { Ok(()) }),
            ],
        )
        .unwrap();
        registry.set_options(options(json!({
            "cache": { "type": "redis", "ttl": 3600 },
            "logger": { "level": "debug" }
        })));

        let cache = registry.get_typed::<CacheResource>().await.unwrap();
        assert_eq!(
            cache.ctx.options(),
            &options(json!({ "type": "redis", "ttl": 3600 }))
        );
        assert_eq!(
            registry.registrant_options("logger").unwrap(),
            options(json!({ "level": "debug" }))
        );
    }

    #[tokio::test]
    async fn disabled_registrant_is_never_built() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = Registry::new("resource");
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "mailer", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }))
            .unwrap();
        registry.set_options(options(json!({ "mailer": { "enabled": false } })));

        let err = registry.get("mailer").await.unwrap_err();
        assert!(matches!(err, RegistryError::Disabled { .. }));
        assert!(!registry.has("mailer").unwrap());
        assert!(registry.is_registered("mailer").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        registry.set_options(options(json!({ "mailer": { "enabled": true } })));
        registry.get("mailer").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_options_do_not_rebuild_instance() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();
        registry.set_options(options(json!({ "cache": { "ttl": 60 } })));

        let first = registry.get_typed::<CacheResource>().await.unwrap();
        registry.set_options(options(json!({ "cache": { "ttl": 120 } })));
        let second = registry.get_typed::<CacheResource>().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.ctx.options()["ttl"], 60);
        assert_eq!(registry.registrant_options("cache").unwrap()["ttl"], 120);
    }

    #[tokio::test]
    async fn failed_initialization_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = Registry::new("resource");
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "database", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("connection refused")) }
            }))
            .unwrap();

        for _ in 0..3 {
            let err = registry.get("database").await.unwrap_err();
            match err {
                RegistryError::Initialization { source, .. } => {
                    assert_eq!(source.to_string(), "connection refused");
                }
                other => panic!("expected Initialization error, got {other}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_initialized("database").unwrap());
    }

    #[tokio::test]
    async fn wrong_downcast_reports_type_mismatch() {
        let registry = Registry::new("resource");
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "answer", |_ctx| async {
                Ok(42_u32)
            }))
            .unwrap();

        assert_eq!(*registry.get_as::<u32>("answer").await.unwrap(), 42);
        let err = registry.get_as::<String>("answer").await.unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn standalone_registry_resolves_siblings() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "session", |ctx| async move {
                let cache = ctx.get_typed::<CacheResource>().await?;
                Ok(cache)
            }))
            .unwrap();

        let session = registry.get_as::<Arc<CacheResource>>("session").await.unwrap();
        let cache = registry.get_typed::<CacheResource>().await.unwrap();
        assert!(Arc::ptr_eq(&*session, &cache));
    }

    #[tokio::test]
    async fn self_dependency_is_circular() {
        let registry = Registry::new("resource");
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "loop", |ctx| async move {
                ctx.get("loop").await?;
                Ok(())
            }))
            .unwrap();

        let err = registry.get("loop").await.unwrap_err();
        let RegistryError::Initialization { source, .. } = err else {
            panic!("expected Initialization error");
        };
        assert!(source.to_string().contains("circular dependency"));
    }

    #[tokio::test]
    async fn cycle_across_concurrent_lookups_fails_fast() {
        let registry = Registry::new("resource");
        for (identity, other) in [("left", "right"), ("right", "left")] {
            registry
                .register_factory(RegistrantFactory::from_fn("resource", identity, move |ctx| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    ctx.get(other).await?;
                    Ok(())
                }))
                .unwrap();
        }

        let (left, right) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            tokio::join!(registry.get("left"), registry.get("right"))
        })
        .await
        .expect("cycle must not deadlock");

        assert!(matches!(left, Err(RegistryError::Initialization { .. })));
        assert!(matches!(right, Err(RegistryError::Initialization { .. })));
        assert!(!registry.is_initialized("left").unwrap());
        assert!(!registry.is_initialized("right").unwrap());
    }

    #[tokio::test]
    async fn shared_dependency_is_not_a_cycle() {
        let registry = Registry::new("resource");
        registry.register::<CacheResource>().unwrap();
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "slow", |_ctx| async {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                Ok(())
            }))
            .unwrap();
        for identity in ["reader", "writer"] {
            registry
                .register_factory(RegistrantFactory::from_fn("resource", identity, |ctx| async move {
                    ctx.get("slow").await?;
                    ctx.get_typed::<CacheResource>().await?;
                    Ok(())
                }))
                .unwrap();
        }

        let (reader, writer) = tokio::join!(registry.get("reader"), registry.get("writer"));
        reader.unwrap();
        writer.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn initialization_is_logged_once() {
        let registry = Registry::new("resource");
        registry
            .register_factory(RegistrantFactory::from_fn("resource", "metrics", |_ctx| async {
                Ok(())
            }))
            .unwrap();

        registry.get("metrics").await.unwrap();
        registry.get("metrics").await.unwrap();

        assert!(logs_contain("Registrant initialized"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("Registrant initialized"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one initialization log, got {n}")),
            }
        });
    }
}
