use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

use crate::context::RegistrantCtx;
use crate::reference::Descriptor;
use crate::types::{Identity, Kind};

/// A resolved, shared registrant instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A registerable unit with static identity metadata and a one-time setup hook.
///
/// ```ignore
/// struct DatabaseResource { ctx: RegistrantCtx, pool: Pool }
///
/// #[async_trait::async_trait]
/// impl Registrant for DatabaseResource {
///     fn kind() -> Kind { Kind::from(RESOURCE_KIND) }
///
///     async fn initialize(ctx: RegistrantCtx) -> anyhow::Result<Self> {
///         let url: String = ctx.option("url")?.unwrap_or_default();
///         Ok(Self { pool: Pool::connect(&url).await?, ctx })
///     }
/// }
/// ```
#[async_trait]
pub trait Registrant: Sized + Send + Sync + 'static {
    /// Kind of the registry this registrant belongs to.
    fn kind() -> Kind;

    /// Unique name within the registry. Defaults to the `snake_case` type name
    /// without its `_<kind>` suffix.
    fn identity() -> Identity {
        Identity::derive::<Self>(&Self::kind())
    }

    /// Build the instance. Called at most once per registry, on first resolution.
    async fn initialize(ctx: RegistrantCtx) -> anyhow::Result<Self>;
}

type Construct = Arc<dyn Fn(RegistrantCtx) -> BoxFuture<'static, anyhow::Result<Instance>> + Send + Sync>;

/// Constructor paired with the kind and identity it declares.
#[derive(Clone)]
pub struct RegistrantFactory {
    kind: Kind,
    identity: Identity,
    type_name: &'static str,
    construct: Construct,
}

impl RegistrantFactory {
    /// Factory for a [`Registrant`] type.
    #[must_use]
    pub fn of<T: Registrant>() -> Self {
        let descriptor = Descriptor::of::<T>();
        Self {
            kind: descriptor.kind,
            identity: descriptor.identity,
            type_name: descriptor.type_name,
            construct: Arc::new(|ctx| {
                async move {
                    let instance = T::initialize(ctx).await?;
                    Ok(Arc::new(instance) as Instance)
                }
                .boxed()
            }),
        }
    }

    /// Factory from a closure, for registrants that are not backed by their own type.
    pub fn from_fn<T, F, Fut>(kind: impl Into<Kind>, identity: impl Into<Identity>, init: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(RegistrantCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            kind: kind.into(),
            identity: identity.into(),
            type_name: std::any::type_name::<T>(),
            construct: Arc::new(move |ctx| {
                let fut = init(ctx);
                async move { Ok(Arc::new(fut.await?) as Instance) }.boxed()
            }),
        }
    }

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

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn construct(&self, ctx: RegistrantCtx) -> BoxFuture<'static, anyhow::Result<Instance>> {
        (self.construct)(ctx)
    }
}

impl fmt::Debug for RegistrantFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrantFactory")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
