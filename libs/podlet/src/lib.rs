//! Layered registry of lazily-initialized singletons.
//!
//! Three layers:
//! - [`Registrant`]: a type with a static kind and identity and an async
//!   `initialize(ctx)` hook
//! - [`Registry`]: every registrant of one kind, each built once on first use
//! - [`Registrar`]: one registry per kind plus the full options tree
//!
//! [`Bootstrap`] is a registrar that starts with a `resource` registry.
//!
//! Options follow the `{ kind: { identity: { option: value } } }` shape and
//! reach a registrant through its [`RegistrantCtx`]. Setting
//! `enabled: false` for an identity disables it.
//!
//! ```ignore
//! use podlet::{Bootstrap, OptionsTree, RegistrantFactory};
//!
//! let app = Bootstrap::new(
//!     [RegistrantFactory::of::<DatabaseResource>()],
//!     OptionsTree::from_value(serde_json::json!({
//!         "resource": { "database": { "host": "localhost", "port": 5432 } }
//!     }))?,
//! )?;
//!
//! let db = app.resource::<DatabaseResource>().await?;
//! let same = app.get("database").await?;
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod bootstrap;
pub mod context;
pub mod error;
pub mod options;
mod record;
pub mod reference;
pub mod registrant;
pub mod registrar;
pub mod registry;
pub mod resolver;
pub mod types;

pub use bootstrap::{Bootstrap, RESOURCE_KIND};
pub use context::RegistrantCtx;
pub use error::{InitFailure, RegistryError};
pub use options::{Options, OptionsError, OptionsTree};
pub use reference::{resolve, resolve_kind, Descriptor, Reference, Resolved};
pub use registrant::{Instance, Registrant, RegistrantFactory};
pub use registrar::Registrar;
pub use registry::Registry;
pub use resolver::Resolver;
pub use types::{Identity, Kind, KIND_SEPARATOR};

// Re-export for `#[async_trait] impl Registrant for ...` in downstream crates
pub use async_trait::async_trait;
