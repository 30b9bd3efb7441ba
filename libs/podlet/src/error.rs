use std::sync::Arc;

use crate::types::{Identity, Kind};

/// Shared, cloneable failure source of a registrant's `initialize` hook.
pub type InitFailure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by registries and registrars.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    #[error("registrant '{identity}' is not registered in registry '{kind}'")]
    NotFound { kind: Kind, identity: Identity },

    #[error("no registry registered for kind '{kind}'")]
    RegistryNotFound { kind: Kind },

    #[error("registrant '{identity}' is already registered in registry '{kind}'")]
    DuplicateIdentity { kind: Kind, identity: Identity },

    #[error("a registry for kind '{kind}' is already registered")]
    DuplicateKind { kind: Kind },

    #[error("registry '{kind}' already belongs to another registrar")]
    RegistryAttached { kind: Kind },

    #[error("registrant '{identity}' of kind '{found}' cannot be used with registry '{expected}'")]
    KindMismatch {
        expected: Kind,
        found: Kind,
        identity: Identity,
    },

    #[error("registrant '{identity}' in registry '{kind}' is disabled")]
    Disabled { kind: Kind, identity: Identity },

    #[error("registrant '{identity}' in registry '{kind}' failed to initialize")]
    Initialization {
        kind: Kind,
        identity: Identity,
        #[source]
        source: InitFailure,
    },

    #[error("registrant '{identity}' in registry '{kind}' is not a `{expected}`")]
    TypeMismatch {
        kind: Kind,
        identity: Identity,
        expected: &'static str,
    },

    #[error("identity '{identity}' is ambiguous: registrar has no default kind, use 'kind:{identity}'")]
    AmbiguousReference { identity: Identity },

    #[error("circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("the container owning this resolver has been dropped")]
    ContainerDropped,
}

impl RegistryError {
    /// `true` for both a missing registrant and a missing registry.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::NotFound { .. } | RegistryError::RegistryNotFound { .. }
        )
    }

    pub(crate) fn invalid(reference: impl Into<String>, reason: &'static str) -> Self {
        RegistryError::InvalidReference {
            reference: reference.into(),
            reason,
        }
    }
}
