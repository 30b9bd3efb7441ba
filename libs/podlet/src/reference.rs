//! References and their resolution into kinds and identities.
//!
//! A lookup may name a registrant by string (`"database"`), by compound string
//! (`"resource:database"`) or by its Rust type. [`resolve`] turns all three into
//! the same canonical identity without instantiating anything.

use std::any::TypeId;
use std::fmt;

use crate::error::RegistryError;
use crate::registrant::Registrant;
use crate::types::{Identity, Kind, KIND_SEPARATOR};

/// Static metadata of a registrant type.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: Kind,
    pub identity: Identity,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl Descriptor {
    #[must_use]
    pub fn of<T: Registrant>() -> Self {
        Self {
            kind: T::kind(),
            identity: T::identity(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A lookup reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    /// Raw string, either a bare identity or `kind:identity`.
    Identity(String),
    /// Explicit kind and identity.
    Qualified { kind: Kind, identity: Identity },
    /// A registrant type.
    ByType(Descriptor),
}

impl Reference {
    #[must_use]
    pub fn of<T: Registrant>() -> Self {
        Reference::ByType(Descriptor::of::<T>())
    }

    #[must_use]
    pub fn qualified(kind: impl Into<Kind>, identity: impl Into<Identity>) -> Self {
        Reference::Qualified {
            kind: kind.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Identity(raw) => f.write_str(raw),
            Reference::Qualified { kind, identity } => {
                write!(f, "{kind}{KIND_SEPARATOR}{identity}")
            }
            Reference::ByType(d) => f.write_str(d.type_name),
        }
    }
}

impl From<&str> for Reference {
    fn from(raw: &str) -> Self {
        Reference::Identity(raw.to_owned())
    }
}

impl From<String> for Reference {
    fn from(raw: String) -> Self {
        Reference::Identity(raw)
    }
}

impl From<&String> for Reference {
    fn from(raw: &String) -> Self {
        Reference::Identity(raw.clone())
    }
}

impl From<Identity> for Reference {
    fn from(identity: Identity) -> Self {
        Reference::Identity(identity.as_str().to_owned())
    }
}

impl From<&Identity> for Reference {
    fn from(identity: &Identity) -> Self {
        Reference::Identity(identity.as_str().to_owned())
    }
}

impl From<&Kind> for Reference {
    fn from(kind: &Kind) -> Self {
        Reference::Identity(kind.as_str().to_owned())
    }
}

impl From<Descriptor> for Reference {
    fn from(descriptor: Descriptor) -> Self {
        Reference::ByType(descriptor)
    }
}

/// Canonical form of a reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// Present when the reference carried a kind (compound string or type).
    pub kind: Option<Kind>,
    pub identity: Identity,
}

/// Normalize a reference into its identity and, when present, its kind.
///
/// # Errors
/// Returns [`RegistryError::InvalidReference`] for empty names, empty halves
/// of a compound string, or more than one separator.
pub fn resolve(reference: &Reference) -> Result<Resolved, RegistryError> {
    match reference {
        Reference::Identity(raw) => parse(raw),
        Reference::Qualified { kind, identity } => {
            validate_name(kind.as_str(), reference)?;
            validate_name(identity.as_str(), reference)?;
            Ok(Resolved {
                kind: Some(kind.clone()),
                identity: identity.clone(),
            })
        }
        Reference::ByType(d) => Ok(Resolved {
            kind: Some(d.kind.clone()),
            identity: d.identity.clone(),
        }),
    }
}

/// Resolve a reference as a kind: a bare string *is* a kind, compound and
/// typed references contribute their kind part.
///
/// # Errors
/// Returns [`RegistryError::InvalidReference`] when the reference is malformed.
pub fn resolve_kind(reference: &Reference) -> Result<Kind, RegistryError> {
    match reference {
        Reference::Identity(raw) if !raw.contains(KIND_SEPARATOR) => {
            validate_name(raw, reference)?;
            Ok(Kind::from(raw.as_str()))
        }
        other => {
            let resolved = resolve(other)?;
            resolved
                .kind
                .ok_or_else(|| RegistryError::invalid(other.to_string(), "reference carries no kind"))
        }
    }
}

fn parse(raw: &str) -> Result<Resolved, RegistryError> {
    if raw.trim().is_empty() {
        return Err(RegistryError::invalid(raw, "reference is empty"));
    }

    let mut parts = raw.split(KIND_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(identity), None, _) => Ok(Resolved {
            kind: None,
            identity: Identity::from(identity),
        }),
        (Some(kind), Some(identity), None) => {
            if kind.trim().is_empty() {
                return Err(RegistryError::invalid(raw, "kind part is empty"));
            }
            if identity.trim().is_empty() {
                return Err(RegistryError::invalid(raw, "identity part is empty"));
            }
            Ok(Resolved {
                kind: Some(Kind::from(kind)),
                identity: Identity::from(identity),
            })
        }
        _ => Err(RegistryError::invalid(raw, "more than one kind separator")),
    }
}

fn validate_name(name: &str, reference: &Reference) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::invalid(reference.to_string(), "name is empty"));
    }
    if name.contains(KIND_SEPARATOR) {
        return Err(RegistryError::invalid(
            reference.to_string(),
            "name contains the kind separator",
        ));
    }
    Ok(())
}

/// Check a registry kind before it is stored.
pub(crate) fn validate_kind(kind: &Kind) -> Result<(), RegistryError> {
    validate_name(kind.as_str(), &Reference::Identity(kind.to_string()))
}

/// Check a declared kind or identity before it is stored.
pub(crate) fn validate_declared(kind: &Kind, identity: &Identity) -> Result<(), RegistryError> {
    let reference = Reference::qualified(kind.clone(), identity.clone());
    validate_name(kind.as_str(), &reference)?;
    validate_name(identity.as_str(), &reference)
}
