//! Kind and identity names.
//!
//! Both are cheap-to-clone `Arc<str>` wrappers. A kind names a registry inside a
//! registrar, an identity names a registrant inside a registry.

use heck::ToSnakeCase;
use std::{borrow::Borrow, fmt, sync::Arc};

/// Separator between kind and identity in a compound reference (`"resource:database"`).
pub const KIND_SEPARATOR: char = ':';

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            #[inline]
            #[must_use]
            pub fn new(name: impl Into<Arc<str>>) -> Self {
                Self(name.into())
            }

            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.into())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name.into())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                &*self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                &*self.0 == *other
            }
        }
    };
}

name_type!(
    /// Category label of a registry (`resource`, `service`, `plugin`, ...).
    Kind
);

name_type!(
    /// Unique name of a registrant within its registry (`database`, `cache`, ...).
    Identity
);

impl Identity {
    /// Derive an identity from the short type name of `T`.
    ///
    /// The name is converted to `snake_case` and a trailing `_<kind>` suffix is
    /// stripped, so `DatabaseResource` of kind `resource` becomes `database`.
    #[must_use]
    pub fn derive<T: ?Sized>(kind: &Kind) -> Self {
        let snake = short_type_name(std::any::type_name::<T>()).to_snake_case();
        let suffix = format!("_{}", kind.as_str().to_snake_case());
        match snake.strip_suffix(&suffix) {
            Some(stripped) if !stripped.is_empty() => Self::from(stripped),
            _ => Self::from(snake),
        }
    }
}

/// `my_crate::db::DatabaseResource<Foo>` -> `DatabaseResource`.
fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct DatabaseResource;
    #[allow(dead_code)]
    struct HTTPClient;
    #[allow(dead_code)]
    struct Resource;
    #[allow(dead_code)]
    struct Wrapper<T>(T);

    #[test]
    fn derive_strips_kind_suffix() {
        let kind = Kind::from("resource");
        assert_eq!(Identity::derive::<DatabaseResource>(&kind), "database");
    }

    #[test]
    fn derive_keeps_name_without_suffix() {
        let kind = Kind::from("resource");
        assert_eq!(Identity::derive::<HTTPClient>(&kind), "http_client");
    }

    #[test]
    fn derive_does_not_strip_to_empty() {
        let kind = Kind::from("resource");
        assert_eq!(Identity::derive::<Resource>(&kind), "resource");
    }

    #[test]
    fn derive_ignores_generic_parameters() {
        let kind = Kind::from("service");
        assert_eq!(
            Identity::derive::<Wrapper<DatabaseResource>>(&kind),
            "wrapper"
        );
    }

    #[test]
    #[allow(clippy::use_debug)]
    fn names_compare_with_str() {
        let id = Identity::new("cache");
        assert_eq!(id, "cache");
        assert_eq!(format!("{id:?}"), "cache");
        assert_eq!(id.to_string(), "cache");
    }
}
