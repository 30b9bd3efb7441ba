//! Option trees for registries and registrants.
//!
//! Options are nested JSON-compatible maps shaped
//! `{ kind: { identity: { option: value } } }`. Merging is additive per path:
//! an overlay replaces leaves but never drops sibling keys.
//!
//! Trees can be built in code, deserialized, or loaded through Figment from a
//! YAML file layered under `PODLET__`-prefixed environment variables:
//!
//! ```text
//! PODLET__RESOURCE__DATABASE__PORT=6543  ->  { "resource": { "database": { "port": 6543 } } }
//! ```

use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options of a single registrant, or of all registrants of one kind.
pub type Options = serde_json::Map<String, Value>;

/// Environment prefix used by [`OptionsTree::load`].
pub const ENV_PREFIX: &str = "PODLET__";

/// Option key that disables a registrant when set to `false`.
pub const ENABLED_KEY: &str = "enabled";

#[derive(thiserror::Error, Debug)]
pub enum OptionsError {
    #[error("options tree must be an object")]
    NotAnObject,
    #[error("options for kind '{kind}' must be an object")]
    InvalidKind { kind: String },
    #[error("options for '{kind}:{identity}' must be an object")]
    InvalidRegistrant { kind: String, identity: String },
    #[error("no options configured for registrant '{identity}'")]
    MissingOptions { identity: String },
    #[error("invalid options for registrant '{identity}': {source}")]
    InvalidConfig {
        identity: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid option '{key}' for registrant '{identity}': {source}")]
    InvalidOption {
        identity: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load options: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// The full `{ kind: { identity: { option: value } } }` tree.
///
/// Deserializing goes through [`OptionsTree::from_value`], so a malformed tree
/// is rejected the same way however it is read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct OptionsTree(Options);

impl From<OptionsTree> for Value {
    fn from(tree: OptionsTree) -> Self {
        Value::Object(tree.0)
    }
}

impl OptionsTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a JSON value, validating its two object levels.
    ///
    /// # Errors
    /// Returns [`OptionsError`] if the value, a kind entry or a registrant entry
    /// is not an object.
    pub fn from_value(value: Value) -> Result<Self, OptionsError> {
        let Value::Object(root) = value else {
            return Err(OptionsError::NotAnObject);
        };

        for (kind, registrants) in &root {
            let Some(registrants) = registrants.as_object() else {
                return Err(OptionsError::InvalidKind { kind: kind.clone() });
            };
            for (identity, options) in registrants {
                if !options.is_object() {
                    return Err(OptionsError::InvalidRegistrant {
                        kind: kind.clone(),
                        identity: identity.clone(),
                    });
                }
            }
        }

        Ok(Self(root))
    }

    /// Extract a tree from an already-layered Figment.
    ///
    /// # Errors
    /// Returns [`OptionsError::Load`] if extraction fails, or a shape error.
    pub fn from_figment(figment: &Figment) -> Result<Self, OptionsError> {
        let value: Value = figment.extract().map_err(Box::new)?;
        Self::from_value(value)
    }

    /// Load a tree from a YAML file, overridden by `PODLET__`-prefixed
    /// environment variables (`__` separates path segments). A missing file
    /// contributes nothing.
    ///
    /// # Errors
    /// Returns [`OptionsError`] if the sources cannot be parsed or have the
    /// wrong shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let figment = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Overlay `other` onto this tree, leaf by leaf.
    pub fn merge(&mut self, other: OptionsTree) {
        merge_into(&mut self.0, other.0);
    }

    /// Overlay options for a single kind.
    pub fn merge_kind(&mut self, kind: &str, options: Options) {
        let mut overlay = Options::new();
        overlay.insert(kind.to_owned(), Value::Object(options));
        merge_into(&mut self.0, overlay);
    }

    /// Options of every registrant of `kind`.
    #[must_use]
    pub fn kind(&self, kind: &str) -> Option<&Options> {
        self.0.get(kind).and_then(Value::as_object)
    }

    /// Options of a single registrant.
    #[must_use]
    pub fn registrant(&self, kind: &str, identity: &str) -> Option<&Options> {
        self.kind(kind)?.get(identity).and_then(Value::as_object)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_map(&self) -> &Options {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Options {
        self.0
    }
}

impl TryFrom<Value> for OptionsTree {
    type Error = OptionsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Recursively overlay `overlay` onto `target`. Objects merge key by key,
/// everything else replaces.
pub fn merge_into(target: &mut Options, overlay: Options) {
    for (key, value) in overlay {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// A registrant is enabled unless its options say `enabled: false`.
#[must_use]
pub fn is_enabled(options: &Options) -> bool {
    options.get(ENABLED_KEY).and_then(Value::as_bool) != Some(false)
}

/// Slice `identity`'s options out of a kind-level map.
pub(crate) fn scoped(kind_options: &Options, kind: &str, identity: &str) -> Options {
    match kind_options.get(identity) {
        Some(Value::Object(options)) => options.clone(),
        Some(_) => {
            tracing::warn!(
                kind = %kind,
                identity = %identity,
                "Ignoring registrant options that are not an object"
            );
            Options::new()
        }
        None => Options::new(),
    }
}

/// Lenient typed view: empty options deserialize to `T::default()`.
///
/// # Errors
/// Returns [`OptionsError::InvalidConfig`] if options exist but do not fit `T`.
pub fn options_or_default<T: DeserializeOwned + Default>(
    identity: &str,
    options: &Options,
) -> Result<T, OptionsError> {
    if options.is_empty() {
        return Ok(T::default());
    }
    options_required(identity, options)
}

/// Strict typed view: options must be present and valid.
///
/// # Errors
/// Returns [`OptionsError::MissingOptions`] for empty options and
/// [`OptionsError::InvalidConfig`] if they do not fit `T`.
pub fn options_required<T: DeserializeOwned>(
    identity: &str,
    options: &Options,
) -> Result<T, OptionsError> {
    if options.is_empty() {
        return Err(OptionsError::MissingOptions {
            identity: identity.to_owned(),
        });
    }
    serde_json::from_value(Value::Object(options.clone())).map_err(|source| {
        OptionsError::InvalidConfig {
            identity: identity.to_owned(),
            source,
        }
    })
}

/// Read a single typed option, `None` if the key is absent.
///
/// # Errors
/// Returns [`OptionsError::InvalidOption`] if the value does not fit `T`.
pub fn option<T: DeserializeOwned>(
    identity: &str,
    options: &Options,
    key: &str,
) -> Result<Option<T>, OptionsError> {
    options
        .get(key)
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|source| OptionsError::InvalidOption {
                identity: identity.to_owned(),
                key: key.to_owned(),
                source,
            })
        })
        .transpose()
}
