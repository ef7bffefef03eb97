//! A single environment variable contract: an explicit value, a fallback to
//! the process environment, and a default, resolved in that order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declares one environment variable a template or step depends on.
///
/// `EnvVar` itself never reads the process environment; callers pass the
/// snapshot to resolve against so the resolution stays a pure function of
/// its inputs (see [`EnvVar::effective_value`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    /// Name of the environment variable. Not serialized as part of the
    /// value itself — callers key this struct by name in a map.
    #[serde(skip)]
    pub name: String,

    #[serde(default, rename = "value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, rename = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub optional: bool,
}

impl EnvVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Resolves the value that should reach the child process: the explicit
    /// `value`, else the process environment looked up by `name`, else
    /// `default_value`, else `None`.
    pub fn effective_value(&self, process_env: &HashMap<String, String>) -> Option<String> {
        self.value
            .clone()
            .or_else(|| process_env.get(&self.name).cloned())
            .or_else(|| self.default_value.clone())
    }

    /// True when this variable has no way to resolve to a value other than
    /// through the process environment at run time, and its absence is not
    /// tolerated.
    pub fn is_required(&self) -> bool {
        !self.optional && self.value.is_none() && self.default_value.is_none()
    }

    /// Fills empty fields (`value`, `default_value`, `description`) from
    /// `other`, leaving any field already set on `self` untouched. `optional`
    /// is left as-is on `self`; only `other.optional` is adopted when `self`
    /// has never been given an explicit value or default (i.e. `self` is a
    /// pure placeholder being filled in from a template).
    pub fn join(&mut self, other: &EnvVar) {
        if self.value.is_none() {
            self.value = other.value.clone();
        }
        if self.default_value.is_none() {
            self.default_value = other.default_value.clone();
        }
        if self.description.is_none() {
            self.description = other.description.clone();
        }
    }
}
