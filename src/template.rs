//! Reusable command prototypes that steps can reference by id.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::env_var::EnvVar;

/// An immutable, registered command prototype.
///
/// Templates are created once (by the loader, from inline `commandTemplates`,
/// or by plugin discovery) and never mutated afterwards; steps resolve
/// against a `&Template` and copy what they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub id: String,

    pub command: String,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_env_map")]
    pub environment: IndexMap<String, EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "useSystemEnvironment")]
    pub use_system_environment: bool,

    /// Name of the plugin (or synthetic pipeline-scoped plugin) this
    /// template was registered under. Not part of the pipeline JSON; set by
    /// the library at registration time.
    #[serde(skip, default = "default_source_plugin")]
    pub source_plugin: String,

    /// Whether this template's id matched the exit-handler naming
    /// convention for its owning plugin. Set by the library at registration
    /// time, never by the pipeline file itself.
    #[serde(skip)]
    pub is_exit_handler: bool,
}

fn default_source_plugin() -> String {
    "inline".to_string()
}

/// Deserializes a `{name -> EnvSpec}` map into `{name -> EnvVar}`, copying
/// the map key into each `EnvVar::name` so later lookups don't need the map
/// alongside the value.
pub(crate) fn deserialize_env_map<'de, D>(deserializer: D) -> Result<IndexMap<String, EnvVar>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, EnvVar> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, mut var)| {
            var.name = name.clone();
            (name, var)
        })
        .collect())
}
