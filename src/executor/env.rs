//! Composes the environment a resolved step's subprocess actually runs with.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::env_var::EnvVar;

/// Builds the final `name -> value` environment for a subprocess.
///
/// When `use_system_environment` is set, the full process environment is
/// pre-filled first so declared variables can override specific entries
/// without the step having to re-declare everything it wants to pass
/// through. An optional variable with no effective value is omitted; a
/// required one is set to the empty string rather than omitted, matching
/// the source system's behavior (load-time validation is what actually
/// stops a run over a missing required variable, unless the caller opted
/// into `ignoreErrors`).
pub fn effective_env(
    environment: &IndexMap<String, EnvVar>,
    use_system_environment: bool,
    process_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = if use_system_environment {
        process_env.clone()
    } else {
        HashMap::new()
    };

    if let Some(path) = process_env.get("PATH") {
        env.entry("PATH".to_string()).or_insert_with(|| path.clone());
    }

    for var in environment.values() {
        match var.effective_value(process_env) {
            Some(value) => {
                env.insert(var.name.clone(), value);
            }
            None if var.optional => {
                env.remove(&var.name);
            }
            None => {
                env.insert(var.name.clone(), String::new());
            }
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn without_system_environment_only_declared_vars_are_present() {
        let mut environment = IndexMap::new();
        environment.insert(
            "FOO".to_string(),
            EnvVar {
                name: "FOO".into(),
                value: Some("bar".into()),
                ..Default::default()
            },
        );

        let env = effective_env(&environment, false, &process_env(&[("HOME", "/root"), ("PATH", "/bin")]));
        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/bin"));
        assert!(!env.contains_key("HOME"));
    }

    #[test]
    fn with_system_environment_declared_vars_override() {
        let mut environment = IndexMap::new();
        environment.insert(
            "HOME".to_string(),
            EnvVar {
                name: "HOME".into(),
                value: Some("/override".into()),
                ..Default::default()
            },
        );

        let env = effective_env(&environment, true, &process_env(&[("HOME", "/root")]));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/override"));
    }

    #[test]
    fn unresolvable_required_var_becomes_empty_string() {
        let mut environment = IndexMap::new();
        environment.insert("MISSING".to_string(), EnvVar::new("MISSING"));

        let env = effective_env(&environment, false, &process_env(&[]));
        assert_eq!(env.get("MISSING").map(String::as_str), Some(""));
    }

    #[test]
    fn unresolvable_optional_var_is_omitted() {
        let mut environment = IndexMap::new();
        environment.insert(
            "MISSING".to_string(),
            EnvVar {
                optional: true,
                ..EnvVar::new("MISSING")
            },
        );

        let env = effective_env(&environment, false, &process_env(&[]));
        assert!(!env.contains_key("MISSING"));
    }
}
