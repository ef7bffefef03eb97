//! Resolves a step's declared inputs against its precedents' captured outputs.

use std::collections::HashMap;

use crate::step::{InputSpec, Step};

/// A step input that has no bound value, no default, and is not optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub step: String,
    pub input: String,
    pub precedent: String,
    pub output: String,
}

/// Resolves every input declared on `step` against the captured outputs of
/// its precedents, exposed here as `precedent_outputs` keyed by step id.
///
/// Returns the resolved `envVarName -> value` map (keyed by each input's
/// `as`, not its map key) alongside any inputs that could not be resolved
/// and are not optional.
pub fn bind_inputs(
    step: &Step,
    precedent_outputs: &HashMap<String, HashMap<String, String>>,
) -> (HashMap<String, String>, Vec<MissingInput>) {
    let mut bound = HashMap::new();
    let mut missing = Vec::new();

    for (input_name, input) in &step.inputs {
        match resolve_one(input, precedent_outputs) {
            Some(value) => {
                bound.insert(input.as_env.clone(), value);
            }
            None if input.optional => {}
            None => missing.push(MissingInput {
                step: step.id.clone(),
                input: input_name.clone(),
                precedent: input.step_id.clone(),
                output: input.output.clone(),
            }),
        }
    }

    (bound, missing)
}

fn resolve_one(input: &InputSpec, precedent_outputs: &HashMap<String, HashMap<String, String>>) -> Option<String> {
    precedent_outputs
        .get(&input.step_id)
        .and_then(|outputs| outputs.get(&input.output))
        .cloned()
        .or_else(|| input.default_value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn step_with_inputs(inputs: IndexMap<String, InputSpec>) -> Step {
        Step {
            id: "consumer".into(),
            command: Some("echo".into()),
            command_id: None,
            arguments: vec![],
            environment: IndexMap::new(),
            precedents: vec!["producer".into()],
            inputs,
            outputs: IndexMap::new(),
            description: None,
            use_system_environment: false,
            skipped: false,
            status: Default::default(),
            captured_outputs: HashMap::new(),
        }
    }

    #[test]
    fn binds_value_captured_from_precedent_under_its_as_name() {
        let inputs = IndexMap::from([(
            "artifact".to_string(),
            InputSpec {
                as_env: "ARTIFACT_PATH".into(),
                step_id: "producer".into(),
                output: "path".into(),
                optional: false,
                default_value: None,
            },
        )]);
        let step = step_with_inputs(inputs);
        let outputs = HashMap::from([("producer".to_string(), HashMap::from([("path".to_string(), "/tmp/out".to_string())]))]);

        let (bound, missing) = bind_inputs(&step, &outputs);
        assert_eq!(bound.get("ARTIFACT_PATH").map(String::as_str), Some("/tmp/out"));
        assert!(missing.is_empty());
    }

    #[test]
    fn falls_back_to_default_value_then_reports_missing() {
        let inputs = IndexMap::from([(
            "artifact".to_string(),
            InputSpec {
                as_env: "ARTIFACT_PATH".into(),
                step_id: "producer".into(),
                output: "path".into(),
                optional: false,
                default_value: Some("fallback".into()),
            },
        )]);
        let step = step_with_inputs(inputs);

        let (bound, missing) = bind_inputs(&step, &HashMap::new());
        assert_eq!(bound.get("ARTIFACT_PATH").map(String::as_str), Some("fallback"));
        assert!(missing.is_empty());
    }

    #[test]
    fn required_missing_input_is_reported() {
        let inputs = IndexMap::from([(
            "artifact".to_string(),
            InputSpec {
                as_env: "ARTIFACT_PATH".into(),
                step_id: "producer".into(),
                output: "path".into(),
                optional: false,
                default_value: None,
            },
        )]);
        let step = step_with_inputs(inputs);

        let (bound, missing) = bind_inputs(&step, &HashMap::new());
        assert!(bound.is_empty());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].input, "artifact");
    }

    #[test]
    fn optional_missing_input_is_silently_omitted() {
        let inputs = IndexMap::from([(
            "artifact".to_string(),
            InputSpec {
                as_env: "ARTIFACT_PATH".into(),
                step_id: "producer".into(),
                output: "path".into(),
                optional: true,
                default_value: None,
            },
        )]);
        let step = step_with_inputs(inputs);

        let (bound, missing) = bind_inputs(&step, &HashMap::new());
        assert!(bound.is_empty());
        assert!(missing.is_empty());
    }
}
