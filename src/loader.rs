//! Parses and validates a pipeline JSON file into a runnable [`Pipeline`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{MissingEnvDetail, OrchestratorError};
use crate::library::Library;
use crate::step::{check_command_shape, ResolvedStep, Step};
use crate::template::Template;

/// The raw, on-disk shape of a pipeline file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineFile {
    #[serde(default)]
    name: Option<String>,

    #[serde(default, rename = "commandTemplates")]
    command_templates: Vec<Template>,

    steps: Vec<Step>,
}

/// A fully loaded, validated pipeline: every step's template reference is
/// resolved, every precedent id exists, and the dependency graph is
/// acyclic.
#[derive(Debug)]
pub struct Pipeline {
    pub name: Option<String>,
    pub steps: IndexMap<String, Step>,
    pub resolved: HashMap<String, ResolvedStep>,
}

impl Pipeline {
    /// Topological layers of step ids: each inner `Vec` is a set of steps
    /// whose precedents all appear in an earlier layer, so every step in a
    /// layer is safe to schedule concurrently.
    pub fn topological_layers(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            self.steps.keys().map(|id| (id.as_str(), 0usize)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for step in self.steps.values() {
            *in_degree.get_mut(step.id.as_str()).expect("step id present") += step.precedents.len();
            for precedent in &step.precedents {
                dependents.entry(precedent.as_str()).or_default().push(step.id.as_str());
            }
        }

        let mut frontier: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut layers = Vec::new();

        while !frontier.is_empty() {
            let layer: Vec<String> = frontier.iter().map(|id| id.to_string()).collect();
            let mut next_frontier = VecDeque::new();
            for id in frontier {
                for dependent in dependents.get(id).into_iter().flatten() {
                    let degree = in_degree.get_mut(dependent).expect("dependent tracked");
                    *degree -= 1;
                    if *degree == 0 {
                        next_frontier.push_back(*dependent);
                    }
                }
            }
            layers.push(layer);
            frontier = next_frontier;
        }

        layers
    }
}

/// Options governing one [`load_pipeline_file`] call.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Step ids to mark `skipped` at load time, as if `"skipped": true` had
    /// been set on them directly.
    pub skipped_steps: Vec<String>,

    /// When set, a missing required environment variable does not fail the
    /// load; it is left for `effectiveEnv()` to substitute an empty string
    /// for at run time.
    pub ignore_errors: bool,

    /// When set, the required-environment check is skipped entirely: the
    /// caller only wants to enumerate every referenced variable (see
    /// `Orchestrator::display_environment`), not run anything.
    pub env_display: bool,
}

/// Loads and validates the pipeline file at `path`, registering any inline
/// `commandTemplates` into a synthetic pipeline-scoped plugin named
/// `"inline"` on `library` before resolving steps against it.
pub fn load_pipeline_file(path: &Path, library: &mut Library, options: &LoadOptions) -> Result<Pipeline, OrchestratorError> {
    let contents = std::fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_pipeline_str(&contents, path.display().to_string(), library, options)
}

fn load_pipeline_str(contents: &str, path_label: String, library: &mut Library, options: &LoadOptions) -> Result<Pipeline, OrchestratorError> {
    let file: PipelineFile = serde_json::from_str(contents).map_err(|source| OrchestratorError::SchemaInvalid {
        path: path_label,
        source,
    })?;

    let mut seen_template_ids = HashSet::new();
    for mut template in file.command_templates {
        if !seen_template_ids.insert(template.id.clone()) {
            return Err(OrchestratorError::DuplicateId {
                kind: "template",
                id: template.id,
            });
        }
        template.source_plugin = "inline".to_string();
        library.add_template(template, true);
    }

    let skipped_steps: HashSet<&str> = options.skipped_steps.iter().map(String::as_str).collect();
    let mut steps = IndexMap::new();
    for mut step in file.steps {
        if steps.contains_key(&step.id) {
            return Err(OrchestratorError::DuplicateId {
                kind: "step",
                id: step.id,
            });
        }
        check_command_shape(&step)?;
        if skipped_steps.contains(step.id.as_str()) {
            step.skipped = true;
        }
        steps.insert(step.id.clone(), step);
    }

    check_precedents_exist(&steps)?;
    check_inputs_bind_to_declared_precedents_and_outputs(&steps)?;
    check_acyclic(&steps)?;

    let resolved = resolve_steps(&steps, library)?;
    if !options.env_display && !options.ignore_errors {
        check_required_environment(&steps, &resolved)?;
    }

    Ok(Pipeline {
        name: file.name,
        steps,
        resolved,
    })
}

fn check_precedents_exist(steps: &IndexMap<String, Step>) -> Result<(), OrchestratorError> {
    for step in steps.values() {
        for precedent in &step.precedents {
            if !steps.contains_key(precedent) {
                return Err(OrchestratorError::UnknownPrecedent {
                    step: step.id.clone(),
                    precedent: precedent.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_inputs_bind_to_declared_precedents_and_outputs(steps: &IndexMap<String, Step>) -> Result<(), OrchestratorError> {
    for step in steps.values() {
        for (input_name, input) in &step.inputs {
            if !step.precedents.contains(&input.step_id) {
                return Err(OrchestratorError::InputNotPrecedent {
                    step: step.id.clone(),
                    input: input_name.clone(),
                    precedent: input.step_id.clone(),
                });
            }
            let Some(precedent) = steps.get(&input.step_id) else {
                return Err(OrchestratorError::UnknownPrecedent {
                    step: step.id.clone(),
                    precedent: input.step_id.clone(),
                });
            };
            if !precedent.outputs.is_empty() && !precedent.outputs.contains_key(&input.output) {
                return Err(OrchestratorError::UnknownOutput {
                    step: step.id.clone(),
                    input: input_name.clone(),
                    precedent: input.step_id.clone(),
                    output: input.output.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm: repeatedly removes steps with no remaining
/// predecessors. Any steps left unremoved once the frontier empties are
/// part of a cycle.
fn check_acyclic(steps: &IndexMap<String, Step>) -> Result<(), OrchestratorError> {
    let mut in_degree: HashMap<&str, usize> = steps.keys().map(|id| (id.as_str(), 0usize)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps.values() {
        *in_degree.get_mut(step.id.as_str()).expect("step id present") += step.precedents.len();
        for precedent in &step.precedents {
            dependents.entry(precedent.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut frontier: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = frontier.pop_front() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("dependent tracked");
            *degree -= 1;
            if *degree == 0 {
                frontier.push_back(*dependent);
            }
        }
    }

    if visited == steps.len() {
        Ok(())
    } else {
        let mut remaining: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .collect();
        remaining.sort_unstable();
        Err(OrchestratorError::CycleDetected {
            steps: remaining.join(", "),
        })
    }
}

fn resolve_steps(steps: &IndexMap<String, Step>, library: &Library) -> Result<HashMap<String, ResolvedStep>, OrchestratorError> {
    let mut resolved = HashMap::new();
    for step in steps.values() {
        let resolved_step = match &step.command_id {
            Some(template_id) => {
                let template = library.find_by_name(template_id).ok_or_else(|| OrchestratorError::UnknownTemplate {
                    step: step.id.clone(),
                    template: template_id.clone(),
                })?;
                step.resolve_against(template)
            }
            None => step.resolve_inline(),
        };
        resolved.insert(step.id.clone(), resolved_step);
    }
    Ok(resolved)
}

fn check_required_environment(
    steps: &IndexMap<String, Step>,
    resolved: &HashMap<String, ResolvedStep>,
) -> Result<(), OrchestratorError> {
    let process_env: HashMap<String, String> = std::env::vars().collect();
    let mut missing = Vec::new();

    for step in steps.values() {
        let resolved_step = resolved.get(&step.id).expect("every step resolved");
        for var in step.required_env_vars(resolved_step) {
            if var.effective_value(&process_env).is_none() {
                missing.push(MissingEnvDetail {
                    name: var.name.clone(),
                    description: var.description.clone(),
                });
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::missing_environment(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Library {
        Library::new()
    }

    #[test]
    fn loads_linear_pipeline() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a"},
                {"id": "b", "command": "echo b", "precedents": ["a"]}
            ]
        }"#;
        let pipeline = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).expect("load");
        assert_eq!(pipeline.steps.len(), 2);
        let layers = pipeline.topological_layers();
        assert_eq!(layers, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a"},
                {"id": "a", "command": "echo a again"}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateId { kind: "step", .. }));
    }

    #[test]
    fn rejects_unknown_precedent() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a", "precedents": ["missing"]}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownPrecedent { .. }));
    }

    #[test]
    fn rejects_cycles() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a", "precedents": ["b"]},
                {"id": "b", "command": "echo b", "precedents": ["a"]}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_illegal_command_shape() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a", "commandId": "tpl"}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalStepShape { both: true, .. }));
    }

    #[test]
    fn resolves_command_id_against_inline_template() {
        let json = r#"{
            "commandTemplates": [
                {"id": "deploy-template", "command": "deploy.sh", "arguments": ["--region"]}
            ],
            "steps": [
                {"id": "deploy", "commandId": "deploy-template"}
            ]
        }"#;
        let mut library = library();
        let pipeline = load_pipeline_str(json, "test".into(), &mut library, &LoadOptions::default()).expect("load");
        let resolved = pipeline.resolved.get("deploy").expect("resolved");
        assert_eq!(resolved.command, "deploy.sh");
        assert_eq!(resolved.arguments, vec!["--region".to_string()]);
    }

    #[test]
    fn rejects_unknown_template() {
        let json = r#"{
            "steps": [
                {"id": "deploy", "commandId": "missing-template"}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTemplate { .. }));
    }

    #[test]
    fn rejects_input_bound_to_undeclared_precedent() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a"},
                {"id": "b", "command": "echo b", "inputs": {"x": {"as": "X", "stepId": "a", "output": "out"}}}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InputNotPrecedent { .. }));
    }

    #[test]
    fn rejects_missing_required_environment() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a", "environment": {"API_TOKEN": {}}}
            ]
        }"#;
        let err = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingEnvironment { .. }));
    }

    #[test]
    fn ignore_errors_bypasses_missing_environment_check() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a", "environment": {"API_TOKEN": {}}}
            ]
        }"#;
        let options = LoadOptions {
            ignore_errors: true,
            ..Default::default()
        };
        let pipeline = load_pipeline_str(json, "test".into(), &mut library(), &options).expect("load");
        assert_eq!(pipeline.steps.len(), 1);
    }

    #[test]
    fn skipped_steps_option_marks_matching_step_skipped() {
        let json = r#"{
            "steps": [
                {"id": "a", "command": "echo a"},
                {"id": "b", "command": "echo b", "precedents": ["a"]}
            ]
        }"#;
        let options = LoadOptions {
            skipped_steps: vec!["b".to_string()],
            ..Default::default()
        };
        let pipeline = load_pipeline_str(json, "test".into(), &mut library(), &options).expect("load");
        assert!(!pipeline.steps["a"].skipped);
        assert!(pipeline.steps["b"].skipped);
    }

    #[test]
    fn diamond_pipeline_layers_parallel_safe_steps_together() {
        let json = r#"{
            "steps": [
                {"id": "build", "command": "echo build"},
                {"id": "test-a", "command": "echo a", "precedents": ["build"]},
                {"id": "test-b", "command": "echo b", "precedents": ["build"]},
                {"id": "publish", "command": "echo publish", "precedents": ["test-a", "test-b"]}
            ]
        }"#;
        let pipeline = load_pipeline_str(json, "test".into(), &mut library(), &LoadOptions::default()).expect("load");
        let layers = pipeline.topological_layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["build".to_string()]);
        let mut middle = layers[1].clone();
        middle.sort();
        assert_eq!(middle, vec!["test-a".to_string(), "test-b".to_string()]);
        assert_eq!(layers[2], vec!["publish".to_string()]);
    }
}
