//! The process-wide registry of known [`Template`]s.
//!
//! `Library` is an explicit value injected at API boundaries (the loader and
//! the orchestrator both take a `&Library`); [`default_library`] offers a
//! lazily-initialized process-wide instance for callers — principally the
//! CLI binary — that don't want to thread one through.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

use crate::template::Template;

/// Name of the subdirectory, inside a plugin directory, whose templates are
/// additionally registered as exit handlers.
const EXIT_HANDLER_SUBDIR: &str = "exit-handlers";

/// A filesystem-discovered bundle contributing templates.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub templates: HashMap<String, Template>,
    pub exit_commands: Vec<String>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            templates: HashMap::new(),
            exit_commands: Vec::new(),
        }
    }

    /// Scans `root/templates` (and `root/templates/exit-handlers`) for JSON
    /// files. Each file contains either a single [`Template`] object or a
    /// `{"commandTemplates": [...]}` array. Malformed files are skipped and
    /// logged, not fatal to the scan.
    pub fn load_folder(&mut self, root: &Path) {
        let templates_dir = root.join("templates");
        self.load_templates_dir(&templates_dir, false);

        let exit_handlers_dir = templates_dir.join(EXIT_HANDLER_SUBDIR);
        if exit_handlers_dir.is_dir() {
            self.load_templates_dir(&exit_handlers_dir, true);
        }
    }

    fn load_templates_dir(&mut self, dir: &Path, is_exit_handler_dir: bool) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            self.load_template_file(&path, is_exit_handler_dir);
        }
    }

    fn load_template_file(&mut self, path: &Path, is_exit_handler_dir: bool) {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read plugin template file");
                return;
            }
        };

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum TemplateFile {
            Single(Template),
            Many { #[serde(rename = "commandTemplates")] templates: Vec<Template> },
        }

        let parsed: TemplateFile = match serde_json::from_str(&contents) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping malformed plugin template file");
                return;
            }
        };

        let templates = match parsed {
            TemplateFile::Single(template) => vec![template],
            TemplateFile::Many { templates } => templates,
        };

        for mut template in templates {
            template.source_plugin = self.name.clone();
            if is_exit_handler_dir {
                template.is_exit_handler = true;
                self.exit_commands.push(template.id.clone());
            }
            self.templates.insert(template.id.clone(), template);
        }
    }
}

/// Process-wide registry mapping template id to [`Template`].
#[derive(Debug, Default)]
pub struct Library {
    templates: HashMap<String, Template>,
    exit_commands: Vec<String>,
    plugin_root: Option<PathBuf>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a library that discovers plugins under `plugin_root` whenever
    /// [`Library::reload`] is called.
    pub fn with_plugin_root(plugin_root: impl Into<PathBuf>) -> Self {
        Self {
            plugin_root: Some(plugin_root.into()),
            ..Self::default()
        }
    }

    /// Clears the registry, then re-scans the configured plugin-discovery
    /// root. Each subdirectory of `plugin_root` is treated as one plugin
    /// named after the directory.
    pub fn reload(&mut self) {
        self.templates.clear();
        self.exit_commands.clear();

        let Some(plugin_root) = self.plugin_root.clone() else {
            return;
        };
        let Ok(entries) = fs::read_dir(&plugin_root) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let mut plugin = Plugin::new(name);
            plugin.load_folder(&path);
            self.load_plugin(plugin);
        }
    }

    /// Registers every template from `plugin`, recording any tagged as exit
    /// handlers in the exit-handler roster.
    pub fn load_plugin(&mut self, plugin: Plugin) {
        for (id, template) in plugin.templates {
            self.templates.insert(id, template);
        }
        self.exit_commands.extend(plugin.exit_commands);
    }

    pub fn find_by_name(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// All registered templates, stably ordered by `(sourcePlugin, id)`.
    pub fn templates(&self) -> Vec<&Template> {
        let mut templates: Vec<&Template> = self.templates.values().collect();
        templates.sort_by(|a, b| (a.source_plugin.as_str(), a.id.as_str()).cmp(&(b.source_plugin.as_str(), b.id.as_str())));
        templates
    }

    /// Registers or replaces a single template. When `override_existing` is
    /// false and a template with the same id already exists, the existing
    /// entry is kept.
    pub fn add_template(&mut self, template: Template, override_existing: bool) {
        if !override_existing && self.templates.contains_key(&template.id) {
            return;
        }
        if template.is_exit_handler && !self.exit_commands.contains(&template.id) {
            self.exit_commands.push(template.id.clone());
        }
        self.templates.insert(template.id.clone(), template);
    }

    /// The exit-handler roster, in registration order.
    pub fn list_exit_commands(&self) -> &[String] {
        &self.exit_commands
    }
}

static DEFAULT_LIBRARY: OnceLock<std::sync::Mutex<Library>> = OnceLock::new();

/// Returns the conventional process-wide default library instance, backed
/// by a `OnceLock`. Intended for the CLI binary and other top-level callers;
/// library-internal code always takes a `&Library` parameter instead.
pub fn default_library() -> &'static std::sync::Mutex<Library> {
    DEFAULT_LIBRARY.get_or_init(|| std::sync::Mutex::new(Library::new()))
}
