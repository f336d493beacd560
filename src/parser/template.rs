//! Parse templates.
//!
//! A template is data: the command it applies to, the vendors it knows,
//! and an ordered list of line rules whose named capture groups become row
//! fields. Adding a device type means adding a JSON file, not code.
//!
//! ```json
//! {
//!   "name": "cisco_ios_show_lldp_neighbors_detail",
//!   "command": "show lldp neighbors detail",
//!   "vendors": ["cisco_ios"],
//!   "kind": "neighbors",
//!   "key": ["local_interface", "chassis_id"],
//!   "required": ["local_interface"],
//!   "rules": [
//!     { "pattern": "^Local Intf:\\s*(?P<local_interface>\\S+)", "action": "start" },
//!     { "pattern": "^System Name:\\s*(?P<remote_system_name>\\S+)" }
//!   ]
//! }
//! ```

use crate::error::TemplateError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// What a template's rows describe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Device facts; a single row per device.
    Facts,
    Neighbors,
    Interfaces,
    Vlans,
    #[default]
    Other,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Facts => "facts",
            Self::Neighbors => "neighbors",
            Self::Interfaces => "interfaces",
            Self::Vlans => "vlans",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// What happens to the pending row when a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Emit the pending row, then capture into a fresh one.
    Start,
    /// Capture, then emit the row.
    Record,
    /// Capture into the pending row.
    #[default]
    Assign,
}

/// One line rule as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(default)]
    pub action: RuleAction,
}

/// A template as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub command: String,
    /// Vendor ids this template applies to. Empty means any vendor.
    #[serde(default)]
    pub vendors: Vec<String>,
    #[serde(default)]
    pub kind: RecordKind,
    /// Fields forming the row key. Without any, rows are keyed by content
    /// (facts rows share one fixed key).
    #[serde(default)]
    pub key: Vec<String>,
    /// Fields carried into following rows until overwritten.
    #[serde(default)]
    pub filldown: Vec<String>,
    /// Rows missing any of these are dropped.
    #[serde(default)]
    pub required: Vec<String>,
    pub rules: Vec<RuleSpec>,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub regex: Regex,
    pub action: RuleAction,
}

/// A validated, compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    spec: TemplateSpec,
    rules: Vec<Rule>,
    fields: Vec<String>,
}

impl Template {
    pub fn compile(spec: TemplateSpec) -> Result<Self, TemplateError> {
        let invalid = |reason: String| TemplateError::Invalid(spec.name.clone(), reason);

        if spec.name.trim().is_empty() {
            return Err(TemplateError::Invalid(
                "<unnamed>".to_string(),
                "name is empty".to_string(),
            ));
        }
        if spec.command.trim().is_empty() {
            return Err(invalid("command is empty".to_string()));
        }
        if spec.rules.is_empty() {
            return Err(invalid("no rules".to_string()));
        }

        let mut rules = Vec::with_capacity(spec.rules.len());
        let mut fields: Vec<String> = Vec::new();
        for rule in &spec.rules {
            let regex = Regex::new(&rule.pattern).map_err(|source| TemplateError::InvalidPattern {
                template: spec.name.clone(),
                pattern: rule.pattern.clone(),
                source,
            })?;
            for name in regex.capture_names().flatten() {
                if !fields.iter().any(|f| f == name) {
                    fields.push(name.to_string());
                }
            }
            rules.push(Rule {
                regex,
                action: rule.action,
            });
        }

        for (role, list) in [
            ("key", &spec.key),
            ("filldown", &spec.filldown),
            ("required", &spec.required),
        ] {
            if let Some(missing) = list.iter().find(|f| !fields.contains(*f)) {
                return Err(invalid(format!("{} field '{}' is never captured", role, missing)));
            }
        }

        Ok(Self {
            spec,
            rules,
            fields,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, TemplateError> {
        let spec: TemplateSpec = serde_json::from_str(text)?;
        Self::compile(spec)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn command(&self) -> &str {
        &self.spec.command
    }

    pub fn vendors(&self) -> &[String] {
        &self.spec.vendors
    }

    pub fn kind(&self) -> RecordKind {
        self.spec.kind
    }

    pub fn key_fields(&self) -> &[String] {
        &self.spec.key
    }

    pub fn spec(&self) -> &TemplateSpec {
        &self.spec
    }

    /// Every captured field, in order of first appearance.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub(crate) fn is_filldown(&self, field: &str) -> bool {
        self.spec.filldown.iter().any(|f| f == field)
    }

    pub(crate) fn required(&self) -> &[String] {
        &self.spec.required
    }

    pub fn matches_command(&self, command: &str) -> bool {
        normalize_command(&self.spec.command) == normalize_command(command)
    }

    /// Vendor-agnostic templates support every vendor.
    pub fn supports_vendor(&self, vendor: &str) -> bool {
        self.spec.vendors.is_empty() || self.spec.vendors.iter().any(|v| v == vendor)
    }
}

fn normalize_command(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Templates compiled into the binary.
const BUILTIN_TEMPLATES: &[&str] = &[
    include_str!("../../templates/cisco_ios_show_version.json"),
    include_str!("../../templates/cisco_ios_show_lldp_neighbors_detail.json"),
    include_str!("../../templates/hp_procurve_show_lldp_info_remote_device_detail.json"),
    include_str!("../../templates/juniper_junos_show_version.json"),
    include_str!("../../templates/juniper_junos_show_lldp_neighbors_detail.json"),
    include_str!("../../templates/dlink_show_lldp_remote_ports.json"),
    include_str!("../../templates/dlink_show_vlan.json"),
];

/// The templates available to the parser, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, Template>,
}

impl TemplateSet {
    pub fn builtin() -> Result<Self, TemplateError> {
        let mut set = Self::default();
        for text in BUILTIN_TEMPLATES {
            set.insert(Template::from_json(text)?);
        }
        Ok(set)
    }

    /// Built-ins plus the templates in `dir`, if given.
    pub fn load(dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut set = Self::builtin()?;
        if let Some(dir) = dir {
            set.load_dir(dir)?;
        }
        Ok(set)
    }

    /// Add every `*.json` template in `dir`, replacing same-named ones.
    /// Returns how many were loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let read_err = |path: &Path, e: std::io::Error| TemplateError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(|e| read_err(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in &files {
            let text = fs::read_to_string(path).map_err(|e| read_err(path, e))?;
            let template = Template::from_json(&text)?;
            debug!(name = template.name(), path = %path.display(), "Loaded template");
            self.insert(template);
        }
        Ok(files.len())
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// All templates, sorted by name.
    pub fn list(&self) -> Vec<&Template> {
        self.templates.values().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Pick the template for a command.
    ///
    /// A template naming the vendor beats a vendor-agnostic one. Without a
    /// vendor only vendor-agnostic templates qualify, unless exactly one
    /// template handles the command at all.
    pub fn select(&self, command: &str, vendor: Option<&str>) -> Option<&Template> {
        let candidates: Vec<&Template> = self
            .templates
            .values()
            .filter(|t| t.matches_command(command))
            .collect();

        if let Some(vendor) = vendor {
            if let Some(t) = candidates
                .iter()
                .find(|t| t.vendors().iter().any(|v| v == vendor))
            {
                return Some(*t);
            }
        }
        if let Some(t) = candidates.iter().find(|t| t.vendors().is_empty()) {
            return Some(*t);
        }
        match (vendor, candidates.as_slice()) {
            (None, [only]) => Some(*only),
            _ => None,
        }
    }
}
