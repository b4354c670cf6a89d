//! The closed catalog of tools and the registry that resolves them by name.
//!
//! Each tool is plain data: an argument schema, the command it renders to and
//! a hint for how its output should be shaped. The registry is built once at
//! startup and shared read-only between concurrent invocations.

use std::{collections::HashMap, fmt, time::Duration};

use serde_json::{Map, Value, json};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::ToolError;

mod xcrun;
mod xctrace;

/// Request key reserved for the caller's timeout override.
pub const TIMEOUT_KEY: &str = "timeout_secs";

/// The external program a tool wraps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    Xcrun,
    Xctrace,
}

impl Family {
    /// Name of the executable looked up on `PATH` unless configured otherwise.
    pub fn default_program(self) -> &'static str {
        self.into()
    }
}

/// How the raw output of a tool is shaped into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Table,
    Json,
    BinarySummary,
    /// Text with compiler diagnostics extracted.
    BuildLog,
}

/// Value type accepted by an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    String,
    /// Filesystem path; when `extensions` is non-empty the path must end in one of them.
    Path {
        extensions: &'static [&'static str],
    },
    Integer {
        min: u64,
        max: u64,
    },
    Bool,
    /// Physical device UDID or simulator UUID.
    Udid,
    BundleId,
    Choice(&'static [&'static str]),
}

impl ArgKind {
    pub const PATH: ArgKind = ArgKind::Path { extensions: &[] };

    fn type_name(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Path { .. } => "path",
            ArgKind::Integer { .. } => "integer",
            ArgKind::Bool => "bool",
            ArgKind::Udid => "udid",
            ArgKind::BundleId => "bundle-id",
            ArgKind::Choice(_) => "choice",
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ArgKind::Integer { min, max } => {
                json!({ "type": "integer", "minimum": min, "maximum": max })
            }
            ArgKind::Bool => json!({ "type": "boolean" }),
            ArgKind::Choice(values) => json!({ "type": "string", "enum": values }),
            ArgKind::Udid => json!({
                "type": "string",
                "pattern": crate::validate::UDID_PATTERN,
            }),
            _ => json!({ "type": "string" }),
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// How a validated argument is rendered onto the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// `<flag> <value>`
    Flag(&'static str),
    /// `<flag> <template>` where `{}` in the template is replaced by the value.
    Format(&'static str, &'static str),
    /// `<flag>` when the boolean value is true, nothing otherwise.
    Switch(&'static str),
    /// `<value>`
    Positional,
    /// `<flag> <value>` with the flag picked from the value's extension.
    ByExtension(&'static [(&'static str, &'static str)]),
    /// `<flag> -- <value>`, placed after the trailing arguments because
    /// everything following `--` belongs to the launched command.
    Command(&'static str),
}

/// One declared argument of a tool.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub binding: Binding,
    pub description: &'static str,
}

impl ArgSpec {
    pub fn required(
        name: &'static str,
        kind: ArgKind,
        binding: Binding,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            binding,
            description,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ArgKind,
        binding: Binding,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            binding,
            description,
        }
    }

    /// Default value applied when the caller omits this argument.
    pub fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// Immutable description of a single tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub family: Family,
    pub summary: &'static str,
    pub args: Vec<ArgSpec>,
    /// Arguments placed before any bound argument.
    pub leading: Vec<&'static str>,
    /// Arguments placed after every bound argument.
    pub trailing: Vec<&'static str>,
    pub format: OutputFormat,
    pub timeout: Duration,
    /// JSON pointers tried in order; the first that resolves becomes the payload.
    pub json_select: Vec<&'static str>,
    /// Lines skipped before the table header.
    pub table_preamble: usize,
    pub accepted_exit_codes: Vec<i32>,
    /// Argument groups of which exactly one must be given. A boolean counts
    /// as given only when true.
    pub one_of: Vec<&'static [&'static str]>,
}

impl ToolDescriptor {
    pub fn new(family: Family, name: &str, summary: &'static str) -> Self {
        Self {
            name: format!("{family}_{name}"),
            family,
            summary,
            args: Vec::new(),
            leading: Vec::new(),
            trailing: Vec::new(),
            format: OutputFormat::Text,
            timeout: Duration::from_secs(60),
            json_select: Vec::new(),
            table_preamble: 0,
            accepted_exit_codes: vec![0],
            one_of: Vec::new(),
        }
    }

    pub fn leading(mut self, args: &[&'static str]) -> Self {
        self.leading.extend_from_slice(args);
        self
    }

    pub fn trailing(mut self, args: &[&'static str]) -> Self {
        self.trailing.extend_from_slice(args);
        self
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn select(mut self, pointer: &'static str) -> Self {
        self.json_select.push(pointer);
        self
    }

    pub fn table_preamble(mut self, lines: usize) -> Self {
        self.table_preamble = lines;
        self
    }

    pub fn one_of(mut self, group: &'static [&'static str]) -> Self {
        self.one_of.push(group);
        self
    }

    /// Name without the family prefix, as used by `tool <family> <name>`.
    pub fn short_name(&self) -> &str {
        let prefix: &'static str = self.family.into();
        self.name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(&self.name)
    }

    pub fn find_arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|spec| spec.name == name)
    }

    /// JSON schema of the tool's input, as advertised to MCP clients.
    pub fn input_schema(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        for spec in &self.args {
            let mut property = spec.kind.json_schema();
            let mut description = spec.description.to_string();
            if let Some(default) = spec.default {
                description.push_str(&format!(" (default: {default})"));
            }
            if let Some(group) = self.one_of.iter().find(|group| group.contains(&spec.name)) {
                description.push_str(&format!(" (exactly one of: {})", group.join(", ")));
            }
            property["description"] = Value::String(description);
            properties.insert(spec.name.to_string(), property);
        }
        properties.insert(
            TIMEOUT_KEY.to_string(),
            json!({
                "type": "integer",
                "minimum": 1,
                "description": format!(
                    "Override the timeout in seconds (default: {})",
                    self.timeout.as_secs()
                ),
            }),
        );

        let required: Vec<&str> = self
            .args
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.name)
            .collect();

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), json!(required));
        schema.insert("additionalProperties".into(), json!(false));
        schema
    }
}

/// Name-indexed set of tool descriptors.
#[derive(Debug, Clone)]
pub struct Registry {
    tools: HashMap<String, ToolDescriptor>,
}

impl Registry {
    /// The built-in `xcrun` and `xctrace` catalog.
    pub fn builtin() -> Self {
        let descriptors = xcrun::tools().into_iter().chain(xctrace::tools());
        // Names are unique by construction; the catalog tests assert it.
        let tools = descriptors
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        Self { tools }
    }

    /// Build a registry from an explicit set of descriptors.
    ///
    /// Fails when two descriptors share a name or a descriptor declares the
    /// reserved `timeout_secs` argument.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> anyhow::Result<Self> {
        let mut tools = HashMap::new();
        for descriptor in descriptors {
            if descriptor.find_arg(TIMEOUT_KEY).is_some() {
                anyhow::bail!(
                    "tool `{}` declares reserved argument `{TIMEOUT_KEY}`",
                    descriptor.name
                );
            }
            for name in descriptor.one_of.iter().flat_map(|group| group.iter()) {
                if !descriptor.find_arg(name).is_some_and(|spec| !spec.required) {
                    anyhow::bail!(
                        "tool `{}` groups `{name}`, which is not an optional argument",
                        descriptor.name
                    );
                }
            }
            if let Some(previous) = tools.insert(descriptor.name.clone(), descriptor) {
                anyhow::bail!("duplicate tool name `{}`", previous.name);
            }
        }
        Ok(Self { tools })
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::ToolNotFound {
            name: name.to_string(),
        })
    }

    /// Descriptors sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools.into_iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
