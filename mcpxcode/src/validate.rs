//! Argument validation and command-line rendering.
//!
//! Validation runs before anything is spawned: the caller's context is
//! checked against the tool's schema, coerced to typed values and completed
//! with defaults. Rendering turns the validated arguments into an argv in a
//! stable order.

use std::{fmt, path::Path, sync::LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    catalog::{ArgKind, ArgSpec, Binding, ToolDescriptor},
    error::ToolError,
};

/// Physical device UDIDs (`00008110-001A2B3C4D5E6F7A`, or 40 hex digits on
/// older devices) and simulator UUIDs.
pub const UDID_PATTERN: &str = concat!(
    r"^(?:[0-9A-Fa-f]{8}-[0-9A-Fa-f]{16}",
    r"|[0-9A-Fa-f]{40}",
    r"|[0-9A-Fa-f]{8}-(?:[0-9A-Fa-f]{4}-){3}[0-9A-Fa-f]{12})$",
);

static UDID: LazyLock<Regex> = LazyLock::new(|| Regex::new(UDID_PATTERN).unwrap());
static BUNDLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+$").unwrap());

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Text(String),
    Integer(u64),
    Bool(bool),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Text(text) => f.write_str(text),
            ArgValue::Integer(n) => write!(f, "{n}"),
            ArgValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Arguments that passed validation, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedArgs {
    values: Vec<(&'static str, ArgValue)>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Check `supplied` against the schema of `descriptor`.
///
/// Undeclared fields are reported before missing ones so that a misspelled
/// argument name surfaces as the typo rather than as a missing field.
pub fn validate(
    descriptor: &ToolDescriptor,
    supplied: &Map<String, Value>,
) -> Result<ValidatedArgs, ToolError> {
    if let Some(field) = supplied
        .keys()
        .find(|key| descriptor.find_arg(key).is_none())
    {
        return Err(ToolError::UnexpectedArgument {
            field: field.clone(),
        });
    }

    let mut values = Vec::with_capacity(descriptor.args.len());
    for spec in &descriptor.args {
        let value = match supplied.get(spec.name) {
            Some(Value::Null) | None => match spec.default {
                Some(default) => coerce(spec, &Value::String(default.to_string()))?,
                None if spec.required => {
                    return Err(ToolError::MissingArgument {
                        field: spec.name.to_string(),
                    });
                }
                None => continue,
            },
            Some(value) => coerce(spec, value)?,
        };

        if matches!(spec.binding, Binding::Positional | Binding::Command(_)) {
            if let ArgValue::Text(text) = &value {
                if text.starts_with('-') {
                    return Err(invalid(spec, "must not start with '-'"));
                }
            }
        }
        values.push((spec.name, value));
    }

    let args = ValidatedArgs { values };
    for group in &descriptor.one_of {
        let given: Vec<&str> = group
            .iter()
            .copied()
            .filter(|name| args.get(name).is_some_and(|value| *value != ArgValue::Bool(false)))
            .collect();
        match given.as_slice() {
            [_] => {}
            [] => {
                return Err(ToolError::InvalidArgument {
                    field: group[0].to_string(),
                    reason: format!("exactly one of {} is required", group.join(", ")),
                });
            }
            [first, second, ..] => {
                return Err(ToolError::InvalidArgument {
                    field: second.to_string(),
                    reason: format!("cannot be combined with `{first}`"),
                });
            }
        }
    }

    Ok(args)
}

fn invalid(spec: &ArgSpec, reason: impl Into<String>) -> ToolError {
    ToolError::InvalidArgument {
        field: spec.name.to_string(),
        reason: reason.into(),
    }
}

/// Coerce a single JSON value to the type declared by `spec`.
pub fn coerce(spec: &ArgSpec, value: &Value) -> Result<ArgValue, ToolError> {
    match &spec.kind {
        ArgKind::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            }
            .ok_or_else(|| invalid(spec, format!("expected a non-negative integer, got {value}")))?;
            if n < *min || n > *max {
                return Err(invalid(spec, format!("{n} is outside {min}..={max}")));
            }
            Ok(ArgValue::Integer(n))
        }
        ArgKind::Bool => {
            let b = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(true),
                    "false" | "no" | "0" => Some(false),
                    _ => None,
                },
                _ => None,
            }
            .ok_or_else(|| invalid(spec, format!("expected a boolean, got {value}")))?;
            Ok(ArgValue::Bool(b))
        }
        kind => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) if *kind == ArgKind::String => n.to_string(),
                _ => return Err(invalid(spec, format!("expected a {kind}, got {value}"))),
            };
            check_text(spec, &text)?;
            Ok(ArgValue::Text(text))
        }
    }
}

fn check_text(spec: &ArgSpec, text: &str) -> Result<(), ToolError> {
    if text.is_empty() {
        return Err(invalid(spec, "must not be empty"));
    }
    if text.contains('\0') {
        return Err(invalid(spec, "must not contain NUL bytes"));
    }

    match &spec.kind {
        ArgKind::Path { extensions } if !extensions.is_empty() => {
            let matches = extension(text)
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
            if !matches {
                let expected: Vec<String> = extensions.iter().map(|e| format!(".{e}")).collect();
                return Err(invalid(
                    spec,
                    format!("expected a path ending in {}", expected.join(" or ")),
                ));
            }
        }
        ArgKind::Udid if !UDID.is_match(text) => {
            return Err(invalid(spec, format!("`{text}` is not a device UDID")));
        }
        ArgKind::BundleId if !BUNDLE_ID.is_match(text) => {
            return Err(invalid(spec, format!("`{text}` is not a bundle identifier")));
        }
        ArgKind::Choice(choices) if !choices.contains(&text) => {
            return Err(invalid(
                spec,
                format!("expected one of {}", choices.join(", ")),
            ));
        }
        _ => {}
    }
    Ok(())
}

/// Extension of a path, ignoring a trailing separator (`App.xcodeproj/`).
fn extension(path: &str) -> Option<&str> {
    Path::new(path.trim_end_matches('/'))
        .extension()
        .and_then(|ext| ext.to_str())
}

/// Render the argument list passed to the tool's program.
pub fn render(descriptor: &ToolDescriptor, args: &ValidatedArgs) -> Vec<String> {
    let mut argv: Vec<String> = descriptor.leading.iter().map(|s| s.to_string()).collect();
    let mut command = Vec::new();

    for spec in &descriptor.args {
        let Some(value) = args.get(spec.name) else {
            continue;
        };
        match (&spec.binding, value) {
            (Binding::Switch(flag), ArgValue::Bool(enabled)) => {
                if *enabled {
                    argv.push(flag.to_string());
                }
            }
            (Binding::Switch(_), _) => {}
            (Binding::Flag(flag), value) => {
                argv.push(flag.to_string());
                argv.push(value.to_string());
            }
            (Binding::Format(flag, template), value) => {
                argv.push(flag.to_string());
                argv.push(template.replace("{}", &value.to_string()));
            }
            (Binding::Positional, value) => argv.push(value.to_string()),
            (Binding::ByExtension(table), value) => {
                let value = value.to_string();
                let flag = extension(&value)
                    .and_then(|ext| {
                        table
                            .iter()
                            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
                    })
                    .or(table.first())
                    .map(|(_, flag)| *flag);
                if let Some(flag) = flag {
                    argv.push(flag.to_string());
                }
                argv.push(value);
            }
            (Binding::Command(flag), value) => {
                command.extend([flag.to_string(), "--".to_string(), value.to_string()]);
            }
        }
    }

    argv.extend(descriptor.trailing.iter().map(|s| s.to_string()));
    argv.extend(command);
    argv
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::catalog::Registry;

    fn context(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn applies_defaults_and_renders_in_schema_order() {
        let registry = Registry::builtin();
        let build = registry.lookup("xcrun_build").unwrap();
        let args = validate(
            build,
            &context(json!({
                "scheme": "App",
                "project_path": "App.xcodeproj",
            })),
        )
        .unwrap();

        assert_eq!(args.get("configuration"), Some(&ArgValue::Text("Debug".into())));
        assert_eq!(args.get("destination"), None);
        assert_eq!(
            render(build, &args),
            vec![
                "xcodebuild",
                "-project",
                "App.xcodeproj",
                "-scheme",
                "App",
                "-configuration",
                "Debug",
                "-sdk",
                "iphonesimulator",
            ]
        );
    }

    #[test]
    fn project_defined_configurations_are_accepted() {
        let registry = Registry::builtin();
        let build = registry.lookup("xcrun_build").unwrap();
        let args = validate(
            build,
            &context(json!({
                "project_path": "App.xcodeproj",
                "scheme": "App",
                "configuration": "Staging",
            })),
        )
        .unwrap();
        assert_eq!(args.get("configuration"), Some(&ArgValue::Text("Staging".into())));
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn workspace_selects_workspace_flag() {
        let registry = Registry::builtin();
        let list = registry.lookup("xcrun_list_schemes").unwrap();
        let args = validate(list, &context(json!({ "project_path": "App.xcworkspace/" }))).unwrap();
        assert_eq!(
            render(list, &args),
            vec!["xcodebuild", "-list", "-workspace", "App.xcworkspace/", "-json"]
        );
    }

    #[test]
    fn missing_required_argument_is_named() {
        let registry = Registry::builtin();
        let build = registry.lookup("xcrun_build").unwrap();
        let err =
            validate(build, &context(json!({ "project_path": "App.xcodeproj" }))).unwrap_err();
        assert_eq!(
            err,
            ToolError::MissingArgument {
                field: "scheme".into()
            }
        );
    }

    #[test]
    fn null_counts_as_absent() {
        let registry = Registry::builtin();
        let build = registry.lookup("xcrun_build").unwrap();
        let err = validate(
            build,
            &context(json!({ "project_path": "App.xcodeproj", "scheme": null })),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "MissingArgument");
    }

    #[test]
    fn tool_without_arguments_renders_leading_only() {
        let registry = Registry::builtin();
        let sdks = registry.lookup("xcrun_list_sdks").unwrap();
        let args = validate(sdks, &Map::new()).unwrap();
        assert!(args.is_empty());
        assert_eq!(render(sdks, &args), vec!["xcodebuild", "-showsdks", "-json"]);
    }

    #[test]
    fn unexpected_argument_wins_over_missing() {
        let registry = Registry::builtin();
        let build = registry.lookup("xcrun_build").unwrap();
        let err = validate(
            build,
            &context(json!({ "project_path": "App.xcodeproj", "shceme": "App" })),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ToolError::UnexpectedArgument {
                field: "shceme".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_udid() {
        let registry = Registry::builtin();
        let boot = registry.lookup("xcrun_simctl_boot").unwrap();
        let err = validate(boot, &context(json!({ "udid": "iPhone 15" }))).unwrap_err();
        assert_eq!(err.field(), Some("udid"));
        assert_eq!(err.kind(), "InvalidArgument");

        for udid in [
            "00008110-001A2B3C4D5E6F7A",
            "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
            "0123456789abcdef0123456789abcdef01234567",
        ] {
            assert!(validate(boot, &context(json!({ "udid": udid }))).is_ok(), "{udid}");
        }
    }

    #[test]
    fn integer_coercion_and_bounds() {
        let registry = Registry::builtin();
        let record = registry.lookup("xctrace_record").unwrap();
        let base = json!({
            "template": "Time Profiler",
            "device_id": "00008110-001A2B3C4D5E6F7A",
            "output_path": "out.trace",
            "all_processes": true,
        });

        let mut ctx = context(base.clone());
        ctx.insert("time_limit".into(), json!("10"));
        let args = validate(record, &ctx).unwrap();
        assert_eq!(args.get("time_limit"), Some(&ArgValue::Integer(10)));
        assert_eq!(
            render(record, &args),
            vec![
                "record",
                "--template",
                "Time Profiler",
                "--device",
                "00008110-001A2B3C4D5E6F7A",
                "--output",
                "out.trace",
                "--all-processes",
                "--time-limit",
                "10s",
            ]
        );

        let mut ctx = context(base.clone());
        ctx.insert("time_limit".into(), json!("ten"));
        assert_eq!(validate(record, &ctx).unwrap_err().field(), Some("time_limit"));

        let mut ctx = context(base);
        ctx.insert("time_limit".into(), json!(0));
        assert_eq!(validate(record, &ctx).unwrap_err().kind(), "InvalidArgument");
    }

    #[test]
    fn record_needs_exactly_one_target() {
        let registry = Registry::builtin();
        let record = registry.lookup("xctrace_record").unwrap();
        let with = |target: Value| {
            let mut ctx = context(json!({
                "template": "Time Profiler",
                "device_id": "00008110-001A2B3C4D5E6F7A",
                "output_path": "out.trace",
            }));
            ctx.extend(context(target));
            validate(record, &ctx)
        };

        let args = with(json!({ "launch": "/Applications/Demo.app" })).unwrap();
        assert_eq!(
            render(record, &args),
            vec![
                "record",
                "--template",
                "Time Profiler",
                "--device",
                "00008110-001A2B3C4D5E6F7A",
                "--output",
                "out.trace",
                "--launch",
                "--",
                "/Applications/Demo.app",
            ]
        );
        assert!(with(json!({ "attach": "Demo" })).is_ok());
        assert!(with(json!({ "attach": "Demo", "all_processes": false })).is_ok());

        let err = with(json!({})).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert_eq!(
            err.to_string(),
            "invalid value for `launch`: exactly one of launch, attach, all_processes is required"
        );

        let err = with(json!({ "attach": "Demo", "all_processes": true })).unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArgument {
                field: "all_processes".into(),
                reason: "cannot be combined with `attach`".into(),
            }
        );

        let err = with(json!({ "launch": "--help" })).unwrap_err();
        assert_eq!(err.field(), Some("launch"));
    }

    #[test]
    fn switches_render_only_when_enabled() {
        let registry = Registry::builtin();
        let nm = registry.lookup("xcrun_nm_symbols").unwrap();

        let args = validate(nm, &context(json!({ "binary_path": "a.out" }))).unwrap();
        assert_eq!(render(nm, &args), vec!["nm", "a.out"]);

        let args = validate(
            nm,
            &context(json!({ "binary_path": "a.out", "demangle": "yes" })),
        )
        .unwrap();
        assert_eq!(render(nm, &args), vec!["nm", "-C", "a.out"]);
    }

    #[test]
    fn keychain_item_is_formatted() {
        let registry = Registry::builtin();
        let upload = registry.lookup("xcrun_upload_app").unwrap();
        let args = validate(
            upload,
            &context(json!({
                "app_path": "App.ipa",
                "username": "dev@example.com",
                "password_keychain_item": "AC_PASSWORD",
            })),
        )
        .unwrap();
        assert_eq!(
            render(upload, &args),
            vec![
                "altool",
                "--upload-app",
                "-f",
                "App.ipa",
                "-u",
                "dev@example.com",
                "-p",
                "@keychain:AC_PASSWORD",
            ]
        );
    }

    #[test]
    fn positional_values_cannot_look_like_flags() {
        let registry = Registry::builtin();
        let otool = registry.lookup("xcrun_otool_libraries").unwrap();
        let err = validate(otool, &context(json!({ "binary_path": "-rf" }))).unwrap_err();
        assert_eq!(err.field(), Some("binary_path"));
    }

    #[test]
    fn choice_and_extension_errors_list_expectations() {
        let registry = Registry::builtin();
        let simctl_list = registry.lookup("xcrun_simctl_list").unwrap();
        let err = validate(simctl_list, &context(json!({ "kind": "apps" }))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for `kind`: expected one of devices, runtimes, devicetypes, pairs"
        );
        let args = validate(simctl_list, &context(json!({}))).unwrap();
        assert_eq!(render(simctl_list, &args), vec!["simctl", "list", "--json", "devices"]);

        let build = registry.lookup("xcrun_build").unwrap();
        let err = validate(
            build,
            &context(json!({ "project_path": "App.swift", "scheme": "App" })),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for `project_path`: expected a path ending in .xcodeproj or .xcworkspace"
        );
    }

    #[test]
    fn bundle_id_format() {
        let registry = Registry::builtin();
        let launch = registry.lookup("xcrun_simctl_launch").unwrap();
        let udid = "A1B2C3D4-E5F6-7890-ABCD-EF1234567890";
        assert!(
            validate(
                launch,
                &context(json!({ "udid": udid, "bundle_id": "com.example.App" }))
            )
            .is_ok()
        );
        assert!(
            validate(launch, &context(json!({ "udid": udid, "bundle_id": "App" }))).is_err()
        );
    }
}
