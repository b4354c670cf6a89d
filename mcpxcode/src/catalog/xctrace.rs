//! Tools wrapping `xctrace` for recording and exporting Instruments traces.

use std::time::Duration;

use super::{ArgKind, ArgSpec, Binding, Family, ToolDescriptor};

const RECORD_TARGETS: &[&str] = &["launch", "attach", "all_processes"];

fn list(name: &str, summary: &'static str, what: &'static str) -> ToolDescriptor {
    ToolDescriptor::new(Family::Xctrace, name, summary).leading(&["list", what])
}

pub(super) fn tools() -> Vec<ToolDescriptor> {
    vec![
        list("list_devices", "List devices and simulators available for tracing", "devices"),
        list("list_templates", "List available Instruments templates", "templates"),
        list("list_instruments", "List available instruments", "instruments"),
        ToolDescriptor::new(Family::Xctrace, "record", "Record a performance trace")
            .leading(&["record"])
            .arg(ArgSpec::required(
                "template",
                ArgKind::String,
                Binding::Flag("--template"),
                "Instruments template, e.g. 'Time Profiler'",
            ))
            .arg(ArgSpec::required(
                "device_id",
                ArgKind::Udid,
                Binding::Flag("--device"),
                "UDID of the target device or simulator",
            ))
            .arg(ArgSpec::required(
                "output_path",
                ArgKind::Path {
                    extensions: &["trace"],
                },
                Binding::Flag("--output"),
                "Where to write the .trace bundle",
            ))
            .arg(ArgSpec::optional(
                "launch",
                ArgKind::PATH,
                Binding::Command("--launch"),
                "App bundle or executable to launch and record",
            ))
            .arg(ArgSpec::optional(
                "attach",
                ArgKind::String,
                Binding::Flag("--attach"),
                "Process name or pid to attach to",
            ))
            .arg(
                ArgSpec::optional(
                    "all_processes",
                    ArgKind::Bool,
                    Binding::Switch("--all-processes"),
                    "Record all processes on the device",
                )
                .with_default("false"),
            )
            .arg(ArgSpec::optional(
                "time_limit",
                ArgKind::Integer { min: 1, max: 86_400 },
                Binding::Format("--time-limit", "{}s"),
                "Recording time limit in seconds",
            ))
            .one_of(RECORD_TARGETS)
            .timeout(Duration::from_secs(60 * 60)),
        ToolDescriptor::new(Family::Xctrace, "export", "Export data from a recorded trace")
            .leading(&["export"])
            .arg(ArgSpec::required(
                "trace_path",
                ArgKind::Path {
                    extensions: &["trace"],
                },
                Binding::Flag("--input"),
                "Path to the .trace bundle",
            ))
            .arg(ArgSpec::optional(
                "output_path",
                ArgKind::PATH,
                Binding::Flag("--output"),
                "File to write instead of stdout",
            ))
            .arg(
                ArgSpec::optional(
                    "toc",
                    ArgKind::Bool,
                    Binding::Switch("--toc"),
                    "Export the table of contents",
                )
                .with_default("false"),
            )
            .arg(ArgSpec::optional(
                "xpath",
                ArgKind::String,
                Binding::Flag("--xpath"),
                "XPath selecting the data to export",
            ))
            .timeout(Duration::from_secs(10 * 60)),
    ]
}
