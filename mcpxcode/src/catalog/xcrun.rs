//! Tools wrapping `xcrun` and the developer tools it locates.

use std::time::Duration;

use super::{ArgKind, ArgSpec, Binding, Family, OutputFormat, ToolDescriptor};

const PROJECT_EXTENSIONS: &[&str] = &["xcodeproj", "xcworkspace"];
const PROJECT_FLAGS: &[(&str, &str)] =
    &[("xcodeproj", "-project"), ("xcworkspace", "-workspace")];
const SIMCTL_LISTS: &[&str] = &["devices", "runtimes", "devicetypes", "pairs"];

fn project_path() -> ArgSpec {
    ArgSpec::required(
        "project_path",
        ArgKind::Path {
            extensions: PROJECT_EXTENSIONS,
        },
        Binding::ByExtension(PROJECT_FLAGS),
        "Path to a .xcodeproj or .xcworkspace",
    )
}

fn binary_path() -> ArgSpec {
    ArgSpec::required(
        "binary_path",
        ArgKind::PATH,
        Binding::Positional,
        "Path to a Mach-O binary",
    )
}

fn udid() -> ArgSpec {
    ArgSpec::required(
        "udid",
        ArgKind::Udid,
        Binding::Positional,
        "Simulator UDID",
    )
}

fn altool(name: &str, summary: &'static str, action: &'static str) -> ToolDescriptor {
    ToolDescriptor::new(Family::Xcrun, name, summary)
        .leading(&["altool", action])
        .arg(ArgSpec::required(
            "app_path",
            ArgKind::Path {
                extensions: &["ipa", "pkg"],
            },
            Binding::Flag("-f"),
            "Path to the .ipa or .pkg to submit",
        ))
        .arg(ArgSpec::required(
            "username",
            ArgKind::String,
            Binding::Flag("-u"),
            "App Store Connect username",
        ))
        .arg(ArgSpec::required(
            "password_keychain_item",
            ArgKind::String,
            Binding::Format("-p", "@keychain:{}"),
            "Keychain item holding the app-specific password",
        ))
        .timeout(Duration::from_secs(30 * 60))
}

fn simctl(name: &str, summary: &'static str, action: &'static str) -> ToolDescriptor {
    ToolDescriptor::new(Family::Xcrun, name, summary)
        .leading(&["simctl", action])
        .arg(udid())
}

pub(super) fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(Family::Xcrun, "list_sdks", "List all installed SDKs")
            .leading(&["xcodebuild", "-showsdks", "-json"])
            .format(OutputFormat::Json),
        ToolDescriptor::new(
            Family::Xcrun,
            "list_schemes",
            "List the schemes of a project or workspace",
        )
        .leading(&["xcodebuild", "-list"])
        .arg(project_path())
        .trailing(&["-json"])
        .format(OutputFormat::Json)
        .select("/project/schemes")
        .select("/workspace/schemes"),
        ToolDescriptor::new(Family::Xcrun, "build", "Build a scheme of an Xcode project")
            .leading(&["xcodebuild"])
            .arg(project_path())
            .arg(ArgSpec::required(
                "scheme",
                ArgKind::String,
                Binding::Flag("-scheme"),
                "Scheme to build",
            ))
            .arg(
                ArgSpec::optional(
                    "configuration",
                    ArgKind::String,
                    Binding::Flag("-configuration"),
                    "Build configuration, e.g. Debug, Release or a project-defined one",
                )
                .with_default("Debug"),
            )
            .arg(
                ArgSpec::optional("sdk", ArgKind::String, Binding::Flag("-sdk"), "SDK to build for")
                    .with_default("iphonesimulator"),
            )
            .arg(ArgSpec::optional(
                "destination",
                ArgKind::String,
                Binding::Flag("-destination"),
                "Destination specifier, e.g. 'platform=iOS Simulator,name=iPhone 15'",
            ))
            .format(OutputFormat::BuildLog)
            .timeout(Duration::from_secs(30 * 60)),
        altool(
            "validate_app",
            "Validate an app archive before App Store submission",
            "--validate-app",
        ),
        altool("upload_app", "Upload an app archive to App Store Connect", "--upload-app"),
        ToolDescriptor::new(Family::Xcrun, "swift_demangle", "Demangle a Swift symbol")
            .leading(&["swift-demangle"])
            .arg(
                ArgSpec::optional(
                    "compact",
                    ArgKind::Bool,
                    Binding::Switch("--compact"),
                    "Print only the demangled name",
                )
                .with_default("false"),
            )
            .arg(ArgSpec::required(
                "symbol",
                ArgKind::String,
                Binding::Positional,
                "Mangled symbol, e.g. $s4main3FooV",
            ))
            .timeout(Duration::from_secs(30)),
        ToolDescriptor::new(Family::Xcrun, "otool_headers", "Show the Mach-O header of a binary")
            .leading(&["otool", "-h"])
            .arg(binary_path())
            .format(OutputFormat::Table)
            .table_preamble(2),
        ToolDescriptor::new(
            Family::Xcrun,
            "otool_libraries",
            "Show the shared libraries a binary links against",
        )
        .leading(&["otool", "-L"])
        .arg(binary_path()),
        ToolDescriptor::new(Family::Xcrun, "nm_symbols", "Summarize the symbol table of a binary")
            .leading(&["nm"])
            .arg(
                ArgSpec::optional(
                    "demangle",
                    ArgKind::Bool,
                    Binding::Switch("-C"),
                    "Demangle C++ symbol names",
                )
                .with_default("false"),
            )
            .arg(binary_path())
            .format(OutputFormat::BinarySummary)
            .timeout(Duration::from_secs(120)),
        ToolDescriptor::new(Family::Xcrun, "find", "Locate a developer tool in the active Xcode")
            .leading(&["--find"])
            .arg(ArgSpec::required(
                "tool",
                ArgKind::String,
                Binding::Positional,
                "Tool name, e.g. clang",
            ))
            .timeout(Duration::from_secs(30)),
        ToolDescriptor::new(Family::Xcrun, "show_sdk_path", "Print the path of an SDK")
            .arg(
                ArgSpec::optional("sdk", ArgKind::String, Binding::Flag("--sdk"), "SDK name")
                    .with_default("macosx"),
            )
            .trailing(&["--show-sdk-path"])
            .timeout(Duration::from_secs(30)),
        ToolDescriptor::new(
            Family::Xcrun,
            "simctl_list",
            "List simulators, runtimes or device types",
        )
        .leading(&["simctl", "list", "--json"])
        .arg(
            ArgSpec::optional(
                "kind",
                ArgKind::Choice(SIMCTL_LISTS),
                Binding::Positional,
                "What to list",
            )
            .with_default("devices"),
        )
        .format(OutputFormat::Json)
        .select("/devices")
        .select("/runtimes")
        .select("/devicetypes")
        .select("/pairs"),
        simctl("simctl_boot", "Boot a simulator", "boot").timeout(Duration::from_secs(180)),
        simctl("simctl_shutdown", "Shut down a simulator", "shutdown"),
        simctl("simctl_install", "Install an app on a simulator", "install")
            .arg(ArgSpec::required(
                "app_path",
                ArgKind::Path {
                    extensions: &["app"],
                },
                Binding::Positional,
                "Path to the .app bundle",
            ))
            .timeout(Duration::from_secs(300)),
        simctl("simctl_launch", "Launch an installed app on a simulator", "launch").arg(
            ArgSpec::required(
                "bundle_id",
                ArgKind::BundleId,
                Binding::Positional,
                "Bundle identifier of the app",
            ),
        ),
    ]
}
