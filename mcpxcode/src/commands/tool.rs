use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{ArgKind, Family, ToolDescriptor},
    dispatch::{Dispatcher, InvocationRequest},
    error::ToolError,
    normalize::InvocationResult,
};

// ----------------------------------------------------------------------------
// Subcommand Arguments

#[derive(Debug, Args)]
pub struct ToolArgs {
    /// Program the tool wraps (`xcrun` or `xctrace`).
    pub family: Family,
    /// Tool name within the family, e.g. `list_sdks`.
    pub name: String,
    /// Override the tool's timeout.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
    /// Print the result on a single line.
    #[arg(long)]
    pub compact: bool,
    /// Tool arguments as `--name value`, `--name=value` or `--flag`.
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

// ----------------------------------------------------------------------------
// Subcommand Actions

/// Run a single tool and print its result as JSON. Returns the process exit
/// code for the result.
pub async fn run_tool(dispatcher: &Dispatcher, args: ToolArgs) -> Result<i32> {
    let tool = format!("{}_{}", args.family, args.name);
    let descriptor = dispatcher.registry().lookup(&tool).ok();

    let mut compact = args.compact;
    let request = parse_tool_args(descriptor, &args.args).and_then(|input| {
        compact |= input.compact;
        let mut request = InvocationRequest::from_context(&tool, input.context)?;
        if let Some(timeout) = args.timeout.map(Duration::from_secs).or(input.timeout) {
            request.timeout = Some(timeout);
        }
        Ok(request)
    });

    let result = match request {
        Ok(request) => {
            let cancel = CancellationToken::new();
            let interrupt = cancel_on_ctrl_c(cancel.clone());
            let result = dispatcher.dispatch(request, &cancel).await;
            interrupt.abort();
            result
        }
        Err(e) => InvocationResult::rejected(&tool, e),
    };

    let json = if compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{json}");

    Ok(result.process_exit_code())
}

fn cancel_on_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping the running tool");
            cancel.cancel();
        }
    })
}

// ----------------------------------------------------------------------------
// Helper Functions

/// Tool arguments and CLI options found after `<family> <name>`.
#[derive(Debug, Default, PartialEq)]
pub struct ToolInput {
    pub context: Map<String, Value>,
    pub timeout: Option<Duration>,
    pub compact: bool,
}

/// Turn `--project-path App.xcodeproj --clean --time-limit=30` style
/// arguments into a tool context keyed by argument name.
///
/// Values stay strings; the validator coerces them to the declared kinds.
/// A boolean argument given without a value is `true`. `--timeout` and
/// `--compact` are taken as CLI options unless the tool declares an argument
/// of that name.
pub fn parse_tool_args(
    descriptor: Option<&ToolDescriptor>,
    raw: &[String],
) -> Result<ToolInput, ToolError> {
    let mut input = ToolInput::default();
    let mut tokens = raw.iter().peekable();

    while let Some(token) = tokens.next() {
        let Some(flag) = token.strip_prefix("--").filter(|flag| !flag.is_empty()) else {
            return Err(ToolError::UnexpectedArgument {
                field: token.clone(),
            });
        };

        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        };
        let key = name.replace('-', "_");
        let spec = descriptor.and_then(|d| d.find_arg(&key));

        match (key.as_str(), spec) {
            ("compact", None) => {
                if inline.is_some() {
                    return Err(ToolError::InvalidArgument {
                        field: key,
                        reason: "takes no value".to_string(),
                    });
                }
                input.compact = true;
                continue;
            }
            ("timeout", None) => {
                let value =
                    inline.or_else(|| tokens.next_if(|next| !next.starts_with("--")).cloned());
                let secs = value
                    .as_deref()
                    .and_then(|value| value.parse::<u64>().ok())
                    .filter(|secs| *secs > 0);
                let Some(secs) = secs else {
                    return Err(ToolError::InvalidArgument {
                        field: key,
                        reason: "expected a positive number of seconds".to_string(),
                    });
                };
                input.timeout = Some(Duration::from_secs(secs));
                continue;
            }
            _ => {}
        }

        let is_bool = spec.is_some_and(|spec| spec.kind == ArgKind::Bool);
        let value = match inline {
            Some(value) => Value::String(value),
            None if is_bool => match tokens.peek().map(|next| next.as_str()) {
                Some(next @ ("true" | "false")) => {
                    let value = Value::Bool(next == "true");
                    tokens.next();
                    value
                }
                _ => Value::Bool(true),
            },
            None => match tokens.next_if(|next| !next.starts_with("--")) {
                Some(value) => Value::String(value.clone()),
                None => {
                    return Err(ToolError::InvalidArgument {
                        field: key,
                        reason: "expected a value".to_string(),
                    });
                }
            },
        };
        input.context.insert(key, value);
    }

    Ok(input)
}
