//! Request dispatch: registry lookup, validation, invocation, normalization.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{Registry, TIMEOUT_KEY},
    config::ServerConfig,
    error::ToolError,
    invoke::invoke,
    normalize::{InvocationResult, normalize},
    validate::{render, validate},
};

/// A single call of a named tool.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool: String,
    pub arguments: Map<String, Value>,
    /// Overrides the tool's configured timeout.
    pub timeout: Option<Duration>,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            timeout: None,
        }
    }

    /// Build a request from a caller context, taking the reserved
    /// `timeout_secs` key out of the tool arguments.
    pub fn from_context(
        tool: impl Into<String>,
        mut context: Map<String, Value>,
    ) -> Result<Self, ToolError> {
        let timeout = match context.remove(TIMEOUT_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_timeout(&value)?),
        };
        Ok(Self {
            timeout,
            ..Self::new(tool, context)
        })
    }
}

fn parse_timeout(value: &Value) -> Result<Duration, ToolError> {
    let secs = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match secs {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ToolError::InvalidArgument {
            field: TIMEOUT_KEY.to_string(),
            reason: format!("expected a positive number of seconds, got {value}"),
        }),
    }
}

/// Runs invocations against a fixed registry and configuration.
///
/// Cheap to clone; all state is shared read-only between clones, so any
/// number of invocations can be in flight at once.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
}

impl Dispatcher {
    pub fn new(registry: Registry, config: ServerConfig) -> Self {
        for name in config.timeouts.keys() {
            if registry.lookup(name).is_err() {
                log::warn!("timeout configured for unknown tool `{name}`");
            }
        }
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run `request` to completion.
    ///
    /// Never fails: every error, including an unknown tool name, is reported
    /// inside the returned result. Nothing is spawned unless the tool exists
    /// and its arguments validate.
    pub async fn dispatch(
        &self,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let started_at = jiff::Timestamp::now().to_string();
        let mut result = self.run(request, cancel).await;
        result.started_at = Some(started_at);

        match &result.error {
            None => log::info!("{}: succeeded in {}ms", result.tool, result.duration_ms),
            Some(e) if e.is_rejection() => log::warn!("{}: rejected: {e}", result.tool),
            Some(e) => log::warn!("{}: {e}", result.tool),
        }
        result
    }

    async fn run(
        &self,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let descriptor = match self.registry.lookup(&request.tool) {
            Ok(descriptor) => descriptor,
            Err(e) => return InvocationResult::rejected(&request.tool, e),
        };
        let args = match validate(descriptor, &request.arguments) {
            Ok(args) => args,
            Err(e) => return InvocationResult::rejected(&descriptor.name, e),
        };

        let argv = render(descriptor, &args);
        let program = self.config.program(descriptor.family);
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.timeout_for(descriptor));
        log::info!("{}: {program} {}", descriptor.name, argv.join(" "));

        let options = self.config.invoke_options(timeout);
        match invoke(program, &argv, &options, cancel).await {
            Ok(outcome) => normalize(descriptor, outcome, &self.config.normalize_limits()),
            Err(e) => InvocationResult::rejected(&descriptor.name, e),
        }
    }
}
