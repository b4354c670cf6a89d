//! MCP tool surface generated from the registry.
//!
//! Tools are not declared one by one: `list_tools` advertises every
//! descriptor of the registry with its argument schema, and `call_tool`
//! routes through the dispatcher, which validates the arguments before
//! anything is spawned.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
    },
    service::{RequestContext, RoleServer},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    catalog::ToolDescriptor,
    dispatch::{Dispatcher, InvocationRequest},
    error::ToolError,
    normalize::InvocationResult,
};

/// MCP server that exposes Xcode command-line tools.
///
/// Clones share the shutdown token and the set of running calls, so the
/// copy kept by [`run_mcp_server`](super::run_mcp_server) can stop the calls
/// started through the copy handed to rmcp.
#[derive(Clone)]
pub struct XcodeMcpServer {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    calls: TaskTracker,
}

impl XcodeMcpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            shutdown: CancellationToken::new(),
            calls: TaskTracker::new(),
        }
    }

    /// The advertised tool list, in registry order.
    pub fn tools(&self) -> Vec<Tool> {
        self.dispatcher.registry().iter().map(mcp_tool).collect()
    }

    /// Run one invocation as a tracked task.
    ///
    /// The invocation is cancelled when `request_cancel` fires, when the
    /// server shuts down, or when the returned future is dropped.
    pub async fn call(
        &self,
        invocation: InvocationRequest,
        request_cancel: CancellationToken,
    ) -> Result<InvocationResult, McpError> {
        if self.shutdown.is_cancelled() {
            return Ok(InvocationResult::rejected(&invocation.tool, ToolError::Cancelled));
        }

        let cancel = self.shutdown.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = request_cancel.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            }
        });

        let dispatcher = self.dispatcher.clone();
        self.calls
            .spawn(async move { dispatcher.dispatch(invocation, &cancel).await })
            .await
            .map_err(|e| McpError::internal_error(format!("tool call failed: {e}"), None))
    }

    /// Cancel every running call and wait until their processes are reaped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.calls.close();
        if !self.calls.is_empty() {
            log::info!("stopping {} running tool(s)", self.calls.len());
        }
        self.calls.wait().await;
    }
}

fn mcp_tool(descriptor: &ToolDescriptor) -> Tool {
    let description = format!(
        "{} (runs `{}`, output: {}, timeout: {}s)",
        descriptor.summary,
        descriptor.family,
        descriptor.format,
        descriptor.timeout.as_secs()
    );
    Tool::new(
        descriptor.name.clone(),
        description,
        Arc::new(descriptor.input_schema()),
    )
}

/// Wrap a result as MCP content, flagging failures with `is_error`.
fn call_result(result: &InvocationResult) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(result)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    let content = vec![Content::text(text)];
    if result.is_success() {
        Ok(CallToolResult::success(content))
    } else {
        Ok(CallToolResult::error(content))
    }
}

impl ServerHandler for XcodeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.dispatcher.config().name.clone(),
                ..Implementation::from_build_env()
            },
            instructions: Some(
                r#"This MCP server runs Xcode command-line tools (`xcrun`, `xctrace`) on the host.

## Results

Every tool returns a JSON object with `status` ("success" or "failure"), the
process `exit_code`, a structured `payload` shaped by the tool's output format,
`raw` output for diagnosis, and on failure an `error` with a `kind`:
ToolNotFound, MissingArgument, InvalidArgument, UnexpectedArgument,
ProcessSpawnFailure, Timeout, Cancelled, NonZeroExit or OutputParseFailure.
Nothing is retried automatically.

## Common Workflows

### Building an App
1. `xcrun_list_schemes` with `project_path`
2. `xcrun_build` with `project_path` and `scheme`; compiler errors are listed
   in `payload.diagnostics`

### Running on a Simulator
1. `xcrun_simctl_list` to find a device UDID
2. `xcrun_simctl_boot`, `xcrun_simctl_install`, `xcrun_simctl_launch`

### Profiling
1. `xctrace_list_devices` and `xctrace_list_templates`
2. `xctrace_record` with exactly one target (`launch`, `attach` or
   `all_processes`) and a `time_limit`; cancelling the request stops the
   recording
3. `xctrace_export` with `toc` set to inspect the trace

### Inspecting Binaries
`xcrun_otool_headers`, `xcrun_otool_libraries`, `xcrun_nm_symbols`

Every tool accepts `timeout_secs` to override its default timeout.
"#
                .into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request.arguments.unwrap_or_default();
        let result = match InvocationRequest::from_context(&*request.name, arguments) {
            Ok(invocation) => self.call(invocation, context.ct).await?,
            Err(e) => InvocationResult::rejected(&request.name, e),
        };
        call_result(&result)
    }
}
