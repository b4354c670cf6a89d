use clap::Args;
use console::style;
use strum::IntoEnumIterator;

use crate::catalog::{Family, Registry, ToolDescriptor};

// ----------------------------------------------------------------------------
// Subcommand Arguments

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only list tools of this family.
    #[arg(long)]
    pub family: Option<Family>,
}

// ----------------------------------------------------------------------------
// Subcommand Actions

/// Print the catalog grouped by family, using the names the `tool`
/// subcommand accepts.
pub fn list_tools(registry: &Registry, args: ListArgs) {
    for family in Family::iter().filter(|f| args.family.is_none_or(|only| only == *f)) {
        println!("{}", style(family).bold().underlined());
        for descriptor in registry.iter().filter(|d| d.family == family) {
            println!("  {}", describe(descriptor));
        }
        println!();
    }
}

fn describe(descriptor: &ToolDescriptor) -> String {
    let mut out = format!(
        "{}  {}\n      {} {}, {} {}s",
        style(descriptor.short_name()).cyan().bold(),
        descriptor.summary,
        style("output:").dim(),
        descriptor.format,
        style("timeout:").dim(),
        descriptor.timeout.as_secs(),
    );

    for arg in &descriptor.args {
        let marker = if arg.required {
            style("required").yellow().to_string()
        } else if let Some(default) = arg.default {
            format!("default {default}")
        } else {
            "optional".to_string()
        };
        out.push_str(&format!(
            "\n      --{:<16} {:<10} {:<16} {}",
            arg.name.replace('_', "-"),
            arg.kind.to_string(),
            marker,
            arg.description
        ));
    }
    out
}
