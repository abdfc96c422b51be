//! `concierge tools`: Open each configured tool server and print its catalog.

use std::path::Path;

use concierge_config::AppConfig;
use concierge_core::tool::{ToolCatalog, ToolDescriptor};
use concierge_mcp::{SessionTimeouts, ToolSession};

use super::{CmdResult, load_config, self_exe};

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    let descriptors = config.tool_descriptors(&self_exe()?);
    let timeouts = session_timeouts(&config);

    println!("Tool servers ({})", descriptors.len());
    let mut failures = 0;
    for descriptor in &descriptors {
        println!();
        println!("  {} - {}", descriptor.name, launch_line(descriptor));
        match list(descriptor, timeouts).await {
            Ok(catalog) => print_catalog(&catalog),
            Err(e) => {
                failures += 1;
                println!("    unavailable: {e}");
            }
        }
    }

    if failures > 0 {
        println!();
        println!("  {failures} server(s) unavailable; requests routed to them fall back to hosted search.");
    }
    Ok(())
}

fn session_timeouts(config: &AppConfig) -> SessionTimeouts {
    SessionTimeouts {
        handshake: config.timeouts.handshake(),
        request: config.timeouts.request(),
    }
}

async fn list(
    descriptor: &ToolDescriptor,
    timeouts: SessionTimeouts,
) -> Result<ToolCatalog, concierge_core::error::SessionError> {
    let mut session = ToolSession::open(descriptor, timeouts).await?;
    let catalog = session.catalog().await;
    session.close().await;
    catalog
}

fn launch_line(descriptor: &ToolDescriptor) -> String {
    std::iter::once(descriptor.command.as_str())
        .chain(descriptor.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_catalog(catalog: &ToolCatalog) {
    for op in &catalog.operations {
        let params: Vec<String> = op
            .parameters()
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}: {}", p.name, p.kind)
                } else {
                    format!("{}?: {}", p.name, p.kind)
                }
            })
            .collect();
        println!("    {}({})", op.name, params.join(", "));
        if !op.description.is_empty() {
            println!("        {}", op.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_line_joins_args() {
        let d = ToolDescriptor::new("search", "/usr/bin/concierge").with_args(["tool-server", "search"]);
        assert_eq!(launch_line(&d), "/usr/bin/concierge tool-server search");
    }
}
