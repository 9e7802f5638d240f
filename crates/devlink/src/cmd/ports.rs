use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_transport::list_ports;
use serde::Serialize;

use crate::cmd::PortsArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct PortRow<'a> {
    name: &'a str,
    description: Option<&'a str>,
}

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports().map_err(|err| transport_error("port enumeration failed", err))?;

    match format {
        OutputFormat::Json => {
            for port in &ports {
                let row = PortRow {
                    name: &port.name,
                    description: port.description.as_deref(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&row).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "DESCRIPTION"]);
            for port in &ports {
                table.add_row(vec![
                    port.name.clone(),
                    port.description.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for port in &ports {
                match &port.description {
                    Some(description) => println!("{} ({description})", port.name),
                    None => println!("{}", port.name),
                }
            }
        }
    }

    Ok(SUCCESS)
}
