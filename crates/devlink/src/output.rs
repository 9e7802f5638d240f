use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_engine::ParsedMessage;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    link: &'a str,
    command: String,
    command_id: u8,
    target: u16,
    device: Option<&'a str>,
    message_id: u8,
    payload_size: usize,
    payload_hex: String,
    timestamp: String,
}

pub fn print_message(message: &ParsedMessage, format: OutputFormat) {
    let device = message.device.as_ref().map(|d| d.name.as_str());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                link: &message.link,
                command: message.command.display_name(),
                command_id: message.command.id,
                target: message.target,
                device,
                message_id: message.message_id,
                payload_size: message.payload.len(),
                payload_hex: hex_string(&message.payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "TARGET", "MSG", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    message.command.display_name(),
                    device
                        .map(|name| format!("{} ({})", message.target, name))
                        .unwrap_or_else(|| message.target.to_string()),
                    message.message_id.to_string(),
                    message.payload.len().to_string(),
                    hex_string(&message.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={} target={}{} message_id={} size={} payload={}",
                message.command.display_name(),
                message.target,
                device
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default(),
                message.message_id,
                message.payload.len(),
                hex_string(&message.payload),
            );
        }
    }
}

pub fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
