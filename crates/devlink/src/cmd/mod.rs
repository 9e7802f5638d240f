use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod ports;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports, most likely device first.
    Ports(PortsArgs),
    /// Encode and send a single frame.
    Send(SendArgs),
    /// Run the engine and print received frames.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Serial port to open, e.g. /dev/ttyACM0.
    pub port: String,
    /// Baud rate.
    #[arg(long, default_value = "115200")]
    pub baud: u32,
    /// Command id (decimal or 0x-prefixed hex).
    #[arg(long, short = 'c', value_parser = parse_u8)]
    pub command: u8,
    /// Target device id.
    #[arg(long, short = 't')]
    pub target: u16,
    /// Message id attached to the frame.
    #[arg(long, default_value = "0", value_parser = parse_u8)]
    pub message_id: u8,
    /// Payload as a hex string, e.g. 01ff0a.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
    /// Payload as a raw UTF-8 string.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Wait for one frame back from the target and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Serial port to open, e.g. /dev/ttyACM0.
    pub port: String,
    /// Baud rate.
    #[arg(long, default_value = "115200")]
    pub baud: u32,
    /// Filter to specific command ids (comma-separated).
    #[arg(long, value_delimiter = ',', value_parser = parse_u8)]
    pub commands: Option<Vec<u8>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_u8(input: &str) -> Result<u8, String> {
    let parsed = match input.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid byte value: {input}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u8_accepts_decimal_and_hex() {
        assert_eq!(parse_u8("16"), Ok(16));
        assert_eq!(parse_u8("0x10"), Ok(16));
        assert!(parse_u8("0x1ff").is_err());
        assert!(parse_u8("nope").is_err());
    }
}
