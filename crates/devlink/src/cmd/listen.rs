use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devlink_engine::{CommandSet, DeviceLink, LinkConfig, ParsedMessage, Subscription};
use devlink_transport::SerialLink;
use tracing::error;

use crate::cmd::ListenArgs;
use crate::exit::{engine_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

struct Printer {
    commands: Option<Vec<u8>>,
    format: OutputFormat,
    printed: Arc<AtomicUsize>,
}

impl Subscription for Printer {
    fn id(&self) -> &str {
        "listen-printer"
    }
    fn can_receive(&self, message: &ParsedMessage) -> bool {
        match &self.commands {
            Some(commands) => commands.contains(&message.command.id),
            None => true,
        }
    }
    fn received(&self, message: &ParsedMessage) {
        print_message(message, self.format);
        self.printed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let port = SerialLink::open(&args.port, args.baud)
        .map_err(|err| transport_error("open failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let faulted = Arc::new(AtomicBool::new(false));
    let fault_flag = faulted.clone();
    let fault_running = running.clone();
    let mut engine = DeviceLink::new(
        port,
        None,
        CommandSet::new(),
        move |origin| {
            error!(?origin, "link faulted");
            fault_flag.store(true, Ordering::SeqCst);
            fault_running.store(false, Ordering::SeqCst);
        },
        LinkConfig {
            id: args.port.clone(),
            ..LinkConfig::default()
        },
    )
    .map_err(|err| engine_error("engine setup failed", err))?;

    let printed = Arc::new(AtomicUsize::new(0));
    engine.subscribe(Arc::new(Printer {
        commands: args.commands.clone(),
        format,
        printed: printed.clone(),
    }));
    engine.start().map_err(|err| engine_error("engine start failed", err))?;

    while running.load(Ordering::SeqCst) {
        if let Some(count) = args.count {
            if printed.load(Ordering::SeqCst) >= count {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    engine
        .close()
        .map_err(|err| engine_error("close failed", err))?;

    if faulted.load(Ordering::SeqCst) {
        return Err(CliError::new(
            crate::exit::TRANSPORT_ERROR,
            format!("link {} faulted", args.port),
        ));
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
