use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use devlink_engine::{
    CommandSet, DeviceLink, FaultOrigin, LinkConfig, ParsedMessage, Subscription,
};
use devlink_frame::{encode_frame, Frame, MAX_PAYLOAD};
use devlink_transport::{LinkPort, LinkWriter, SerialLink};

use crate::cmd::SendArgs;
use crate::exit::{
    engine_error, frame_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT,
    USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let port = SerialLink::open(&args.port, args.baud)
        .map_err(|err| transport_error("open failed", err))?;

    if args.wait {
        send_and_wait(port, &args, payload, format)
    } else {
        send_once(port, &args, payload)
    }
}

/// Fire-and-forget: encode the frame and push it down the wire directly,
/// no engine threads involved.
fn send_once(port: SerialLink, args: &SendArgs, payload: Bytes) -> CliResult<i32> {
    let (_reader, mut writer, _control) = port
        .split()
        .map_err(|err| transport_error("open failed", err))?;

    let frame = Frame::new(args.command, args.target, args.message_id, payload);
    let mut encoded = BytesMut::new();
    encode_frame(&frame, &mut encoded).map_err(|err| frame_error("encode failed", err))?;
    writer
        .write(&(), &encoded)
        .map_err(|err| transport_error("send failed", err))?;

    Ok(SUCCESS)
}

enum Outcome {
    Received(ParsedMessage),
    Missed,
    Fault(FaultOrigin),
}

struct ReplyWait {
    target: u16,
    timeout: Duration,
    tx: Sender<Outcome>,
}

impl Subscription for ReplyWait {
    fn id(&self) -> &str {
        "send-reply"
    }
    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
    fn can_receive(&self, message: &ParsedMessage) -> bool {
        message.target == self.target
    }
    fn received(&self, message: &ParsedMessage) {
        let _ = self.tx.send(Outcome::Received(message.clone()));
    }
    fn not_received(&self) {
        let _ = self.tx.send(Outcome::Missed);
    }
}

/// Run the full engine so the reply arrives through the normal read loop
/// with a one-shot subscription scoped to the target.
fn send_and_wait(
    port: SerialLink,
    args: &SendArgs,
    payload: Bytes,
    format: OutputFormat,
) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let (tx, rx) = mpsc::channel();

    let fault_tx = tx.clone();
    let mut engine = DeviceLink::new(
        port,
        None,
        CommandSet::new(),
        move |origin| {
            let _ = fault_tx.send(Outcome::Fault(origin));
        },
        LinkConfig {
            id: args.port.clone(),
            ..LinkConfig::default()
        },
    )
    .map_err(|err| engine_error("engine setup failed", err))?;

    engine.subscribe(Arc::new(ReplyWait {
        target: args.target,
        timeout: wait_timeout,
        tx,
    }));
    engine.start().map_err(|err| engine_error("engine start failed", err))?;
    engine
        .enqueue_send(args.command, args.target, args.message_id, payload, ())
        .map_err(|err| engine_error("send failed", err))?;

    // The registry sweep delivers Missed; the extra slice only covers a
    // stalled engine.
    let outcome = rx.recv_timeout(wait_timeout + Duration::from_secs(1));
    let result = match outcome {
        Ok(Outcome::Received(message)) => {
            print_message(&message, format);
            Ok(SUCCESS)
        }
        Ok(Outcome::Missed) | Err(RecvTimeoutError::Timeout) => Err(CliError::new(
            TIMEOUT,
            format!("no reply from target {} within {:?}", args.target, wait_timeout),
        )),
        Ok(Outcome::Fault(origin)) => Err(CliError::new(
            FAILURE,
            format!("link faulted while waiting for reply ({origin:?})"),
        )),
        Err(RecvTimeoutError::Disconnected) => {
            Err(CliError::new(FAILURE, "engine stopped unexpectedly"))
        }
    };

    engine
        .close()
        .map_err(|err| engine_error("close failed", err))?;
    result
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    let bytes = if let Some(hex) = &args.hex {
        parse_hex(hex)?
    } else if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else {
        Vec::new()
    };
    if bytes.len() > MAX_PAYLOAD {
        return Err(CliError::new(
            USAGE,
            format!("payload is {} bytes, maximum is {MAX_PAYLOAD}", bytes.len()),
        ));
    }
    Ok(Bytes::from(bytes))
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex payload must have even length"));
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&input[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex payload: {input}")))
        })
        .collect()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
