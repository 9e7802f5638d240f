//! Read loop.
//!
//! Owns the inbound half of the link. Polls for data, honors suspend
//! requests from the write loop on half-duplex transports, decodes fixed
//! frames, and dispatches them to the subscription registry. Fatal
//! transport errors are reported to the supervisor exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use devlink_frame::{decode_frame, FrameError, FRAME_SIZE};
use devlink_transport::{LinkReader, ReadMode, TransportError};
use tracing::{debug, trace, warn};

use crate::gate::ReadGate;
use crate::message::{CommandSet, DeviceResolver, ParsedMessage};
use crate::registry::SubscriptionRegistry;
use crate::supervisor::FaultOrigin;

pub(crate) struct ReadContext {
    pub registry: Arc<SubscriptionRegistry>,
    pub gate: Arc<ReadGate>,
    pub cancel: Arc<AtomicBool>,
    pub resolver: Option<DeviceResolver>,
    pub commands: CommandSet,
    pub link: Arc<str>,
    pub faults: Sender<FaultOrigin>,
    pub idle_poll: Duration,
}

pub(crate) fn run_read_loop<R: LinkReader>(mut reader: R, ctx: ReadContext) {
    if let Err(err) = reader.prepare() {
        report_fault(&ctx, &err);
        return;
    }
    let half_duplex = reader.mode() == ReadMode::Polling;
    debug!(link = %ctx.link, half_duplex, "read loop started");

    while !ctx.cancel.load(Ordering::SeqCst) {
        if half_duplex && ctx.gate.suspend_requested() {
            if ctx.gate.park_until_resumed().is_err() {
                break;
            }
            // The write burst may have left stale bytes on the wire.
            if let Err(err) = reader.prepare() {
                report_fault(&ctx, &err);
                return;
            }
            continue;
        }

        match read_once(&mut reader, &ctx, half_duplex) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                report_fault(&ctx, &err);
                return;
            }
            Err(err) => warn!(link = %ctx.link, error = %err, "transient read error"),
        }

        ctx.registry.sweep(Instant::now());
    }
    debug!(link = %ctx.link, "read loop stopped");
}

fn read_once<R: LinkReader>(
    reader: &mut R,
    ctx: &ReadContext,
    half_duplex: bool,
) -> Result<(), TransportError> {
    if half_duplex && !reader.available()? {
        std::thread::sleep(ctx.idle_poll);
        return Ok(());
    }

    let mut window = [0u8; FRAME_SIZE];
    let n = reader.read(&mut window)?;
    if n == 0 {
        return Ok(());
    }

    match decode_frame(&window[..n]) {
        Ok(frame) => {
            let message = ParsedMessage {
                message_id: frame.message_id,
                command: ctx.commands.describe(frame.command_id),
                target: frame.target,
                payload: frame.payload,
                device: ctx.resolver.as_ref().and_then(|r| r(frame.target)),
                link: Arc::clone(&ctx.link),
            };
            trace!(
                link = %ctx.link,
                command = %message.command.display_name(),
                target = message.target,
                message_id = message.message_id,
                "frame received"
            );
            ctx.registry.dispatch(&message);
        }
        // Partial reads are expected on a byte stream; wait for the rest.
        Err(FrameError::FrameTooShort { have, need }) => {
            trace!(link = %ctx.link, have, need, "incomplete frame, dropping window");
        }
        Err(err) => {
            warn!(link = %ctx.link, error = %err, "dropping undecodable frame");
        }
    }
    Ok(())
}

fn report_fault(ctx: &ReadContext, err: &TransportError) {
    if ctx.cancel.load(Ordering::SeqCst) {
        // Shutdown already in progress; the error is a consequence, not a cause.
        debug!(link = %ctx.link, error = %err, "read error during shutdown");
        return;
    }
    warn!(link = %ctx.link, error = %err, "read loop fault");
    let _ = ctx.faults.send(FaultOrigin::Read);
}
