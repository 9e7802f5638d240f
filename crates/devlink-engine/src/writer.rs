//! Write loop.
//!
//! Drains the send queue. On half-duplex links each burst is bracketed by a
//! single suspend/resume handshake with the read loop: suspend once, drain
//! every queued frame in FIFO order, resume once. Encode failures drop the
//! offending frame and keep the loop alive; fatal transport errors are
//! reported to the supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use devlink_frame::{encode_frame, Frame, FRAME_SIZE};
use devlink_transport::{LinkWriter, TransportError};
use tracing::{debug, error, trace};

use crate::gate::ReadGate;
use crate::message::SendDescriptor;
use crate::supervisor::FaultOrigin;

pub(crate) struct WriteContext<R> {
    pub queue: Receiver<SendDescriptor<R>>,
    pub gate: Arc<ReadGate>,
    pub cancel: Arc<AtomicBool>,
    pub faults: Sender<FaultOrigin>,
    pub queue_poll: Duration,
    pub suspend_ack_warn: Duration,
    /// Whether bursts must pause the read loop first.
    pub handoff: bool,
    pub link: Arc<str>,
}

pub(crate) fn run_write_loop<W: LinkWriter>(mut writer: W, ctx: WriteContext<W::Route>) {
    debug!(link = %ctx.link, handoff = ctx.handoff, "write loop started");
    let mut scratch = BytesMut::with_capacity(FRAME_SIZE);

    loop {
        let first = match ctx.queue.recv_timeout(ctx.queue_poll) {
            Ok(descriptor) => descriptor,
            Err(RecvTimeoutError::Timeout) => {
                if ctx.cancel.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }

        let pause = if ctx.handoff {
            match ctx.gate.suspend_reads(ctx.suspend_ack_warn) {
                Ok(pause) => Some(pause),
                Err(_) => break,
            }
        } else {
            None
        };

        let mut burst = transmit(&mut writer, &ctx, &mut scratch, first);
        while burst.is_ok() {
            match ctx.queue.try_recv() {
                Ok(next) => burst = transmit(&mut writer, &ctx, &mut scratch, next),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drop(pause);

        if burst.is_err() {
            report_fault(&ctx);
            return;
        }
    }
    debug!(link = %ctx.link, "write loop stopped");
}

/// Encode and send one frame. `Err` means the transport is unusable;
/// anything recoverable is logged and swallowed so the burst continues.
fn transmit<W: LinkWriter>(
    writer: &mut W,
    ctx: &WriteContext<W::Route>,
    scratch: &mut BytesMut,
    descriptor: SendDescriptor<W::Route>,
) -> Result<(), TransportError> {
    let frame = Frame::new(
        descriptor.command_id,
        descriptor.target,
        descriptor.message_id,
        descriptor.payload,
    );
    scratch.clear();
    if let Err(err) = encode_frame(&frame, scratch) {
        error!(
            link = %ctx.link,
            command_id = descriptor.command_id,
            error = %err,
            "dropping unencodable frame"
        );
        return Ok(());
    }

    match writer.write(&descriptor.route, scratch) {
        Ok(()) => {
            trace!(
                link = %ctx.link,
                command_id = descriptor.command_id,
                target = descriptor.target,
                message_id = descriptor.message_id,
                "frame sent"
            );
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            error!(link = %ctx.link, error = %err, "frame send failed");
            Ok(())
        }
    }
}

fn report_fault<R>(ctx: &WriteContext<R>) {
    if ctx.cancel.load(Ordering::SeqCst) {
        debug!(link = %ctx.link, "write error during shutdown");
        return;
    }
    error!(link = %ctx.link, "write loop fault");
    let _ = ctx.faults.send(FaultOrigin::Write);
}
