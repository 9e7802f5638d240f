//! Fault supervisor.
//!
//! A third thread that sits on the fault channel. The first fault from
//! either loop triggers teardown: cancel flag, gate close, transport
//! shutdown, subscription clear, then a bounded join of both loops. The
//! application's fault callback runs at most once per engine lifetime and
//! never during an orderly close. When both loop threads exit without a
//! fault the channel disconnects and the supervisor retires quietly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use devlink_transport::LinkControl;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::gate::ReadGate;
use crate::registry::SubscriptionRegistry;

/// Which loop reported the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    Read,
    Write,
}

const JOIN_POLL: Duration = Duration::from_millis(5);

pub(crate) struct Supervisor<C: LinkControl> {
    pub faults: Receiver<FaultOrigin>,
    pub cancel: Arc<AtomicBool>,
    pub gate: Arc<ReadGate>,
    pub control: C,
    pub registry: Arc<SubscriptionRegistry>,
    pub on_fault: Box<dyn FnOnce(FaultOrigin) + Send>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
    pub grace: Duration,
    pub link: Arc<str>,
}

impl<C: LinkControl> Supervisor<C> {
    pub(crate) fn run(self) -> Result<(), EngineError> {
        match self.faults.recv() {
            Ok(origin) => {
                // swap() distinguishes a genuine fault from an error raised
                // by close() tearing the transport down under the loops.
                let closing = self.cancel.swap(true, Ordering::SeqCst);
                info!(link = %self.link, ?origin, closing, "tearing down after fault");
                self.gate.close();
                self.control.shutdown();
                self.registry.clear();

                let reader = join_with_grace("read", self.reader, self.grace);
                let writer = join_with_grace("write", self.writer, self.grace);

                if !closing {
                    (self.on_fault)(origin);
                }
                reader?;
                writer?;
                Ok(())
            }
            Err(_) => {
                // Both senders dropped: the loops exited on their own
                // during an orderly close.
                debug!(link = %self.link, "loops finished, supervisor retiring");
                join_with_grace("read", self.reader, self.grace)?;
                join_with_grace("write", self.writer, self.grace)?;
                Ok(())
            }
        }
    }
}

/// Join `handle`, giving up after `grace`. A panicked loop is logged but
/// not propagated; the engine is already being torn down.
fn join_with_grace(
    thread: &'static str,
    handle: JoinHandle<()>,
    grace: Duration,
) -> Result<(), EngineError> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            // Nobody may ever collect the supervisor's result on the
            // fault path, so the stuck thread is reported here as well.
            error!(
                thread,
                grace_ms = grace.as_millis() as u64,
                "loop thread did not stop within grace period"
            );
            return Err(EngineError::ShutdownTimeout { thread, grace });
        }
        std::thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!(thread, "loop thread panicked");
    }
    Ok(())
}
