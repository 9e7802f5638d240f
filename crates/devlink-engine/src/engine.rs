//! Engine facade.
//!
//! [`DeviceLink`] owns the three threads (read loop, write loop, fault
//! supervisor) that run a link. The facade itself is cheap to share once
//! started: subscribing and enqueueing sends are lock-light and never block
//! on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use devlink_frame::{FrameError, MAX_PAYLOAD};
use devlink_transport::{LinkControl, LinkPort, LinkReader, ReadMode};
use tracing::{debug, error, info};

use crate::error::{EngineError, Result};
use crate::gate::ReadGate;
use crate::message::{CommandSet, DeviceResolver, SendDescriptor};
use crate::reader::{run_read_loop, ReadContext};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::supervisor::{FaultOrigin, Supervisor};
use crate::writer::{run_write_loop, WriteContext};

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Tuning and identity for one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Identifier used in logs and attached to inbound messages.
    pub id: String,
    /// How often the write loop wakes to check for cancellation when the
    /// send queue is empty.
    pub queue_poll: Duration,
    /// Sleep between polls when the wire is idle.
    pub idle_poll: Duration,
    /// How long a suspend handshake may take before the writer logs it.
    pub suspend_ack_warn: Duration,
    /// How long `close` waits for each thread before giving up.
    pub shutdown_grace: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            id: "device-link".to_string(),
            queue_poll: Duration::from_millis(100),
            idle_poll: Duration::from_millis(1),
            suspend_ack_warn: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct Pending<P: LinkPort> {
    reader: P::Reader,
    writer: P::Writer,
    faults_rx: mpsc::Receiver<FaultOrigin>,
    faults_read: mpsc::Sender<FaultOrigin>,
    faults_write: mpsc::Sender<FaultOrigin>,
    queue_rx: mpsc::Receiver<SendDescriptor<P::Route>>,
    resolver: Option<DeviceResolver>,
    commands: CommandSet,
    on_fault: Box<dyn FnOnce(FaultOrigin) + Send>,
}

/// A running (or ready-to-run) protocol engine over one link.
pub struct DeviceLink<P: LinkPort> {
    link: Arc<str>,
    registry: Arc<SubscriptionRegistry>,
    cancel: Arc<AtomicBool>,
    gate: Arc<ReadGate>,
    control: P::Control,
    queue: Sender<SendDescriptor<P::Route>>,
    config: LinkConfig,
    pending: Option<Pending<P>>,
    supervisor: Option<JoinHandle<Result<()>>>,
}

impl<P: LinkPort> DeviceLink<P> {
    /// Split `port` and assemble an engine around it. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// `on_fault` is invoked at most once, from the supervisor thread,
    /// after teardown completes; it never fires during an orderly close.
    pub fn new(
        port: P,
        resolver: Option<DeviceResolver>,
        commands: CommandSet,
        on_fault: impl FnOnce(FaultOrigin) + Send + 'static,
        config: LinkConfig,
    ) -> Result<Self> {
        let (reader, writer, control) = port.split()?;
        let (faults_tx, faults_rx) = mpsc::channel();
        let (queue_tx, queue_rx) = mpsc::channel();
        Ok(Self {
            link: Arc::from(config.id.as_str()),
            registry: Arc::new(SubscriptionRegistry::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(ReadGate::new()),
            control,
            queue: queue_tx,
            config,
            pending: Some(Pending {
                reader,
                writer,
                faults_read: faults_tx.clone(),
                faults_write: faults_tx,
                faults_rx,
                queue_rx,
                resolver,
                commands,
                on_fault: Box::new(on_fault),
            }),
            supervisor: None,
        })
    }

    /// Register a subscription. May be called before or after `start`.
    pub fn subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.registry.add(subscription);
    }

    /// Remove a subscription by id. Returns whether one was present.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// Queue a frame for transmission. Returns immediately; the write loop
    /// sends queued frames in FIFO order. Oversized payloads are rejected
    /// here, before the descriptor reaches the queue.
    pub fn enqueue_send(
        &self,
        command_id: u8,
        target: u16,
        message_id: u8,
        payload: impl Into<Bytes>,
        route: P::Route,
    ) -> Result<()> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        self.queue
            .send(SendDescriptor {
                command_id,
                target,
                message_id,
                payload,
                route,
            })
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Spawn the read, write, and supervisor threads. Fails with
    /// [`EngineError::AlreadyStarted`] on a second call.
    pub fn start(&mut self) -> Result<()> {
        let pending = self.pending.take().ok_or(EngineError::AlreadyStarted)?;
        let handoff = pending.reader.mode() == ReadMode::Polling;

        let read_ctx = ReadContext {
            registry: Arc::clone(&self.registry),
            gate: Arc::clone(&self.gate),
            cancel: Arc::clone(&self.cancel),
            resolver: pending.resolver,
            commands: pending.commands,
            link: Arc::clone(&self.link),
            faults: pending.faults_read,
            idle_poll: self.config.idle_poll,
        };
        let reader = spawn_named("read", {
            let reader = pending.reader;
            move || run_read_loop(reader, read_ctx)
        })?;

        let write_ctx = WriteContext {
            queue: pending.queue_rx,
            gate: Arc::clone(&self.gate),
            cancel: Arc::clone(&self.cancel),
            faults: pending.faults_write,
            queue_poll: self.config.queue_poll,
            suspend_ack_warn: self.config.suspend_ack_warn,
            handoff,
            link: Arc::clone(&self.link),
        };
        let writer = spawn_named("write", {
            let writer = pending.writer;
            move || run_write_loop(writer, write_ctx)
        })?;

        let supervisor = Supervisor {
            faults: pending.faults_rx,
            cancel: Arc::clone(&self.cancel),
            gate: Arc::clone(&self.gate),
            control: self.control.clone(),
            registry: Arc::clone(&self.registry),
            on_fault: pending.on_fault,
            reader,
            writer,
            grace: self.config.shutdown_grace,
            link: Arc::clone(&self.link),
        };
        self.supervisor = Some(spawn_named("supervisor", move || supervisor.run())?);

        info!(link = %self.link, handoff, "engine started");
        Ok(())
    }

    /// Stop all three threads and release the transport. Idempotent; safe
    /// to call on an engine that was never started or already faulted.
    pub fn close(&mut self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        self.gate.close();
        self.control.shutdown();
        self.registry.clear();
        self.pending = None;

        let Some(supervisor) = self.supervisor.take() else {
            return Ok(());
        };
        debug!(link = %self.link, "waiting for supervisor");

        let deadline = Instant::now() + self.config.shutdown_grace;
        while !supervisor.is_finished() {
            if Instant::now() >= deadline {
                return Err(EngineError::ShutdownTimeout {
                    thread: "supervisor",
                    grace: self.config.shutdown_grace,
                });
            }
            thread::sleep(JOIN_POLL);
        }
        match supervisor.join() {
            Ok(result) => result,
            Err(_) => {
                error!(link = %self.link, "supervisor thread panicked");
                Ok(())
            }
        }
    }
}

impl<P: LinkPort> Drop for DeviceLink<P> {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            let _ = self.close();
        }
    }
}

fn spawn_named<T: Send + 'static>(
    thread: &'static str,
    body: impl FnOnce() -> T + Send + 'static,
) -> Result<JoinHandle<T>> {
    thread::Builder::new()
        .name(format!("devlink-{thread}"))
        .spawn(body)
        .map_err(|source| EngineError::Spawn { thread, source })
}
