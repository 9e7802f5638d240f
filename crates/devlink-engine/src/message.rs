//! Inbound and outbound message shapes, plus the lookup tables that turn
//! raw frame fields into something a subscriber can filter on.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

/// A command identifier, optionally annotated with a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub id: u8,
    pub name: Option<Arc<str>>,
}

impl CommandDescriptor {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("cmd:{:#04x}", self.id),
        }
    }
}

/// Registry of known command ids and their names.
#[derive(Debug, Default, Clone)]
pub struct CommandSet {
    names: HashMap<u8, Arc<str>>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u8, name: impl Into<Arc<str>>) {
        self.names.insert(id, name.into());
    }

    /// Describe `id`, naming it when registered.
    pub fn describe(&self, id: u8) -> CommandDescriptor {
        CommandDescriptor {
            id,
            name: self.names.get(&id).cloned(),
        }
    }
}

/// Contextual identity of a device on the far side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub target: u16,
    pub name: String,
}

/// Maps a raw target id to a known device, when the application has one.
pub type DeviceResolver = Arc<dyn Fn(u16) -> Option<DeviceContext> + Send + Sync>;

/// A decoded inbound frame, enriched with command and device context and
/// ready to be offered to subscribers.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: u8,
    pub command: CommandDescriptor,
    pub target: u16,
    pub payload: Bytes,
    pub device: Option<DeviceContext>,
    /// Identifier of the link the frame arrived on.
    pub link: Arc<str>,
}

/// An outbound frame queued for transmission, with its transport route.
#[derive(Debug)]
pub struct SendDescriptor<R> {
    pub command_id: u8,
    pub target: u16,
    pub message_id: u8,
    pub payload: Bytes,
    pub route: R,
}
