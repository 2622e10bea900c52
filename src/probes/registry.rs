//! Kernel data channel → decoder table.

use std::collections::HashMap;
use std::fmt;

use crate::error::ProbeError;
use crate::event::EventKind;

/// Handle of a kernel data channel: its map name plus the identity it was
/// given when registered. Handles from an earlier session never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    name: String,
    id: u32,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

#[derive(Debug, Default)]
pub struct DecoderRegistry {
    next_id: u32,
    decoders: HashMap<ChannelHandle, EventKind>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the channel `name` to the decoder for `kind`.
    pub fn register(&mut self, name: &str, kind: EventKind) -> Result<ChannelHandle, ProbeError> {
        if self.decoders.keys().any(|h| h.name == name) {
            return Err(ProbeError::ChannelRegistered(name.to_string()));
        }
        self.next_id += 1;
        let handle = ChannelHandle {
            name: name.to_string(),
            id: self.next_id,
        };
        self.decoders.insert(handle.clone(), kind);
        Ok(handle)
    }

    /// Decoder for `handle`, `None` if the channel is unknown.
    pub fn lookup(&self, handle: &ChannelHandle) -> Option<EventKind> {
        self.decoders.get(handle).copied()
    }

    /// Registered handles in registration order.
    pub fn handles(&self) -> Vec<ChannelHandle> {
        let mut handles: Vec<ChannelHandle> = self.decoders.keys().cloned().collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Drop every entry. Identities keep increasing across sessions.
    pub fn clear(&mut self) {
        self.decoders.clear();
    }
}
