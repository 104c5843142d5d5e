//! Port handle: a driver's window onto one port
//!
//! A handle bundles everything a driver may touch - the port identity, the
//! command sink, and the subscription facade - without exposing the adaptor
//! itself, so drivers and adaptor stay acyclic. Dropping the last handle for
//! a port drops its command sender; the writer keeps running for the other
//! ports.

use crate::error::{Error, Result};
use crate::hat::dispatcher::{EventWaiter, PersistentSubscription, Subscriptions};
use crate::hat::writer::WriteRequest;
use crate::ports::{DeviceClass, DeviceType, PortId};
use crate::protocol::EventKind;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Command and event access for a single port (or the HAT itself).
#[derive(Clone)]
pub struct PortHandle {
    port: Option<PortId>,
    class: DeviceClass,
    commands: Sender<WriteRequest>,
    subscriptions: Subscriptions,
    detected: Arc<RwLock<HashMap<PortId, DeviceType>>>,
}

impl PortHandle {
    pub(crate) fn new(
        port: Option<PortId>,
        class: DeviceClass,
        commands: Sender<WriteRequest>,
        subscriptions: Subscriptions,
        detected: Arc<RwLock<HashMap<PortId, DeviceType>>>,
    ) -> Self {
        Self {
            port,
            class,
            commands,
            subscriptions,
            detected,
        }
    }

    /// The port this handle addresses; `None` is the HAT itself.
    pub fn port(&self) -> Option<PortId> {
        self.port
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Device type the HAT announced on connect, if any yet.
    pub fn device_type(&self) -> Option<DeviceType> {
        let port = self.port?;
        self.detected.read().get(&port).copied()
    }

    /// Queue a command for the writer serializer.
    pub fn send(&self, command: String) -> Result<()> {
        self.commands
            .send(WriteRequest::Command(command.into_bytes()))
            .map_err(|_| Error::ChannelClosed("writer serializer stopped".to_string()))
    }

    /// One-shot subscription for this port. Register before sending the
    /// command the event answers.
    pub fn subscribe_once(&self, kind: EventKind) -> EventWaiter {
        self.subscriptions.subscribe_once(self.port, kind)
    }

    /// Persistent subscription for this port.
    pub fn subscribe_all(&self, kind: EventKind) -> PersistentSubscription {
        self.subscriptions.subscribe_all(self.port, kind)
    }
}
