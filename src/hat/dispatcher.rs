//! Event dispatch: one serial line fanned out to per-(port, kind) waiters
//!
//! The dispatcher thread classifies each line from the reader and looks up
//! the subscription keyed on `(port, kind)`. One-shot subscriptions are
//! removed the moment their event is handed over; persistent ones live until
//! dropped. Events with no subscriber are deliberately dropped - queueing
//! them would hand stale completions to the next caller awaiting that key.
//!
//! The subscription map is the only shared mutable structure in the adaptor;
//! it sits behind a single `RwLock` (read to find a persistent subscriber,
//! write to register/remove).

use crate::error::{Error, Result};
use crate::ports::{DeviceType, PortId};
use crate::protocol::{parse_line, DeviceEvent, EventKind};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type SubscriptionKey = (Option<PortId>, EventKind);

/// Capacity of a persistent subscription's delivery channel. The dispatcher
/// never blocks on a slow consumer; overflow is dropped with a warning.
const PERSISTENT_CAPACITY: usize = 16;

struct Subscription {
    sender: Sender<DeviceEvent>,
    persistent: bool,
}

#[derive(Default)]
struct SubscriptionMap {
    inner: RwLock<HashMap<SubscriptionKey, Subscription>>,
}

impl SubscriptionMap {
    fn remove(&self, key: &SubscriptionKey) {
        self.inner.write().remove(key);
    }
}

/// Shared handle to the subscription map. Cloned into every [`PortHandle`]
/// and into the dispatcher thread.
#[derive(Clone, Default)]
pub struct Subscriptions {
    map: Arc<SubscriptionMap>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot waiter for `(port, kind)`.
    ///
    /// Callers must register **before** writing the command whose completion
    /// they await; an event arriving first is dropped, not queued.
    pub fn subscribe_once(&self, port: Option<PortId>, kind: EventKind) -> EventWaiter {
        let (tx, rx) = bounded(1);
        let key = (port, kind);
        let replaced = self.map.inner.write().insert(
            key,
            Subscription {
                sender: tx,
                persistent: false,
            },
        );
        if replaced.is_some() {
            warn!(
                "replacing existing subscription for port {:?} kind {}",
                port, kind
            );
        }
        EventWaiter {
            key,
            receiver: rx,
            map: Arc::clone(&self.map),
            done: false,
        }
    }

    /// Register a persistent listener for `(port, kind)`. The subscription
    /// stays until the returned handle is dropped.
    pub fn subscribe_all(&self, port: Option<PortId>, kind: EventKind) -> PersistentSubscription {
        let (tx, rx) = bounded(PERSISTENT_CAPACITY);
        let key = (port, kind);
        let replaced = self.map.inner.write().insert(
            key,
            Subscription {
                sender: tx,
                persistent: true,
            },
        );
        if replaced.is_some() {
            warn!(
                "replacing existing subscription for port {:?} kind {}",
                port, kind
            );
        }
        PersistentSubscription {
            key,
            receiver: rx,
            map: Arc::clone(&self.map),
        }
    }

    /// Route one event to its subscriber, honouring one-shot removal.
    fn dispatch(&self, event: DeviceEvent) {
        let key = (event.port, event.kind());

        // One-shot subscriptions are taken out of the map before delivery so
        // removal and hand-over are a single atomic step.
        let taken = {
            let map = self.map.inner.read();
            match map.get(&key) {
                Some(sub) if sub.persistent => {
                    if let Err(e) = sub.sender.try_send(event) {
                        warn!("persistent subscriber for {:?} lagging, event dropped: {}", key, e);
                    }
                    return;
                }
                Some(_) => true,
                None => false,
            }
        };

        if !taken {
            debug!(
                "no subscriber for port {:?} kind {}, event dropped",
                key.0, key.1
            );
            return;
        }

        if let Some(sub) = self.map.inner.write().remove(&key) {
            if sub.sender.try_send(event).is_err() {
                // Waiter gave up between registration and delivery.
                debug!("one-shot subscriber for {:?} went away", key);
            }
        }
    }
}

/// One-shot delivery handle returned by [`Subscriptions::subscribe_once`].
pub struct EventWaiter {
    key: SubscriptionKey,
    receiver: Receiver<DeviceEvent>,
    map: Arc<SubscriptionMap>,
    done: bool,
}

impl EventWaiter {
    /// Block until the event arrives or `deadline` expires. Expiry removes
    /// the subscription before returning `Error::Timeout`.
    pub fn wait(mut self, deadline: Duration) -> Result<DeviceEvent> {
        match self.receiver.recv_timeout(deadline) {
            Ok(event) => {
                self.done = true;
                Ok(event)
            }
            Err(_) => {
                self.map.remove(&self.key);
                Err(Error::Timeout(format!(
                    "{} on port {:?}",
                    self.key.1, self.key.0
                )))
            }
        }
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        if !self.done {
            self.map.remove(&self.key);
        }
    }
}

/// Long-lived delivery handle returned by [`Subscriptions::subscribe_all`].
pub struct PersistentSubscription {
    key: SubscriptionKey,
    receiver: Receiver<DeviceEvent>,
    map: Arc<SubscriptionMap>,
}

impl PersistentSubscription {
    pub fn receiver(&self) -> &Receiver<DeviceEvent> {
        &self.receiver
    }
}

impl Drop for PersistentSubscription {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Dispatcher loop: classify lines, record connected device types, route
/// events. Exits when the reader closes the line channel.
pub(crate) fn dispatcher_loop(
    lines: Receiver<String>,
    subscriptions: Subscriptions,
    detected: Arc<RwLock<HashMap<PortId, DeviceType>>>,
) {
    for line in lines.iter() {
        trace!("< {:?}", line);
        let event = match parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("skipping malformed line: {}", e);
                continue;
            }
        };

        if let (Some(port), crate::protocol::EventPayload::Connected(Some(device_type))) =
            (event.port, &event.payload)
        {
            info!("Port {}: {} connected", port, device_type);
            detected.write().insert(port, *device_type);
        }

        subscriptions.dispatch(event);
    }

    debug!("dispatcher exiting: line channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventPayload;

    fn event(port: Option<PortId>, payload: EventPayload) -> DeviceEvent {
        DeviceEvent { port, payload }
    }

    #[test]
    fn test_one_shot_is_removed_after_delivery() {
        let subs = Subscriptions::new();
        let waiter = subs.subscribe_once(Some(PortId::A), EventKind::RampDone);

        subs.dispatch(event(Some(PortId::A), EventPayload::RampDone));
        let got = waiter.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(got.payload, EventPayload::RampDone);

        // Second event has no subscriber left.
        subs.dispatch(event(Some(PortId::A), EventPayload::RampDone));
        assert!(subs.map.inner.read().is_empty());
    }

    #[test]
    fn test_timeout_removes_subscription() {
        let subs = Subscriptions::new();
        let waiter = subs.subscribe_once(Some(PortId::B), EventKind::PulseDone);

        let err = waiter.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(subs.map.inner.read().is_empty());
    }

    #[test]
    fn test_events_without_subscriber_are_dropped() {
        let subs = Subscriptions::new();
        // Must not panic or queue anything.
        subs.dispatch(event(Some(PortId::C), EventPayload::PulseDone));

        let waiter = subs.subscribe_once(Some(PortId::C), EventKind::PulseDone);
        let err = waiter.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_persistent_subscription_survives_delivery() {
        let subs = Subscriptions::new();
        let listener = subs.subscribe_all(None, EventKind::PowerFault);

        subs.dispatch(event(None, EventPayload::PowerFault));
        subs.dispatch(event(None, EventPayload::PowerFault));

        assert!(listener.receiver().try_recv().is_ok());
        assert!(listener.receiver().try_recv().is_ok());

        drop(listener);
        assert!(subs.map.inner.read().is_empty());
    }

    #[test]
    fn test_subscriptions_keyed_by_port_and_kind() {
        let subs = Subscriptions::new();
        let ramp_a = subs.subscribe_once(Some(PortId::A), EventKind::RampDone);
        let _pulse_a = subs.subscribe_once(Some(PortId::A), EventKind::PulseDone);

        subs.dispatch(event(Some(PortId::A), EventPayload::RampDone));

        let got = ramp_a.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(got.kind(), EventKind::RampDone);
        // PulseDone subscription untouched.
        assert_eq!(subs.map.inner.read().len(), 1);
    }

    #[test]
    fn test_dropped_waiter_unregisters() {
        let subs = Subscriptions::new();
        let waiter = subs.subscribe_once(Some(PortId::D), EventKind::Data);
        drop(waiter);
        assert!(subs.map.inner.read().is_empty());
    }

    #[test]
    fn test_dispatcher_loop_records_device_type() {
        let subs = Subscriptions::new();
        let detected = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = bounded(8);

        let waiter = subs.subscribe_once(Some(PortId::A), EventKind::Connected);

        tx.send("P0: connected to active ID 30".to_string()).unwrap();
        drop(tx);
        dispatcher_loop(rx, subs, Arc::clone(&detected));

        assert_eq!(detected.read().get(&PortId::A), Some(&DeviceType(0x30)));
        let got = waiter.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(got.payload, EventPayload::Connected(Some(DeviceType(0x30))));
    }
}
