//! Subscription registry.
//!
//! Subscribers declare interest in inbound messages. A subscription that
//! declares a timeout is one-shot: it is removed after its first delivery,
//! or swept with a `not_received` notification once the timeout elapses
//! without one. A subscription without a timeout is persistent and receives
//! every matching message until it is removed.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use std::sync::Arc;

use tracing::{debug, trace};

use crate::message::ParsedMessage;

/// A consumer of inbound messages.
pub trait Subscription: Send + Sync {
    /// Stable identifier. Registering a second subscription with the same
    /// id replaces the first.
    fn id(&self) -> &str;

    /// When `Some`, the subscription is one-shot and is reported as missed
    /// if no matching message arrives within the window.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether this subscriber wants `message`.
    fn can_receive(&self, message: &ParsedMessage) -> bool;

    /// Deliver a matching message.
    fn received(&self, message: &ParsedMessage);

    /// Called once when a one-shot subscription's timeout elapses.
    fn not_received(&self) {}
}

struct Entry {
    subscription: Arc<dyn Subscription>,
    registered: Instant,
}

/// Thread-safe set of live subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `subscription`, replacing any existing entry with the same
    /// id and restarting its timeout window.
    pub fn add(&self, subscription: Arc<dyn Subscription>) {
        let mut entries = self.lock();
        entries.retain(|e| e.subscription.id() != subscription.id());
        trace!(id = subscription.id(), "subscription registered");
        entries.push(Entry {
            subscription,
            registered: Instant::now(),
        });
    }

    /// Remove the subscription with `id`, if present.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.subscription.id() != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Offer `message` to every live subscription. Returns how many
    /// accepted it. One-shot subscriptions that accept are removed.
    ///
    /// Callbacks run outside the registry lock, so a subscriber may add or
    /// remove subscriptions from within `received`.
    pub fn dispatch(&self, message: &ParsedMessage) -> usize {
        let snapshot: Vec<Arc<dyn Subscription>> = self
            .lock()
            .iter()
            .map(|e| Arc::clone(&e.subscription))
            .collect();

        let mut delivered = 0;
        for subscription in snapshot {
            if !subscription.can_receive(message) {
                continue;
            }
            if subscription.timeout().is_some() {
                // One-shot: claim the entry before delivering so a second
                // matching frame in the same burst cannot deliver twice.
                let mut entries = self.lock();
                let before = entries.len();
                entries.retain(|e| !Arc::ptr_eq(&e.subscription, &subscription));
                let claimed = entries.len() != before;
                drop(entries);
                if !claimed {
                    continue;
                }
            }
            subscription.received(message);
            delivered += 1;
        }

        if delivered == 0 {
            debug!(
                command = %message.command.display_name(),
                target = message.target,
                message_id = message.message_id,
                "no subscriber for inbound message"
            );
        }
        delivered
    }

    /// Remove one-shot subscriptions whose timeout has elapsed and notify
    /// each via `not_received`. Notification runs outside the lock.
    pub fn sweep(&self, now: Instant) {
        let lapsed: Vec<Arc<dyn Subscription>> = {
            let mut entries = self.lock();
            let mut lapsed = Vec::new();
            entries.retain(|e| match e.subscription.timeout() {
                Some(timeout) if expired(e.registered, timeout, now) => {
                    lapsed.push(Arc::clone(&e.subscription));
                    false
                }
                _ => true,
            });
            lapsed
        };
        for subscription in lapsed {
            debug!(id = subscription.id(), "subscription timed out");
            subscription.not_received();
        }
    }

    /// Drop every subscription without notification. Used at teardown.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// The window is exclusive: a subscription lapses only once strictly more
/// than its timeout has passed since registration.
fn expired(registered: Instant, timeout: Duration, now: Instant) -> bool {
    now.duration_since(registered) > timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::message::{CommandDescriptor, ParsedMessage};

    struct Probe {
        id: String,
        timeout: Option<Duration>,
        accept: u8,
        received: AtomicUsize,
        missed: AtomicUsize,
    }

    impl Probe {
        fn new(id: &str, accept: u8, timeout: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                timeout,
                accept,
                received: AtomicUsize::new(0),
                missed: AtomicUsize::new(0),
            })
        }
    }

    impl Subscription for Probe {
        fn id(&self) -> &str {
            &self.id
        }
        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }
        fn can_receive(&self, message: &ParsedMessage) -> bool {
            message.command.id == self.accept
        }
        fn received(&self, _message: &ParsedMessage) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
        fn not_received(&self) {
            self.missed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(command_id: u8) -> ParsedMessage {
        ParsedMessage {
            message_id: 1,
            command: CommandDescriptor {
                id: command_id,
                name: None,
            },
            target: 100,
            payload: Bytes::new(),
            device: None,
            link: Arc::from("test"),
        }
    }

    #[test]
    fn persistent_subscription_receives_repeatedly() {
        let registry = SubscriptionRegistry::new();
        let probe = Probe::new("p", 0x10, None);
        registry.add(probe.clone());

        assert_eq!(registry.dispatch(&message(0x10)), 1);
        assert_eq!(registry.dispatch(&message(0x10)), 1);
        assert_eq!(probe.received.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn one_shot_removed_after_first_delivery() {
        let registry = SubscriptionRegistry::new();
        let probe = Probe::new("o", 0x10, Some(Duration::from_secs(5)));
        registry.add(probe.clone());

        assert_eq!(registry.dispatch(&message(0x10)), 1);
        assert_eq!(registry.dispatch(&message(0x10)), 0);
        assert_eq!(probe.received.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn non_matching_message_leaves_one_shot_armed() {
        let registry = SubscriptionRegistry::new();
        let probe = Probe::new("o", 0x10, Some(Duration::from_secs(5)));
        registry.add(probe.clone());

        assert_eq!(registry.dispatch(&message(0x99)), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(probe.received.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sweep_notifies_expired_one_shots_only() {
        let registry = SubscriptionRegistry::new();
        let short = Probe::new("short", 0x10, Some(Duration::from_millis(10)));
        let long = Probe::new("long", 0x10, Some(Duration::from_secs(60)));
        let persistent = Probe::new("keep", 0x10, None);
        registry.add(short.clone());
        registry.add(long.clone());
        registry.add(persistent.clone());

        registry.sweep(Instant::now() + Duration::from_millis(50));

        assert_eq!(short.missed.load(Ordering::SeqCst), 1);
        assert_eq!(long.missed.load(Ordering::SeqCst), 0);
        assert_eq!(persistent.missed.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn swept_subscription_cannot_receive_later() {
        let registry = SubscriptionRegistry::new();
        let probe = Probe::new("o", 0x10, Some(Duration::from_millis(1)));
        registry.add(probe.clone());

        registry.sweep(Instant::now() + Duration::from_secs(1));
        assert_eq!(registry.dispatch(&message(0x10)), 0);
        assert_eq!(probe.received.load(Ordering::SeqCst), 0);
        assert_eq!(probe.missed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_window_is_exclusive_at_the_boundary() {
        let registered = Instant::now();
        let timeout = Duration::from_millis(50);
        assert!(!expired(registered, timeout, registered));
        assert!(!expired(registered, timeout, registered + timeout));
        assert!(expired(
            registered,
            timeout,
            registered + timeout + Duration::from_nanos(1)
        ));
    }

    #[test]
    fn re_adding_same_id_replaces_and_restarts_window() {
        let registry = SubscriptionRegistry::new();
        let first = Probe::new("dup", 0x10, Some(Duration::from_secs(5)));
        let second = Probe::new("dup", 0x10, Some(Duration::from_secs(5)));
        registry.add(first.clone());
        registry.add(second.clone());

        assert_eq!(registry.len(), 1);
        registry.dispatch(&message(0x10));
        assert_eq!(first.received.load(Ordering::SeqCst), 0);
        assert_eq!(second.received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_register_from_within_received() {
        struct Chaining {
            registry: Arc<SubscriptionRegistry>,
            inner: Arc<Probe>,
        }

        impl Subscription for Chaining {
            fn id(&self) -> &str {
                "chain"
            }
            fn timeout(&self) -> Option<Duration> {
                Some(Duration::from_secs(5))
            }
            fn can_receive(&self, message: &ParsedMessage) -> bool {
                message.command.id == 0x10
            }
            fn received(&self, _message: &ParsedMessage) {
                self.registry.add(self.inner.clone());
            }
        }

        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = Probe::new("inner", 0x11, None);
        registry.add(Arc::new(Chaining {
            registry: registry.clone(),
            inner: inner.clone(),
        }));

        assert_eq!(registry.dispatch(&message(0x10)), 1);
        assert_eq!(registry.dispatch(&message(0x11)), 1);
        assert_eq!(inner.received.load(Ordering::SeqCst), 1);
    }
}
