//! Single-socket, multi-subscriber event hub.
//!
//! One OS thread owns the UDP socket. Each datagram is parsed into an
//! [`Envelope`] and handed to every handler subscribed to its `event_type`
//! plus every wildcard handler. Handlers run on the listener thread, so
//! they must not block: anything slow is pushed onto a channel and handled
//! elsewhere.
//!
//! A panicking handler is caught and counted; the remaining handlers still
//! run and the listener keeps going.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tessera_types::Envelope;

use crate::error::HubError;

/// Topic that receives every envelope.
pub const WILDCARD: &str = "*";

/// Largest payload a UDP datagram over IPv4 can carry.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Interval at which `stop` polls the listener thread.
const STOP_POLL: Duration = Duration::from_millis(5);

/// A subscribed callback.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Identifies one subscription for [`EventHub::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Socket settings for one hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address to bind, e.g. `127.0.0.1:34198`.
    pub bind_addr: String,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram_bytes: usize,
    /// Socket read timeout. Bounds how long `stop` waits to be observed.
    pub read_timeout: Duration,
    /// How long `stop` waits for the listener thread to exit.
    pub stop_timeout: Duration,
}

impl HubConfig {
    /// Default settings for `bind_addr`.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            max_datagram_bytes: MAX_DATAGRAM_BYTES,
            read_timeout: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Datagrams handed to dispatch.
    pub received: u64,
    /// Datagrams dropped because they were not a valid envelope.
    pub malformed: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    handler_panics: AtomicU64,
}

type Subscriptions = HashMap<String, Vec<(SubscriptionId, Handler)>>;

/// State shared between the hub handle and its listener thread.
#[derive(Default)]
struct Shared {
    subscriptions: RwLock<Subscriptions>,
    counters: Counters,
}

impl Shared {
    fn dispatch(&self, bytes: &[u8]) -> usize {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let envelope = match Envelope::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, len = bytes.len(), "Dropping malformed envelope");
                return 0;
            }
        };

        // Snapshot the handler list so handlers may (un)subscribe without
        // deadlocking against the read lock.
        let handlers: Vec<Handler> = {
            let subs = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let topic = if envelope.event_type == WILDCARD {
                None
            } else {
                subs.get(&envelope.event_type)
            };
            topic
                .into_iter()
                .chain(subs.get(WILDCARD))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&envelope))).is_err() {
                self.counters.handler_panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_type = %envelope.event_type,
                    "Subscriber panicked; continuing dispatch"
                );
            }
        }

        tracing::trace!(event_type = %envelope.event_type, handlers = handlers.len(), "Dispatched");
        handlers.len()
    }
}

/// The event fan-out hub.
///
/// Obtain one through [`HubRegistry::get_or_bind`](crate::HubRegistry::get_or_bind)
/// so that every component shares the socket for an address.
pub struct EventHub {
    config: HubConfig,
    local_addr: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    stop_flag: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventHub {
    /// Bind the hub socket. The listener is not started until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the address cannot be bound and
    /// [`HubError::Io`] if the socket cannot be configured.
    pub fn bind(config: HubConfig) -> Result<Self, HubError> {
        let socket = UdpSocket::bind(config.bind_addr.as_str()).map_err(|source| {
            HubError::Transport {
                addr: config.bind_addr.clone(),
                source,
            }
        })?;
        // A zero duration is rejected by the OS.
        socket.set_read_timeout(Some(config.read_timeout.max(Duration::from_millis(1))))?;
        let local_addr = socket.local_addr()?;

        tracing::info!(addr = %local_addr, "Event hub bound");
        Ok(Self {
            config,
            local_addr,
            socket: Mutex::new(Some(socket)),
            shared: Arc::new(Shared::default()),
            next_id: AtomicU64::new(1),
            stop_flag: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        })
    }

    /// Address the socket is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Settings the hub was bound with.
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register `handler` for `topic` (an `event_type`, or [`WILDCARD`]).
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::debug!(topic, subscription = %id, "Subscribed");
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut subs = self
            .shared
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = subs.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subs.remove(topic);
        }
        if removed {
            tracing::debug!(topic, subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Number of live subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.shared
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Parse `bytes` and fan the envelope out to subscribers, on the
    /// calling thread. Returns the number of handlers invoked.
    pub fn dispatch(&self, bytes: &[u8]) -> usize {
        self.shared.dispatch(bytes)
    }

    /// Current dispatch counters.
    pub fn stats(&self) -> HubStats {
        let c = &self.shared.counters;
        HubStats {
            received: c.received.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Listener lifecycle
    // -----------------------------------------------------------------------

    /// Whether the listener thread is alive.
    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the listener thread.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyRunning`] if the listener is alive, and
    /// [`HubError::Io`] if the socket was closed by [`stop`](Self::stop) or
    /// the thread cannot be spawned.
    pub fn run(&self) -> Result<(), HubError> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(HubError::AlreadyRunning {
                addr: self.local_addr,
            });
        }

        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(UdpSocket::try_clone)
            .transpose()?
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "hub socket closed"))?;

        self.stop_flag.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&self.stop_flag);
        let buf_len = self.config.max_datagram_bytes.clamp(1, MAX_DATAGRAM_BYTES);

        let handle = std::thread::Builder::new()
            .name(format!("tessera-hub-{}", self.local_addr.port()))
            .spawn(move || listen(&socket, &shared, &stop_flag, buf_len))?;
        *listener = Some(handle);

        tracing::info!(addr = %self.local_addr, "Event hub listening");
        Ok(())
    }

    /// Signal the listener to exit, wait up to the stop timeout for it, and
    /// close the socket.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let deadline = Instant::now().checked_add(self.config.stop_timeout);
            while !handle.is_finished() && deadline.is_some_and(|d| Instant::now() < d) {
                std::thread::sleep(STOP_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::warn!(addr = %self.local_addr, "Hub listener thread panicked");
                }
            } else {
                tracing::warn!(
                    addr = %self.local_addr,
                    timeout = ?self.config.stop_timeout,
                    "Hub listener did not exit in time; detaching"
                );
            }
        }

        let closed = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if closed.is_some() {
            tracing::info!(addr = %self.local_addr, "Event hub stopped");
        }
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Listener thread body.
fn listen(socket: &UdpSocket, shared: &Shared, stop_flag: &AtomicBool, buf_len: usize) {
    let mut buf = vec![0_u8; buf_len];
    while !stop_flag.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if let Some(bytes) = buf.get(..len) {
                    tracing::trace!(%peer, len, "Datagram received");
                    shared.dispatch(bytes);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::warn!(error = %e, "UDP receive failed");
                std::thread::sleep(STOP_POLL);
            }
        }
    }
    tracing::debug!("Hub listener exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn hub() -> EventHub {
        EventHub::bind(HubConfig::new("127.0.0.1:0")).unwrap()
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(c: &Arc<AtomicUsize>) -> impl Fn(&Envelope) + Send + Sync + 'static {
        let c = Arc::clone(c);
        move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn routes_by_topic_and_wildcard() {
        let hub = hub();
        let built = counter();
        let all = counter();
        hub.subscribe("entity_built", counting(&built));
        hub.subscribe(WILDCARD, counting(&all));

        assert_eq!(hub.dispatch(br#"{"event_type":"entity_built"}"#), 2);
        assert_eq!(hub.dispatch(br#"{"event_type":"chunk_state"}"#), 1);

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn malformed_envelopes_are_dropped_and_counted() {
        let hub = hub();
        let all = counter();
        hub.subscribe(WILDCARD, counting(&all));

        assert_eq!(hub.dispatch(b"not json"), 0);
        assert_eq!(hub.dispatch(br#"{"sequence": 3}"#), 0);

        assert_eq!(all.load(Ordering::SeqCst), 0);
        let stats = hub.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 2);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let hub = hub();
        let after = counter();
        hub.subscribe(WILDCARD, |_| panic!("boom"));
        hub.subscribe(WILDCARD, counting(&after));

        hub.dispatch(br#"{"event_type":"a"}"#);
        hub.dispatch(br#"{"event_type":"b"}"#);

        assert_eq!(after.load(Ordering::SeqCst), 2);
        assert_eq!(hub.stats().handler_panics, 2);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let hub = hub();
        let first = counter();
        let second = counter();
        let id = hub.subscribe("x", counting(&first));
        hub.subscribe("x", counting(&second));

        assert!(hub.unsubscribe("x", id));
        assert!(!hub.unsubscribe("x", id));
        hub.dispatch(br#"{"event_type":"x"}"#);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscription_count(), 1);
    }

    #[test]
    fn run_twice_is_rejected_and_stop_closes_socket() {
        let hub = hub();
        hub.run().unwrap();
        assert!(matches!(hub.run(), Err(HubError::AlreadyRunning { .. })));

        hub.stop();
        assert!(!hub.is_running());
        assert!(matches!(hub.run(), Err(HubError::Io(_))));
    }

    #[test]
    fn binding_a_taken_port_is_a_transport_error() {
        let first = hub();
        let taken = first.local_addr().to_string();
        let err = EventHub::bind(HubConfig::new(taken)).unwrap_err();
        assert!(matches!(err, HubError::Transport { .. }));
    }
}
