//! Listener registry: the set of active bindings between consumer-side
//! listeners and native socket events.
//!
//! Each [`ListenerBinding`] is a plain data value (path, event name, unique
//! id, a clone of the fan-in sender) that implements [`EventListener`].
//! Because bindings are owned here rather than hidden in closures, teardown
//! can enumerate and detach every one of them.
//!
//! # Locking
//!
//! One mutex covers the binding set and a `closed` flag. Every step that
//! pairs registry state with socket state runs entirely under it:
//! register-and-attach, install-and-migrate, take-and-detach and the
//! teardown sweep. A registration racing a teardown therefore either
//! completes before the sweep (and is detached by it) or observes `closed`
//! and is refused. The directory lock is only ever taken while this one is
//! held, never the other way round. Socket clients never call back into the
//! registry, so holding the lock while calling `on`/`off` cannot deadlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::channel::{BoundaryMessage, FanInSender};
use super::directory::{ConnectionDirectory, Initialized, PendingConnection};
use super::payload::normalize_inbound;
use crate::error::BridgeError;
use crate::socket::{EventListener, NativeArg, SharedListener, SocketClient};

/// A registered listener, attached (or attachable) to one connection.
pub struct ListenerBinding {
    event_name: String,
    unique_id: String,
    path: String,
    once: bool,
    fired: AtomicBool,
    sink: FanInSender,
}

impl std::fmt::Debug for ListenerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBinding")
            .field("event_name", &self.event_name)
            .field("unique_id", &self.unique_id)
            .field("path", &self.path)
            .field("once", &self.once)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ListenerBinding {
    /// Event this binding listens for.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Process-unique identifier handed to the consumer.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Connection key the binding was registered against.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this is a single-shot binding.
    #[must_use]
    pub fn is_once(&self) -> bool {
        self.once
    }

    /// Whether the binding has delivered at least one event.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Attach to `socket` with this binding's persistence semantics.
    pub fn attach_to(self: &Arc<Self>, socket: &dyn SocketClient) {
        let listener: SharedListener = Arc::clone(self) as SharedListener;
        if self.once {
            socket.once(&self.event_name, listener);
        } else {
            socket.on(&self.event_name, listener);
        }
    }

    /// Detach from `socket`. Returns whether the socket held it.
    pub fn detach_from(&self, socket: &dyn SocketClient) -> bool {
        socket.off(&self.event_name, &self.unique_id)
    }
}

impl EventListener for ListenerBinding {
    fn listener_id(&self) -> &str {
        &self.unique_id
    }

    fn on_event(&self, args: &[NativeArg]) {
        let already_fired = self.fired.swap(true, Ordering::AcqRel);
        if self.once && already_fired {
            return;
        }

        let message = BoundaryMessage {
            unique_id: self.unique_id.clone(),
            event_name: self.event_name.clone(),
            data: normalize_inbound(args),
        };

        if self.sink.send(message).is_err() {
            log::debug!(
                "[socketio] Fan-in channel closed; dropped '{}' for {}",
                self.event_name,
                self.unique_id
            );
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    bindings: Vec<Arc<ListenerBinding>>,
    closed: bool,
}

/// Owner of all active listener bindings.
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
    sink: FanInSender,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bindings", &self.len())
            .field("closed", &self.is_closed())
            .field("sink_closed", &self.sink.is_closed())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry whose bindings deliver into `sink`.
    #[must_use]
    pub fn new(sink: FanInSender) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            sink,
        }
    }

    fn new_binding(&self, path: &str, event_name: &str, once: bool) -> Arc<ListenerBinding> {
        Arc::new(ListenerBinding {
            event_name: event_name.to_string(),
            unique_id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string(),
            once,
            fired: AtomicBool::new(false),
            sink: self.sink.clone(),
        })
    }

    /// Allocate a binding with a fresh UUID and add it to the active set
    /// without attaching it anywhere.
    ///
    /// Returns `None` once the registry has been closed.
    pub fn register(&self, path: &str, event_name: &str, once: bool) -> Option<Arc<ListenerBinding>> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let binding = self.new_binding(path, event_name, once);
        inner.bindings.push(Arc::clone(&binding));
        log_registered(&binding);
        Some(binding)
    }

    /// Register a binding and attach it to the connection currently stored
    /// under `path`, as one step.
    ///
    /// With no connection under `path` the binding is still registered and
    /// is attached when one is installed. Returns `None` once the registry
    /// has been closed.
    pub fn register_and_attach(
        &self,
        directory: &ConnectionDirectory,
        path: &str,
        event_name: &str,
        once: bool,
    ) -> Option<Arc<ListenerBinding>> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let binding = self.new_binding(path, event_name, once);
        if let Some(socket) = directory.resolve(path) {
            binding.attach_to(socket.as_ref());
        }
        inner.bindings.push(Arc::clone(&binding));
        log_registered(&binding);
        Some(binding)
    }

    /// Store a prepared connection and bring the bindings for its key over.
    ///
    /// Bindings held by a replaced connection are migrated; otherwise every
    /// binding registered for the key is attached to the new client. The
    /// replaced client is returned for the caller to disconnect. Fails with
    /// [`BridgeError::Destroyed`] once the registry has been closed, leaving
    /// the directory untouched.
    pub fn install(
        &self,
        directory: &ConnectionDirectory,
        pending: PendingConnection,
    ) -> Result<Initialized, BridgeError> {
        let inner = self.lock();
        if inner.closed {
            return Err(BridgeError::Destroyed);
        }

        let init = directory.insert(pending);
        match &init.replaced {
            Some(old) => {
                migrate_locked(&inner.bindings, &init.key, old.as_ref(), init.socket.as_ref());
            }
            None => {
                for binding in inner.bindings.iter().filter(|b| b.path == init.key) {
                    binding.attach_to(init.socket.as_ref());
                }
            }
        }
        Ok(init)
    }

    /// Remove the binding with `unique_id`. A miss is not an error.
    pub fn unregister(&self, unique_id: &str) -> bool {
        self.take(unique_id).is_some()
    }

    /// Remove and return the first binding with `unique_id`.
    pub fn take(&self, unique_id: &str) -> Option<Arc<ListenerBinding>> {
        let mut inner = self.lock();
        let idx = inner.bindings.iter().position(|b| b.unique_id == unique_id)?;
        Some(inner.bindings.remove(idx))
    }

    /// Remove and return the binding only if both id and event name match.
    pub fn take_matching(&self, event_name: &str, unique_id: &str) -> Option<Arc<ListenerBinding>> {
        let mut inner = self.lock();
        take_matching_locked(&mut inner.bindings, event_name, unique_id)
    }

    /// Remove the binding matching both id and event name and detach it from
    /// the connection it is attached to, as one step.
    pub fn take_and_detach(
        &self,
        directory: &ConnectionDirectory,
        event_name: &str,
        unique_id: &str,
    ) -> Option<Arc<ListenerBinding>> {
        let mut inner = self.lock();
        let binding = take_matching_locked(&mut inner.bindings, event_name, unique_id)?;
        if let Some(socket) = directory.resolve(&binding.path) {
            binding.detach_from(socket.as_ref());
        }
        Some(binding)
    }

    /// Look up a binding without removing it.
    #[must_use]
    pub fn get(&self, unique_id: &str) -> Option<Arc<ListenerBinding>> {
        self.lock()
            .bindings
            .iter()
            .find(|b| b.unique_id == unique_id)
            .cloned()
    }

    /// Whether a binding with `unique_id` is active.
    #[must_use]
    pub fn contains(&self, unique_id: &str) -> bool {
        self.lock().bindings.iter().any(|b| b.unique_id == unique_id)
    }

    /// Number of active bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().bindings.len()
    }

    /// Whether no bindings are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().bindings.is_empty()
    }

    /// Whether teardown has closed the registry to new bindings.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Ids of every active binding, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.lock()
            .bindings
            .iter()
            .map(|b| b.unique_id.clone())
            .collect()
    }

    /// Active bindings registered against `path`, in registration order.
    #[must_use]
    pub fn bindings_for(&self, path: &str) -> Vec<Arc<ListenerBinding>> {
        self.lock()
            .bindings
            .iter()
            .filter(|b| b.path == path)
            .cloned()
            .collect()
    }

    /// Move every binding for `path` from a replaced connection to its successor.
    ///
    /// Bindings stay registered (their ids remain valid on the consumer side).
    /// Single-shot bindings that already fired are not re-attached.
    pub fn migrate(&self, path: &str, old: &dyn SocketClient, new: &dyn SocketClient) -> usize {
        let inner = self.lock();
        migrate_locked(&inner.bindings, path, old, new)
    }

    /// Detach every binding from every known connection, empty the set and
    /// close the registry to further registrations.
    ///
    /// Idempotent: a second call finds nothing to detach. Returns the number
    /// of bindings removed.
    pub fn clear_all(&self, directory: &ConnectionDirectory) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        if inner.bindings.is_empty() {
            return 0;
        }

        let sockets = directory.sockets();
        for binding in &inner.bindings {
            for (_, socket) in &sockets {
                binding.detach_from(socket.as_ref());
            }
        }

        let removed = inner.bindings.len();
        inner.bindings.clear();
        log::debug!("[socketio] Cleared {removed} listener binding(s)");
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("ListenerRegistry mutex poisoned")
    }
}

fn log_registered(binding: &ListenerBinding) {
    log::debug!(
        "[socketio] Registered {} '{}' on {} as {}",
        if binding.once { "once" } else { "on" },
        binding.event_name,
        binding.path,
        binding.unique_id
    );
}

fn take_matching_locked(
    bindings: &mut Vec<Arc<ListenerBinding>>,
    event_name: &str,
    unique_id: &str,
) -> Option<Arc<ListenerBinding>> {
    let idx = bindings
        .iter()
        .position(|b| b.unique_id == unique_id && b.event_name == event_name)?;
    Some(bindings.remove(idx))
}

fn migrate_locked(
    bindings: &[Arc<ListenerBinding>],
    path: &str,
    old: &dyn SocketClient,
    new: &dyn SocketClient,
) -> usize {
    let mut moved = 0;
    for binding in bindings.iter().filter(|b| b.path == path) {
        binding.detach_from(old);
        if binding.once && binding.has_fired() {
            continue;
        }
        binding.attach_to(new);
        moved += 1;
    }
    log::debug!("[socketio] Migrated {moved} listener(s) on {path} to new connection");
    moved
}
