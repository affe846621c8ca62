//! Interrupt token for waking threads blocked on edges.
//!
//! Steps are never interrupted. A token only wakes threads parked inside a
//! blocking edge operation, which then return [`Interrupted`](crate::errors::Interrupted).

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// A callback type for interrupt notifications.
pub type InterruptCallback = Box<dyn Fn() + Send + Sync>;

struct TokenState {
    /// Whether the interrupt has fired.
    cancelled: AtomicBool,
    /// The reason for the interrupt (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on interrupt.
    callbacks: RwLock<Vec<InterruptCallback>>,
    /// Child tokens that have neither fired nor been dropped.
    children: Mutex<Vec<Weak<TokenState>>>,
    /// Dropped on interrupt, which disconnects `signal`.
    trigger: Mutex<Option<Sender<()>>>,
    /// Becomes ready once the interrupt fires.
    signal: Receiver<()>,
}

/// A cloneable, one-shot interrupt.
///
/// Interruption is idempotent: only the first reason is kept.
#[derive(Clone)]
pub struct InterruptToken {
    state: Arc<TokenState>,
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptToken {
    /// Creates a new token.
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                reason: RwLock::new(None),
                callbacks: RwLock::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Creates a token that fires when this one does, but can also fire alone.
    ///
    /// The parent only keeps a weak link, and links to children that have
    /// fired or been dropped are pruned whenever a new child is created.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self.state.children.lock();
            children.retain(|weak| {
                weak.upgrade()
                    .is_some_and(|state| !state.cancelled.load(Ordering::SeqCst))
            });
            if !self.is_cancelled() {
                children.push(Arc::downgrade(&child.state));
                return child;
            }
        }
        child.cancel("parent interrupted");
        child
    }

    /// Fires the interrupt.
    ///
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let callbacks = {
            let mut guard = self.state.callbacks.write();
            if self
                .state
                .cancelled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            std::mem::take(&mut *guard)
        };

        *self.state.reason.write() = Some(reason.into());
        self.state.trigger.lock().take();
        let children = std::mem::take(&mut *self.state.children.lock());

        for callback in &callbacks {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback();
            })) {
                warn!("Interrupt callback panicked: {:?}", e);
            }
        }
        for state in children.iter().filter_map(Weak::upgrade) {
            Self { state }.cancel("parent interrupted");
        }
    }

    /// Registers a callback to be invoked on interrupt.
    ///
    /// If already fired, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut guard = self.state.callbacks.write();
            if !self.is_cancelled() {
                guard.push(Box::new(callback));
                return;
            }
        }
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback();
        })) {
            warn!("Interrupt callback panicked: {:?}", e);
        }
    }

    /// Returns whether the interrupt has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the interrupt reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.reason.read().clone()
    }

    /// Channel that becomes ready (disconnected) once the interrupt fires.
    ///
    /// Meant for `crossbeam_channel::select!` next to a blocking operation.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.state.signal
    }
}

impl std::fmt::Debug for InterruptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
