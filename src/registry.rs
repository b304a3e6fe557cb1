/*
 * registry.rs
 *
 * Event code -> ordered listener list. Insertion order is invocation order.
 *
 * Slots sit behind one mutex, but dispatch never calls a listener while
 * holding it: it clones the Arc'd listeners out, drops the guard, then
 * runs them. So a listener may register, unregister, or dispatch again
 * (raising LibraryError from inside a listener is the common case)
 * without deadlocking. A dispatch already running sees the snapshot it
 * took.
 *
 * The LibraryError slot starts as Default(handler). The first register
 * on it swaps to Custom([listener]) and the default is gone for good.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BootError, Result};
use crate::event::{Event, EventCode, NUMBER_OF_EVENTS};

/// A listener callback. It only ever sees the event code.
pub type Listener = Arc<dyn Fn(Event) + Send + Sync + 'static>;

/// Identity of one registration, returned by `register`.
///
/// Unique for the life of the process, so removing by id can never hit
/// somebody else's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/* listener list for one slot */
enum Listeners {
    /* built-in fallback, replaced wholesale by the first real listener */
    Default(Listener),
    Custom(Vec<(ListenerId, Listener)>),
}

impl Listeners {
    fn snapshot(&self) -> Vec<Listener> {
        match self {
            Self::Default(listener) => vec![Arc::clone(listener)],
            Self::Custom(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Default(_) => 1,
            Self::Custom(list) => list.len(),
        }
    }
}

/// Ordered listener lists, one per event code.
pub struct EventRegistry {
    slots: Mutex<Vec<Listeners>>,
}

impl EventRegistry {
    /// Allocate every slot, all empty.
    #[must_use]
    pub fn new() -> Self {
        let slots = (0..NUMBER_OF_EVENTS)
            .map(|_| Listeners::Custom(Vec::new()))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /* validate a raw code without touching any slot */
    fn resolve(code: impl EventCode) -> Result<Event> {
        Event::try_from(code.raw_code())
    }

    /// Append `listener` to the slot for `code`.
    ///
    /// If the slot still holds its default, the default is dropped and
    /// `listener` becomes the only entry.
    pub fn register<F>(&self, code: impl EventCode, listener: F) -> Result<ListenerId>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let event = Self::resolve(code)?;
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);

        let mut slots = self.slots.lock();
        let slot = &mut slots[event.index()];
        match slot {
            Listeners::Default(_) => {
                debug!(target: "sigboot", %event, "default listener replaced");
                *slot = Listeners::Custom(vec![(id, listener)]);
            }
            Listeners::Custom(list) => list.push((id, listener)),
        }
        debug!(
            target: "sigboot",
            %event,
            position = slot.len() - 1,
            "new event listener"
        );
        Ok(id)
    }

    /// Install a fallback that the first `register` on `code` discards.
    ///
    /// Replaces whatever the slot held.
    pub fn set_default<F>(&self, code: impl EventCode, listener: F) -> Result<()>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let event = Self::resolve(code)?;
        self.slots.lock()[event.index()] = Listeners::Default(Arc::new(listener));
        Ok(())
    }

    /// Remove the registration `id` from the slot for `code`.
    ///
    /// Exactly the matching entry goes; the order of the rest is kept.
    /// A slot still holding its default has nothing removable.
    pub fn unregister(&self, code: impl EventCode, id: ListenerId) -> Result<()> {
        let event = Self::resolve(code)?;
        let mut slots = self.slots.lock();
        if let Listeners::Custom(list) = &mut slots[event.index()]
            && let Some(pos) = list.iter().position(|(candidate, _)| *candidate == id)
        {
            list.remove(pos);
            debug!(target: "sigboot", %event, id = id.0, "event listener removed");
            return Ok(());
        }
        Err(BootError::ListenerNotFound { event, id: id.0 })
    }

    /// Invoke every listener on `code`, in registration order.
    ///
    /// Empty slots are skipped silently.
    pub fn dispatch(&self, code: impl EventCode) -> Result<()> {
        let event = Self::resolve(code)?;
        let listeners = self.slots.lock()[event.index()].snapshot();
        debug!(
            target: "sigboot",
            %event,
            handlers = listeners.len(),
            "dispatching event"
        );
        for listener in listeners {
            listener(event);
        }
        Ok(())
    }

    /// Number of listeners on `code` (a pending default counts as one).
    pub fn len(&self, code: impl EventCode) -> Result<usize> {
        let event = Self::resolve(code)?;
        Ok(self.slots.lock()[event.index()].len())
    }

    /// True while the slot for `code` still holds its default.
    pub fn is_default(&self, code: impl EventCode) -> Result<bool> {
        let event = Self::resolve(code)?;
        Ok(matches!(
            self.slots.lock()[event.index()],
            Listeners::Default(_)
        ))
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
