use crate::driver::{Driver, DriverState};
use crate::signal::{observed_change, resolve, Drive, Level, Resolution, Strength};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Identifies one listener registration on one wire.
///
/// Ids are unique for the lifetime of the wire and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ListenerId(u64);

pub(crate) type Callback = Rc<RefCell<dyn FnMut(&Wire)>>;

struct ListenerEntry {
    id: ListenerId,
    callback: Callback,
}

pub(crate) struct WireState {
    pub(crate) intrinsic: i32,
    // Each attachment owns one reference to its driver.
    pub(crate) attachments: SmallVec<[Rc<RefCell<DriverState>>; 2]>,
    listeners: SmallVec<[ListenerEntry; 2]>,
    next_listener: u64,
    pub(crate) signal: Drive,
    pub(crate) conflict: bool,
    pub(crate) changed: bool,
    pub(crate) in_callback: bool,
    pub(crate) driver_changed: bool,
}

impl Drop for WireState {
    fn drop(&mut self) {
        // The attachment references drop with the list. The drivers' weak
        // back-references to this wire are already dead; prune them so the
        // back-index stays in step with the attachments.
        for driver in &self.attachments {
            driver
                .borrow_mut()
                .wires
                .retain(|wire| wire.upgrade().is_some());
        }
    }
}

/// A node aggregating any number of [`Driver`]s into one resolved signal,
/// with a list of change listeners.
///
/// `Wire` is a cheap cloneable handle; clones refer to the same wire. The
/// resolved signal is cached, so sensing is always a plain read. When the
/// last handle drops, the wire detaches all of its drivers and drops its
/// listeners.
#[derive(Clone)]
pub struct Wire {
    pub(crate) state: Rc<RefCell<WireState>>,
}

impl Wire {
    /// Default analog scale, 3.3 V in microvolts.
    pub const INTRINSIC_DEFAULT: i32 = 3_300_000;

    /// Creates a wire with no drivers and no listeners, sensing hi-Z.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(WireState {
                intrinsic: Self::INTRINSIC_DEFAULT,
                attachments: SmallVec::new(),
                listeners: SmallVec::new(),
                next_listener: 0,
                signal: Drive::HighZ,
                conflict: false,
                changed: false,
                in_callback: false,
                driver_changed: false,
            })),
        }
    }

    /// Attaches `driver` to this wire.
    ///
    /// The attachment holds a reference to the driver for as long as it
    /// exists. Attaching alone does not re-resolve the wire; callers
    /// normally attach first and drive afterwards. A driver may be attached
    /// to many wires, and to the same wire more than once.
    pub fn attach(&self, driver: &Driver) {
        self.state
            .borrow_mut()
            .attachments
            .push(Rc::clone(&driver.state));
        driver
            .state
            .borrow_mut()
            .wires
            .push(Rc::downgrade(&self.state));
    }

    /// Removes one attachment of `driver`, then re-resolves the wire and
    /// notifies listeners of any resulting change.
    ///
    /// Has no effect beyond the re-resolution if the driver is not
    /// attached.
    pub fn detach(&self, driver: &Driver) {
        {
            let mut drv = driver.state.borrow_mut();
            if let Some(pos) = drv
                .wires
                .iter()
                .rposition(|wire| wire.as_ptr() == Rc::as_ptr(&self.state))
            {
                drv.wires.remove(pos);
            }
        }

        {
            let mut st = self.state.borrow_mut();
            if let Some(pos) = st
                .attachments
                .iter()
                .rposition(|attachment| Rc::ptr_eq(attachment, &driver.state))
            {
                st.attachments.remove(pos);
            }
        }

        update(&self.state);
        notify_if_changed(self);
    }

    /// The analog scale used when converting between digital and analog
    /// values on this wire.
    pub fn intrinsic(&self) -> i32 {
        self.state.borrow().intrinsic
    }

    /// Sets the analog scale for digital/analog conversion.
    pub fn set_intrinsic(&self, microvolts: i32) {
        self.state.borrow_mut().intrinsic = microvolts;
    }

    /// Senses the wire digitally, returning the value and drive strength.
    ///
    /// An analog signal reads true at or above half the wire's intrinsic
    /// value. An undriven wire senses `(false, Strength::HiZ)`; a wire in
    /// conflict senses the latched best signal, which carries no meaning.
    pub fn sense(&self) -> (bool, Strength) {
        let st = self.state.borrow();
        let value = match st.signal.level() {
            None => false,
            Some(Level::Digital(value)) => value,
            Some(Level::Analog(microvolts)) => microvolts >= st.intrinsic / 2,
        };
        (value, st.signal.strength())
    }

    /// Senses the wire's analog value in microvolts.
    ///
    /// A digital signal reads as the intrinsic value when true and 0 when
    /// false. An undriven wire senses `(0, Strength::HiZ)`.
    pub fn sense_analog(&self) -> (i32, Strength) {
        let st = self.state.borrow();
        let value = match st.signal.level() {
            None => 0,
            Some(Level::Analog(microvolts)) => microvolts,
            Some(Level::Digital(value)) => {
                if value {
                    st.intrinsic
                } else {
                    0
                }
            }
        };
        (value, st.signal.strength())
    }

    /// The strength of the strongest attached driver, hi-Z when undriven.
    pub fn strength(&self) -> Strength {
        self.state.borrow().signal.strength()
    }

    #[inline]
    pub fn is_hi_z(&self) -> bool {
        self.strength().is_hi_z()
    }

    /// Whether equal-strongest drivers currently disagree on the value.
    pub fn is_conflicted(&self) -> bool {
        self.state.borrow().conflict
    }

    /// Registers a change listener, returning its id.
    ///
    /// The listener runs with the wire's cached state already updated.
    /// Listeners added last are invoked first, and a listener may
    /// unregister itself from within its own callback.
    pub fn listen(&self, handler: impl FnMut(&Wire) + 'static) -> ListenerId {
        let mut st = self.state.borrow_mut();
        let id = ListenerId(st.next_listener);
        st.next_listener += 1;
        st.listeners.push(ListenerEntry {
            id,
            callback: Rc::new(RefCell::new(handler)),
        });
        id
    }

    /// Removes the most recently added listener matching `id`.
    ///
    /// Returns whether a listener was removed. Valid during a callback,
    /// including on the listener currently running.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut st = self.state.borrow_mut();
        match st.listeners.iter().rposition(|listener| listener.id == id) {
            Some(pos) => {
                st.listeners.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl PartialEq for Wire {
    /// Handles compare by identity: two handles are equal when they refer
    /// to the same wire.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Wire {}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Wire")
            .field("signal", &st.signal)
            .field("conflict", &st.conflict)
            .field("attachments", &st.attachments.len())
            .field("listeners", &st.listeners.len())
            .finish()
    }
}

/// Recomputes the wire's resolved signal from its attachments, accumulating
/// the observable-change flag for a later notification sweep.
pub(crate) fn update(state: &Rc<RefCell<WireState>>) {
    let mut st = state.borrow_mut();

    let new = resolve(st.attachments.iter().map(|driver| driver.borrow().drive));
    let old = Resolution {
        signal: st.signal,
        conflict: st.conflict,
    };

    st.changed |= observed_change(old, new);
    st.signal = new.signal;
    st.conflict = new.conflict;
}

/// Runs the wire's listeners if a change is pending. The changed flag is
/// cleared before the sweep so that updates triggered from inside a
/// listener are tracked on their own.
pub(crate) fn notify_if_changed(wire: &Wire) {
    let pending = {
        let mut st = wire.state.borrow_mut();
        std::mem::replace(&mut st.changed, false)
    };

    if pending {
        call_listeners(wire);
    }
}

fn call_listeners(wire: &Wire) {
    {
        let mut st = wire.state.borrow_mut();
        if st.in_callback {
            tracing::warn!("wire listener altered its own wire");
        }
        st.in_callback = true;
    }

    // Reverse insertion order, so a listener removing itself (or any later
    // entry) never causes another listener to be skipped.
    let mut i = wire.state.borrow().listeners.len();
    while i > 0 {
        i -= 1;

        let callback = {
            let st = wire.state.borrow();
            match st.listeners.get(i) {
                Some(listener) => Rc::clone(&listener.callback),
                // Listeners were removed during the sweep.
                None => continue,
            }
        };

        match callback.try_borrow_mut() {
            Ok(mut callback) => callback(wire),
            // The same listener is already running further up the stack.
            Err(_) => tracing::warn!("skipping reentrant listener invocation"),
        };
    }

    wire.state.borrow_mut().in_callback = false;
}
