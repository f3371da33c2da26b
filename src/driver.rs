use crate::signal::{Drive, Strength};
use crate::wire::{self, Wire, WireState};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) struct DriverState {
    pub(crate) drive: Drive,
    // Weak back-index of the wires this driver feeds, maintained in
    // lock-step with the wires' attachment lists. Drivers do not own
    // their wires.
    pub(crate) wires: SmallVec<[Weak<RefCell<WireState>>; 2]>,
    pub(crate) dirty: bool,
}

/// A signal source attachable to any number of wires.
///
/// `Driver` is a cheap cloneable handle. A driver asserts one
/// [`Drive`] at a time and feeds it to every attached wire; a single
/// driver can serve as a shared pull-up for many wires without
/// cross-interference. Attachments keep the driver alive even after the
/// last external handle is dropped.
#[derive(Clone)]
pub struct Driver {
    pub(crate) state: Rc<RefCell<DriverState>>,
}

impl Driver {
    /// Creates a driver in the hi-Z state, attached to nothing.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(DriverState {
                drive: Drive::HighZ,
                wires: SmallVec::new(),
                dirty: false,
            })),
        }
    }

    /// Creates a hi-Z driver already attached to `wire`.
    pub fn attached(wire: &Wire) -> Self {
        let driver = Self::new();
        wire.attach(&driver);
        driver
    }

    /// The drive currently asserted by this driver.
    pub fn output(&self) -> Drive {
        self.state.borrow().drive
    }

    /// Drives a digital value at `strength`.
    pub fn drive(&self, strength: Strength, value: bool) {
        self.apply(Drive::digital(strength, value));
    }

    /// Drives an analog value in microvolts at `strength`.
    pub fn drive_analog(&self, strength: Strength, microvolts: i32) {
        self.apply(Drive::analog(strength, microvolts));
    }

    /// Stops driving.
    pub fn drive_z(&self) {
        self.apply(Drive::HighZ);
    }

    /// Asserts an arbitrary [`Drive`], updating and notifying every
    /// attached wire.
    pub fn apply(&self, drive: Drive) {
        multi_drive(&[DriveCmd {
            driver: self.clone(),
            drive,
        }]);
    }

    /// Detaches this driver from every wire it feeds, re-resolving and
    /// notifying each one.
    pub fn detach_all(&self) {
        loop {
            let wire = {
                let drv = self.state.borrow();
                drv.wires.iter().rev().find_map(Weak::upgrade)
            };

            match wire {
                Some(state) => Wire { state }.detach(self),
                None => {
                    self.state.borrow_mut().wires.clear();
                    break;
                }
            }
        }
    }

    pub(crate) fn live_wires(&self) -> SmallVec<[Rc<RefCell<WireState>>; 2]> {
        self.state
            .borrow()
            .wires
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl PartialEq for Driver {
    /// Handles compare by identity: two handles are equal when they refer
    /// to the same driver.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Driver {}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Driver")
            .field("drive", &st.drive)
            .field("wires", &st.wires.len())
            .finish()
    }
}

/// One entry of a coherent multi-driver update.
#[derive(Debug, Clone)]
pub struct DriveCmd {
    pub driver: Driver,
    pub drive: Drive,
}

/// Applies many drive changes as one coherent update.
///
/// Every wire fed by a changed driver is re-resolved exactly once, and its
/// listeners run exactly once, only after all affected wires hold their
/// final state. Entries equal to the driver's current output are skipped
/// entirely, so re-applying a batch is idempotent.
///
/// Listeners invoked from the final phase may themselves drive wires
/// (including other wires of this batch); such nested updates complete
/// inline before the outer batch continues.
pub fn multi_drive(cmds: &[DriveCmd]) {
    // Write the new outputs into the drivers and mark the affected wires.
    for cmd in cmds {
        let mut drv = cmd.driver.state.borrow_mut();
        if drv.drive == cmd.drive {
            continue;
        }

        drv.drive = cmd.drive;
        drv.dirty = true;
        for wire in &drv.wires {
            if let Some(wire) = wire.upgrade() {
                wire.borrow_mut().driver_changed = true;
            }
        }
    }

    // Resolve each marked wire once, even when several of its drivers
    // changed in this batch.
    for cmd in cmds {
        if !cmd.driver.state.borrow().dirty {
            continue;
        }

        for state in cmd.driver.live_wires() {
            if state.borrow().driver_changed {
                wire::update(&state);
                state.borrow_mut().driver_changed = false;
            }
        }
    }

    // All affected wires now hold their final state; run the listeners.
    for cmd in cmds {
        {
            let mut drv = cmd.driver.state.borrow_mut();
            if !drv.dirty {
                continue;
            }
            drv.dirty = false;
        }

        for state in cmd.driver.live_wires() {
            wire::notify_if_changed(&Wire { state });
        }
    }
}
