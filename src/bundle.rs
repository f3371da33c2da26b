use crate::signal::Strength;
use crate::wire::{ListenerId, Wire, WireState};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

// Widest bundle that fits the bit-vector result.
const MAX_BITS: usize = 32;

/// Senses a bundle of wires as a bit vector.
///
/// Bit `i` is the digital value of `wires[i]`; bundles are clamped to the
/// first 32 wires. `None` entries sense hi-Z/false. The returned strength
/// is the weakest across the clamped bundle. Bits contributed by hi-Z
/// wires carry no meaning, so callers must consult the strength.
pub fn multi_sense(wires: &[Option<&Wire>]) -> (u32, Strength) {
    let mut bits = 0u32;
    let mut weakest = Strength::HiZ;

    for (i, wire) in wires.iter().take(MAX_BITS).enumerate() {
        let (value, strength) = match wire {
            Some(wire) => wire.sense(),
            None => (false, Strength::HiZ),
        };

        if value {
            bits |= 1 << i;
        }
        if i == 0 || strength < weakest {
            weakest = strength;
        }
    }

    (bits, weakest)
}

struct BundleState {
    // Held weakly: registering a bundle listener must not keep its wires
    // alive, and the wires' listener lists reach this state through the
    // leaf callbacks. Dead entries sense like gaps.
    wires: Vec<Option<Weak<RefCell<WireState>>>>,
    bits: u32,
    weakest: Strength,
    in_conflict: bool,
}

type BundleHandler = Rc<RefCell<dyn FnMut(u32, Strength)>>;

/// Token for a registered multi-wire listener.
///
/// Dropping the token removes every per-wire listener it installed.
#[must_use = "dropping the token unregisters the listener"]
pub struct MultiListener {
    registrations: Vec<(Wire, ListenerId)>,
}

/// Watches a bundle of wires as one value.
///
/// `handler` receives the bundle's bit vector and weakest strength, as
/// produced by [`multi_sense`], whenever the combined value meaningfully
/// changes: a conflict appearing or fully clearing, the weakest strength
/// crossing the hi-Z boundary, or the bits changing while driven. While
/// any wire of the bundle remains in conflict the handler is held back, so
/// a conflicted bundle does not flap. Bundles wider than 32 wires signal
/// on every driven change because the bit vector is lossy.
///
/// Returns `None` for an empty bundle.
pub fn multi_listen(
    wires: &[Option<&Wire>],
    handler: impl FnMut(u32, Strength) + 'static,
) -> Option<MultiListener> {
    if wires.is_empty() {
        return None;
    }

    let state = Rc::new(RefCell::new(BundleState {
        wires: wires
            .iter()
            .map(|wire| wire.map(|wire| Rc::downgrade(&wire.state)))
            .collect(),
        bits: 0,
        weakest: Strength::HiZ,
        in_conflict: false,
    }));
    let handler: BundleHandler = Rc::new(RefCell::new(handler));

    let mut registrations = Vec::new();
    for &wire in wires.iter().flatten() {
        let state = Rc::clone(&state);
        let handler = Rc::clone(&handler);
        let id = wire.listen(move |_| bundle_update(&state, &handler));
        registrations.push((wire.clone(), id));
    }

    Some(MultiListener { registrations })
}

impl MultiListener {
    /// Removes every per-wire listener. Equivalent to dropping the token.
    pub fn unlisten(self) {}
}

impl Drop for MultiListener {
    fn drop(&mut self) {
        for (wire, id) in &self.registrations {
            wire.unlisten(*id);
        }
    }
}

// Runs on every notification of any wire in the bundle.
fn bundle_update(state: &Rc<RefCell<BundleState>>, handler: &BundleHandler) {
    let fire = {
        let mut st = state.borrow_mut();

        let wires: Vec<Option<Wire>> = st
            .wires
            .iter()
            .map(|wire| {
                wire.as_ref()
                    .and_then(Weak::upgrade)
                    .map(|state| Wire { state })
            })
            .collect();

        let in_conflict = wires.iter().flatten().any(Wire::is_conflicted);
        if in_conflict && st.in_conflict {
            // Hold the handler back while the conflict persists.
            None
        } else {
            let refs: Vec<Option<&Wire>> = wires.iter().map(Option::as_ref).collect();
            let (bits, weakest) = multi_sense(&refs);

            let changed = (in_conflict != st.in_conflict)
                || (weakest.is_hi_z() != st.weakest.is_hi_z())
                || (!weakest.is_hi_z() && (bits != st.bits || st.wires.len() > MAX_BITS));

            if changed {
                st.bits = bits;
                st.weakest = weakest;
                st.in_conflict = in_conflict;
                Some((bits, weakest))
            } else {
                None
            }
        }
    };

    // Invoke with no borrows held so the handler may drive wires.
    if let Some((bits, weakest)) = fire {
        match handler.try_borrow_mut() {
            Ok(mut handler) => handler(bits, weakest),
            Err(_) => tracing::warn!("skipping reentrant bundle handler invocation"),
        }
    }
}
