use crate::driver::Driver;
use crate::signal::Strength;
use crate::wire::{ListenerId, Wire};

/// Destination for an interrupt level, as exposed by emulated interrupt
/// controllers.
pub trait IrqSink {
    fn set_level(&mut self, level: bool);
}

impl<F: FnMut(bool)> IrqSink for F {
    #[inline]
    fn set_level(&mut self, level: bool) {
        self(level)
    }
}

/// Forwards the wire's digital value to `sink` on every change.
///
/// A change that leaves the wire hi-Z is reported as a diagnostic and not
/// forwarded; the sink keeps its previous level.
pub fn listen_irq(wire: &Wire, mut sink: impl IrqSink + 'static) -> ListenerId {
    wire.listen(move |wire| {
        let (value, strength) = wire.sense();
        if strength.is_hi_z() {
            tracing::warn!("wire feeding an irq line is hi-Z");
        } else {
            sink.set_level(value);
        }
    })
}

/// Returns a handler that converts integer irq levels into digital drives
/// of `driver` at the default strength.
pub fn irq_driver(driver: Driver) -> impl FnMut(i32) {
    move |level| driver.drive(Strength::DEFAULT, level != 0)
}
