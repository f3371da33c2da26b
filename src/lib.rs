//! Virtual wires for device emulation.
//!
//! A [`Wire`] holds the value most strongly asserted by any number of
//! attached [`Driver`]s. Each driver asserts a [`Drive`]: hi-Z, or a
//! digital or analog level at one of eight [`Strength`]s. The strongest
//! attached driver determines the wire's value and mode; equal-strongest
//! drivers that disagree put the wire into conflict, where the sensed
//! value carries no meaning. A driver can feed many wires at once, so a
//! single weak driver works as a shared pull-up.
//!
//! Digital and analog driving and sensing mix freely: an analog signal at
//! or above half the wire's intrinsic value senses as digital true, and a
//! digital signal senses as the intrinsic value or zero. Sensing is always
//! a plain read of the cached resolved state.
//!
//! Change listeners registered with [`Wire::listen`] run when the wire's
//! value changes, when it falls to or rises from hi-Z, or when it enters
//! or leaves conflict. [`multi_drive`] updates many drivers coherently,
//! resolving every affected wire before any listener runs, and
//! [`multi_listen`] watches a bundle of wires as a single bit vector.
//!
//! Everything is single-threaded and synchronous: notifications run on
//! the driving call, and handles are neither `Send` nor `Sync`.

mod bundle;
mod driver;
mod irq;
mod signal;
mod wire;


pub use bundle::{multi_listen, multi_sense, MultiListener};
pub use driver::{multi_drive, DriveCmd, Driver};
pub use irq::{irq_driver, listen_irq, IrqSink};
pub use signal::{Drive, Level, Strength};
pub use wire::{ListenerId, Wire};
