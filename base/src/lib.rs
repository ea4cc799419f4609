//! The `base` crate defines the hardware-independent pieces of the
//! 9800-series calculator emulation: the bit-serial shift register
//! which every register on the CPU board is built from, the masked
//! address types used on the memory and I/O buses, and the reader for
//! the ROM dumps the control store and ALU tables are built from.
//!
//! Nothing in here knows about micro-instructions; that lives in the
//! `cpu` crate.

mod types;

pub mod bitreg;
pub mod collections;
pub mod prelude;
pub mod romdump;
