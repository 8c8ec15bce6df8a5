//! Silicon model for the Intel audio DSP (ADSP/ACE class).
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the device as seen from the host side of the PCI bus:
//! IPC doorbell register offsets, host-window layout, and the winstream
//! log-ring header format.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ipc`] | IPC doorbell register offsets, BUSY/DONE bits, opcode numbers |
//! | [`windows`] | Host window layout (status/outbox, inbox, trace, log) |
//! | [`winstream`] | Winstream ring header format constants |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ipc;
pub mod windows;
pub mod winstream;
