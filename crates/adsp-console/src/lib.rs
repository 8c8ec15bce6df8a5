//! Host-side bring-up console for the Intel audio DSP.
//!
//! The DSP is reached through memory-mapped PCI register windows.  This
//! crate covers the host half of bring-up: present named hardware registers
//! as typed values, answer IPC requests the firmware raises over the
//! busy/done doorbell protocol, and continuously decode the lock-free
//! winstream log ring the firmware writes into a shared memory window.
//!
//! # Architecture
//!
//! ```text
//! Console (cooperative poll loop)
//!   ├── Winstream     — log ring decoder over window 3
//!   └── IpcResponder  — doorbell handshake + opcode dispatch
//!         └── RegisterBank — named registers over the IPC block
//! all over:
//!   ByteWindow → SharedMemory (MappedBar on hardware, SimMemory in tests)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use adsp_console::prelude::*;
//! use adsp_chip::windows::{HostWindow, WindowLayout};
//! use std::sync::Arc;
//!
//! # fn main() -> adsp_console::Result<()> {
//! let layout = WindowLayout::ACE_FPGA;
//! let bar: Arc<dyn SharedMemory> =
//!     Arc::new(MappedBar::new("0000:00:1f.3", 4, ReadStrategy::Bulk)?);
//!
//! let log = ByteWindow::new(
//!     Arc::clone(&bar),
//!     layout.window_offset(HostWindow::Log),
//!     layout.window_size,
//! )?;
//! let winstream = Winstream::new(log, HistoryPolicy::Replay);
//!
//! let mut console = Console::new(winstream, LogSink::Stdout);
//! console.run()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod console;
mod error;
pub mod firmware;
mod ipc;
pub mod region;
mod regs;
mod winstream;

pub use console::{Console, LogSink};
pub use error::{ConsoleError, Result};
pub use firmware::{
    load_firmware, CommandLoader, FirmwareImages, FirmwareLoader, LoadOptions, MIN_FIRMWARE_SIZE,
};
pub use ipc::{HostWindows, IpcResponder, DELAYED_DONE_DELAY, POWER_REGISTER};
pub use region::{ByteWindow, MappedBar, ReadStrategy, SharedMemory, SimMemory};
pub use regs::{RegisterBank, RegisterMap};
pub use winstream::{HistoryPolicy, Winstream};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ByteWindow, Console, ConsoleError, FirmwareImages, HistoryPolicy, HostWindows,
        IpcResponder, LogSink, MappedBar, ReadStrategy, RegisterBank, RegisterMap, Result,
        SharedMemory, SimMemory, Winstream,
    };
}
