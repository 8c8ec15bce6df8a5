//! Host window layout within the DSP BAR.
//!
//! The firmware exposes four fixed-size memory windows to the host.  Their
//! offsets within the BAR are platform specific; the values here are the
//! ACE FPGA defaults and every field can be overridden from the command
//! line for other platforms.
//!
//! ```text
//! Window  Purpose
//! ──────  ─────────────────────────────────────────────
//!   0     Firmware status word + IPC outbox (at +4096)
//!   1     IPC inbox
//!   2     Trace / debug
//!   3     Winstream console log
//! ```

/// Number of host windows the firmware exposes.
pub const WINDOW_COUNT: usize = 4;

/// Byte offset of the IPC outbox within window 0.
pub const OUTBOX_OFFSET: usize = 4096;
/// Byte offset of the IPC inbox within window 1.
pub const INBOX_OFFSET: usize = 0;
/// Byte offset of the firmware status word within window 0.
pub const FW_STATUS_OFFSET: usize = 0;

/// Host window roles, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HostWindow {
    /// Window 0 — firmware status and outbox.
    Status = 0,
    /// Window 1 — inbox.
    Inbox = 1,
    /// Window 2 — trace and debug info.
    Trace = 2,
    /// Window 3 — winstream console log.
    Log = 3,
}

/// Platform window/register placement within the DSP BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    /// Offset of the IPC doorbell register block.
    pub ipc_base: usize,
    /// Offset of host window 0.
    pub window_base: usize,
    /// Distance between consecutive windows.
    pub window_stride: usize,
    /// Size of each window in bytes.
    pub window_size: usize,
}

impl WindowLayout {
    /// Defaults for the ACE FPGA bring-up platform.
    pub const ACE_FPGA: Self = Self {
        ipc_base: 0x0007_3000,
        window_base: 0x0018_0000,
        window_stride: 0x8000,
        window_size: 0x8000,
    };

    /// Offset of host window `n` within the BAR.
    #[must_use]
    pub const fn window_offset(&self, window: HostWindow) -> usize {
        self.window_base + self.window_stride * window as usize
    }
}
