//! IPC doorbell register map.
//!
//! Offsets are relative to the IPC base address within the DSP BAR
//! (platform-supplied, see [`crate::windows::WindowLayout`]).
//!
//! Two doorbell pairs exist, one per direction:
//!
//! ```text
//! Target → host  (firmware asks, we answer):
//!   HIPCTDR   request register, BUSY bit + opcode in the low bits
//!   HIPCTDA   acknowledgment register, DONE bit + response value
//!   HIPCTDD   auxiliary 32-bit payload
//!
//! Host → target  (we ask, firmware answers):
//!   HIPCIDR   request register, BUSY bit + opcode
//!   HIPCIDA   acknowledgment register, DONE bit + response value
//!   HIPCIDD   auxiliary 32-bit payload
//! ```

// ── Target-initiated doorbell ────────────────────────────────────────────────

/// Target doorbell request register (BUSY bit = request pending).
pub const HIPCTDR: usize = 0x0000;
/// Target doorbell acknowledgment register (DONE bit + response).
pub const HIPCTDA: usize = 0x0004;
/// Target doorbell data (auxiliary 32-bit payload).
pub const HIPCTDD: usize = 0x0100;

// ── Host-initiated doorbell ──────────────────────────────────────────────────

/// Host doorbell request register.
pub const HIPCIDR: usize = 0x0010;
/// Host doorbell acknowledgment register.
pub const HIPCIDA: usize = 0x0014;
/// Host doorbell data.
pub const HIPCIDD: usize = 0x0180;

// ── Capability / status / control (declared, not exercised by the console) ──

/// IPC capability status register.
pub const HIPCCST: usize = 0x0020;
/// IPC capability set register.
pub const HIPCCSR: usize = 0x0024;
/// IPC control register.
pub const HIPCCTL: usize = 0x0028;
/// IPC capability register.
pub const HIPCCAP: usize = 0x002C;

// ── Handshake bits ───────────────────────────────────────────────────────────

/// Request-pending bit in `HIPCTDR` / `HIPCIDR`.
pub const BUSY_BIT: u32 = 1 << 31;
/// Response-ready bit in `HIPCTDA` / `HIPCIDA`.
pub const DONE_BIT: u32 = 1 << 31;

/// Opcodes the firmware may put in the low bits of `HIPCTDR`.
pub mod opcode {
    /// Do nothing, acknowledge immediately.
    pub const NOP: u32 = 0;
    /// Signal DONE after a short delay instead of immediately.
    pub const DELAYED_DONE: u32 = 1;
    /// Echo `ext_data` back as a host-initiated message.
    pub const ECHO: u32 = 2;
    /// Pass `ext_data` through to the core power-control register (test only).
    pub const SET_POWER: u32 = 3;
    /// Echo microseconds elapsed since the previous timestamp request.
    pub const TIMESTAMP: u32 = 4;
    /// Copy one 32-bit word from the outbox to the inbox.
    pub const COPY_WORD: u32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doorbell_registers_do_not_overlap() {
        assert_ne!(HIPCTDR, HIPCIDR);
        assert_ne!(HIPCTDA, HIPCIDA);
        assert_ne!(HIPCTDD, HIPCIDD);
    }

    #[test]
    fn busy_and_done_are_the_top_bit() {
        assert_eq!(BUSY_BIT, 0x8000_0000);
        assert_eq!(DONE_BIT, 0x8000_0000);
    }
}
