//! IPC doorbell handshake and opcode dispatch.
//!
//! The firmware raises a request by setting the BUSY bit in `HIPCTDR`; we
//! dispatch the opcode, clear BUSY to acknowledge receipt, and (for every
//! recognized opcode) set the DONE bit plus a response value in `HIPCTDA`.
//! An unrecognized opcode is reported to the error channel and deliberately
//! left without DONE — the pending request tells the firmware something is
//! wrong instead of pretending success.
//!
//! The host-initiated direction mirrors the same protocol on the `HIPCID*`
//! registers.  At most one unacknowledged request may be outstanding per
//! direction; callers must see [`is_acked`](IpcResponder::is_acked) before
//! the next [`send`](IpcResponder::send).
//!
//! Opcode 1 (delayed DONE) is the one asynchronous path: dispatch only
//! records a deadline, and [`service`](IpcResponder::service) — called every
//! console loop iteration — writes the DONE bit once the deadline passes.
//! No second thread is involved, so register access stays unsynchronized by
//! design.

use crate::error::Result;
use crate::region::ByteWindow;
use crate::regs::RegisterBank;
use adsp_chip::ipc::{opcode, BUSY_BIT, DONE_BIT};
use adsp_chip::windows::{INBOX_OFFSET, OUTBOX_OFFSET};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Delay before the opcode-1 completion fires.
pub const DELAYED_DONE_DELAY: Duration = Duration::from_millis(100);

/// Name of the power-control register in an attached power bank.
pub const POWER_REGISTER: &str = "ADSPCS";

/// Host windows the opcode handlers touch.
#[derive(Debug)]
pub struct HostWindows {
    /// Window 0: firmware status word + outbox (read side of opcode 5).
    pub status: ByteWindow,
    /// Window 1: inbox (write side of opcode 5).
    pub inbox: ByteWindow,
}

/// One side of the IPC handshake: answers target requests, issues host ones.
#[derive(Debug)]
pub struct IpcResponder {
    regs: RegisterBank,
    host: Option<HostWindows>,
    power: Option<RegisterBank>,
    timestamp_us: u64,
    delayed_done: Option<Instant>,
    delay: Duration,
}

impl IpcResponder {
    /// Create a responder over a frozen doorbell register bank.
    ///
    /// The bank must declare `HIPCTDR`, `HIPCTDA`, `HIPCTDD`, `HIPCIDR`,
    /// `HIPCIDA` and `HIPCIDD`.
    #[must_use]
    pub fn new(regs: RegisterBank) -> Self {
        Self {
            regs,
            host: None,
            power: None,
            timestamp_us: 0,
            delayed_done: None,
            delay: DELAYED_DONE_DELAY,
        }
    }

    /// Attach the host windows opcode 5 copies between.
    #[must_use]
    pub fn with_host_windows(mut self, windows: HostWindows) -> Self {
        self.host = Some(windows);
        self
    }

    /// Attach the power-control bank opcode 3 writes through.
    ///
    /// The bank must declare [`POWER_REGISTER`]; one that does not is
    /// rejected here so a later set-power request degrades to the same
    /// warn-and-acknowledge path as having no bank, instead of failing the
    /// console loop.  Test-only diagnostic path.
    #[must_use]
    pub fn with_power_bank(mut self, bank: RegisterBank) -> Self {
        if bank.contains(POWER_REGISTER) {
            self.power = Some(bank);
        } else {
            tracing::warn!("power bank does not declare {POWER_REGISTER}, ignoring it");
        }
        self
    }

    #[cfg(test)]
    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bring both doorbell directions to a known idle state.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn init(&self) -> Result<()> {
        self.busy_clear()?;
        self.regs.write("HIPCTDA", 0)?;

        self.regs.write("HIPCIDR", 0)?;
        // DONE is write-one-to-clear on the host-initiated ack register
        self.regs.write("HIPCIDA", DONE_BIT)?;
        self.regs.write("HIPCIDD", 0)?;
        Ok(())
    }

    /// True if the firmware has a request waiting.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn is_request_pending(&self) -> Result<bool> {
        Ok(self.regs.read("HIPCTDR")? & BUSY_BIT != 0)
    }

    /// Fetch the pending request payload, if any.
    ///
    /// Returns `(data, ext_data)` with the BUSY bit stripped from `data`.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn pending_request(&self) -> Result<Option<(u32, u32)>> {
        if !self.is_request_pending()? {
            return Ok(None);
        }
        let data = self.regs.read("HIPCTDR")? & !BUSY_BIT;
        let ext_data = self.regs.read("HIPCTDD")?;
        Ok(Some((data, ext_data)))
    }

    /// Dispatch one target-initiated request.
    ///
    /// Clears BUSY unconditionally; sets DONE for every recognized opcode
    /// (deferred for opcode 1); sends the echo message where the opcode asks
    /// for one.
    ///
    /// # Errors
    ///
    /// Propagates register and window access failures.  An unrecognized
    /// opcode is not an error here — it is reported to the error channel and
    /// the request stays unacknowledged.
    pub fn process(&mut self, data: u32, ext_data: u32) -> Result<()> {
        let mut send_msg = false;
        let mut done = true;
        let mut ext = ext_data;

        match data {
            opcode::NOP => {}
            opcode::DELAYED_DONE => {
                self.delayed_done = Some(Instant::now() + self.delay);
                done = false; // completed by service() after the delay
            }
            opcode::ECHO => send_msg = true,
            opcode::SET_POWER => match &self.power {
                Some(bank) => bank.write(POWER_REGISTER, ext_data)?,
                None => tracing::warn!("IPC set-power request with no power bank attached"),
            },
            opcode::TIMESTAMP => {
                let now = epoch_micros();
                #[allow(clippy::cast_possible_truncation)]
                {
                    ext = now.wrapping_sub(self.timestamp_us) as u32;
                }
                self.timestamp_us = now;
                send_msg = true;
            }
            opcode::COPY_WORD => {
                if let Some(windows) = &self.host {
                    let src = OUTBOX_OFFSET + 4 * (ext_data >> 16) as usize;
                    let dst = INBOX_OFFSET + 4 * (ext_data & 0xffff) as usize;
                    let mut word = [0u8; 4];
                    windows.status.read_bytes(src, &mut word)?;
                    windows.inbox.write_bytes(dst, &word)?;
                }
            }
            _ => {
                tracing::error!("Unrecognized IPC command {data:#x} ext {ext_data:#x}");
                send_msg = false;
                done = false;
            }
        }

        self.busy_clear()?;

        if done {
            self.respond(0)?;
        }

        if send_msg {
            self.send(ext, ext)?;
        }

        Ok(())
    }

    /// Complete an elapsed opcode-1 delayed acknowledgment, if one is due.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn service(&mut self) -> Result<()> {
        if let Some(due) = self.delayed_done {
            if Instant::now() >= due {
                self.delayed_done = None;
                self.respond(0)?;
            }
        }
        Ok(())
    }

    /// Send a host-initiated request to the firmware.
    ///
    /// Callers must not send again before [`is_acked`](Self::is_acked)
    /// reports the previous request cleared.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn send(&self, data: u32, ext_data: u32) -> Result<()> {
        self.regs.write("HIPCIDD", ext_data)?;
        self.regs.write("HIPCIDR", BUSY_BIT | data)
    }

    /// True once the firmware has accepted the last host-initiated request.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn is_acked(&self) -> Result<bool> {
        Ok(self.regs.read("HIPCIDR")? & BUSY_BIT == 0)
    }

    /// Response to the last host-initiated request, or `None` if not ready.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn read_response(&self) -> Result<Option<u32>> {
        let ack = self.regs.read("HIPCIDA")?;
        if ack & DONE_BIT == 0 {
            Ok(None)
        } else {
            Ok(Some(ack & !DONE_BIT))
        }
    }

    /// Acknowledge receipt: clear the firmware's BUSY bit (write-one-to-clear).
    fn busy_clear(&self) -> Result<()> {
        self.regs.write("HIPCTDR", BUSY_BIT)
    }

    /// Signal completion: DONE bit plus response value.
    fn respond(&self, response: u32) -> Result<()> {
        self.regs.write("HIPCTDA", DONE_BIT | (response & !DONE_BIT))
    }
}

fn epoch_micros() -> u64 {
    // Wall-clock micros, matching what the firmware-facing protocol expects.
    // Truncation to u64 holds for the next ~500k years.
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
