//! Winstream log-ring decoder.
//!
//! The firmware appends console text to a single-producer circular buffer
//! (format in [`adsp_chip::winstream`]) without any locking; the host reads
//! it concurrently.  Consistency comes from the header's sequence counter:
//! a decode attempt re-reads the header after copying and retries if the
//! producer advanced mid-copy (a torn read).  A reader that has fallen so
//! far behind that its data was already overwritten silently resynchronizes
//! to the fresh sequence number rather than returning corrupt bytes.

use crate::error::Result;
use crate::region::ByteWindow;
use adsp_chip::winstream::HEADER_BYTES;

/// What to do with log text that predates the first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Replay whatever is still live in the ring.
    #[default]
    Replay,
    /// Start from the present; discard existing entries.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    wlen: u32,
    start: u32,
    end: u32,
    seq: u32,
}

/// Decoder over the winstream log window.
#[derive(Debug)]
pub struct Winstream {
    window: ByteWindow,
    history: HistoryPolicy,
}

impl Winstream {
    /// Create a decoder over the log window.
    #[must_use]
    pub fn new(window: ByteWindow, history: HistoryPolicy) -> Self {
        Self { window, history }
    }

    fn header(&self) -> Result<Header> {
        let mut raw = [0u8; HEADER_BYTES];
        self.window.read_bytes(0, &mut raw)?;
        let word = |i: usize| u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().expect("4-byte slice"));
        Ok(Header {
            wlen: word(0),
            start: word(1),
            end: word(2),
            seq: word(3),
        })
    }

    /// Return all text appended since `last_seq`, plus the new sequence
    /// number to pass to the next call.
    ///
    /// `last_seq == 0` means "no prior observation": the starting point is
    /// then chosen by the [`HistoryPolicy`].  Torn reads are retried
    /// internally; falling behind the ring resynchronizes and returns empty
    /// text.  Invalid UTF-8 decodes to replacement characters — firmware
    /// logs may be cut mid-character and must not crash the reader.
    ///
    /// # Errors
    ///
    /// Only a read past the end of the window fails; that indicates a
    /// misconfigured window, not a timing race, and is not retried.
    pub fn read_since(&self, mut last_seq: u32) -> Result<(u32, String)> {
        loop {
            let h = self.header()?;

            // Firmware not up yet, or header clobbered: nothing to read.
            // The ring must fit in the window behind the 16-byte header.
            if h.wlen == 0 || h.wlen as usize > self.window.len().saturating_sub(HEADER_BYTES) {
                return Ok((h.seq, String::new()));
            }

            if last_seq == 0 {
                last_seq = match self.history {
                    HistoryPolicy::Discard => h.seq,
                    HistoryPolicy::Replay => {
                        h.seq.wrapping_sub(h.end.wrapping_sub(h.start) % h.wlen)
                    }
                };
            }

            if h.seq == last_seq || h.start == h.end {
                return Ok((h.seq, String::new()));
            }

            let behind = h.seq.wrapping_sub(last_seq);
            if behind > h.end.wrapping_sub(h.start) % h.wlen {
                // Producer lapped us; the bytes are gone. Resynchronize.
                tracing::debug!(behind, "winstream reader fell behind, resyncing");
                return Ok((h.seq, String::new()));
            }

            let copy = h.end.wrapping_sub(behind) % h.wlen;
            let suffix = behind.min(h.wlen - copy);

            let mut buf = vec![0u8; behind as usize];
            self.window
                .read_bytes(HEADER_BYTES + copy as usize, &mut buf[..suffix as usize])?;
            if suffix < behind {
                // Span wraps the ring boundary; second read from the front.
                self.window.read_bytes(HEADER_BYTES, &mut buf[suffix as usize..])?;
            }

            let check = self.header()?;
            if check.start == h.start && check.seq == h.seq {
                return Ok((h.seq, String::from_utf8_lossy(&buf).into_owned()));
            }
            // Torn read: producer advanced during the copy. Retry.
            tracing::trace!("winstream torn read, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsoleError;
    use crate::region::{SharedMemory, SimMemory};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Host-side model of the firmware's winstream producer.
    struct Producer {
        mem: SimMemory,
        wlen: u32,
        start: u32,
        end: u32,
        seq: u32,
    }

    impl Producer {
        fn new(mem: SimMemory, wlen: u32) -> Self {
            let p = Self {
                mem,
                wlen,
                start: 0,
                end: 0,
                seq: 0,
            };
            p.mem.write_u32(0, wlen).unwrap();
            p
        }

        fn push(&mut self, text: &str) {
            for &b in text.as_bytes() {
                self.mem
                    .write_bytes(HEADER_BYTES + self.end as usize, &[b])
                    .unwrap();
                self.end = (self.end + 1) % self.wlen;
                self.seq = self.seq.wrapping_add(1);
                if self.end == self.start {
                    self.start = (self.start + 1) % self.wlen;
                }
            }
            self.mem.write_u32(4, self.start).unwrap();
            self.mem.write_u32(8, self.end).unwrap();
            self.mem.write_u32(12, self.seq).unwrap();
        }
    }

    fn decoder(mem: &SimMemory, history: HistoryPolicy) -> Winstream {
        Winstream::new(ByteWindow::whole(Arc::new(mem.clone())), history)
    }

    #[test]
    fn replay_live_buffer_end_to_end() {
        // Header (wlen=64, start=0, end=10, seq=10), 10 bytes at offset 16
        let mem = SimMemory::new(HEADER_BYTES + 64);
        mem.write_u32(0, 64).unwrap();
        mem.write_u32(4, 0).unwrap();
        mem.write_u32(8, 10).unwrap();
        mem.write_u32(12, 10).unwrap();
        mem.write_bytes(16, b"hello-log!").unwrap();

        let ws = decoder(&mem, HistoryPolicy::Replay);
        assert_eq!(ws.read_since(0).unwrap(), (10, "hello-log!".to_string()));
        assert_eq!(ws.read_since(10).unwrap(), (10, String::new()));
    }

    #[test]
    fn discard_history_skips_existing_text() {
        let mem = SimMemory::new(HEADER_BYTES + 64);
        let mut fw = Producer::new(mem.clone(), 64);
        fw.push("old text");

        let ws = decoder(&mem, HistoryPolicy::Discard);
        let (seq, text) = ws.read_since(0).unwrap();
        assert_eq!(text, "");

        fw.push("new");
        assert_eq!(ws.read_since(seq).unwrap().1, "new");
    }

    #[test]
    fn sequential_reads_reconstruct_exactly_across_wrap() {
        let mem = SimMemory::new(HEADER_BYTES + 16);
        let mut fw = Producer::new(mem.clone(), 16);
        let ws = decoder(&mem, HistoryPolicy::Replay);

        fw.push("abcdefghij");
        let (seq, text) = ws.read_since(0).unwrap();
        assert_eq!((seq, text.as_str()), (10, "abcdefghij"));

        // Next 10 bytes wrap the 16-byte ring
        fw.push("KLMNOPQRST");
        let (seq, text) = ws.read_since(seq).unwrap();
        assert_eq!((seq, text.as_str()), (20, "KLMNOPQRST"));

        assert_eq!(ws.read_since(seq).unwrap(), (20, String::new()));
    }

    #[test]
    fn overwritten_history_yields_empty_not_garbage() {
        let mem = SimMemory::new(HEADER_BYTES + 16);
        let mut fw = Producer::new(mem.clone(), 16);
        let ws = decoder(&mem, HistoryPolicy::Replay);

        fw.push("0123456789");
        let (seq, _) = ws.read_since(0).unwrap();

        // 20 more bytes into a 16-byte ring: everything we knew is gone
        fw.push("ABCDEFGHIJKLMNOPQRST");
        let (resynced, text) = ws.read_since(seq).unwrap();
        assert_eq!(text, "");
        assert_eq!(resynced, 30);

        // Resynchronized: subsequent output flows again
        fw.push("ok");
        assert_eq!(ws.read_since(resynced).unwrap().1, "ok");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mem = SimMemory::new(HEADER_BYTES + 64);
        mem.write_u32(0, 64).unwrap();
        mem.write_u32(8, 3).unwrap();
        mem.write_u32(12, 3).unwrap();
        mem.write_bytes(16, &[b'a', 0xff, b'b']).unwrap();

        let ws = decoder(&mem, HistoryPolicy::Replay);
        let (_, text) = ws.read_since(0).unwrap();
        assert_eq!(text, "a\u{fffd}b");
    }

    #[test]
    fn zeroed_header_reads_as_no_data() {
        let mem = SimMemory::new(HEADER_BYTES + 64);
        let ws = decoder(&mem, HistoryPolicy::Replay);
        assert_eq!(ws.read_since(0).unwrap(), (0, String::new()));
    }

    #[test]
    fn oversized_wlen_reads_as_no_data() {
        let mem = SimMemory::new(HEADER_BYTES + 16);
        mem.write_u32(0, 0xffff).unwrap(); // garbage from a crashed firmware
        let ws = decoder(&mem, HistoryPolicy::Replay);
        assert_eq!(ws.read_since(0).unwrap().1, "");
    }

    /// Region that serves one stale header, then mutates the buffer to a
    /// later producer state before any further reads. Models the producer
    /// advancing between the decoder's two header reads.
    struct TornRegion {
        inner: SimMemory,
        torn_once: AtomicBool,
    }

    impl TornRegion {
        /// Ring wlen=8. Stale state: "AAAAA" written (start=0 end=5 seq=5).
        /// Final state: six more 'B's pushed, overwriting part of the A's.
        fn new() -> Self {
            let inner = SimMemory::new(HEADER_BYTES + 8);
            let mut fw = Producer::new(inner.clone(), 8);
            fw.push("AAAAA");
            Self {
                inner,
                torn_once: AtomicBool::new(false),
            }
        }

        fn advance_producer(&self) {
            // Reconstruct the producer at seq 5 and push the B's
            let mut fw = Producer::new(self.inner.clone(), 8);
            fw.start = 0;
            fw.end = 5;
            fw.seq = 5;
            fw.push("BBBBBB");
        }
    }

    impl SharedMemory for TornRegion {
        fn len(&self) -> usize {
            self.inner.len()
        }

        fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> crate::error::Result<()> {
            self.inner.read_bytes(offset, buf)?;
            if offset == 0 && buf.len() == HEADER_BYTES && !self.torn_once.swap(true, Ordering::SeqCst) {
                // Header A was just served; producer now races ahead
                self.advance_producer();
            }
            Ok(())
        }

        fn write_bytes(&self, offset: usize, data: &[u8]) -> crate::error::Result<()> {
            self.inner.write_bytes(offset, data)
        }

        fn read_u32(&self, offset: usize) -> crate::error::Result<u32> {
            self.inner.read_u32(offset)
        }

        fn write_u32(&self, offset: usize, value: u32) -> crate::error::Result<()> {
            self.inner.write_u32(offset, value)
        }
    }

    #[test]
    fn torn_read_retries_until_consistent() {
        let region = TornRegion::new();
        let ws = Winstream::new(
            ByteWindow::whole(Arc::new(region)),
            HistoryPolicy::Replay,
        );

        // First attempt sees the stale header over mutated data and must be
        // rejected; the retry decodes the consistent final state: the one
        // surviving 'A' (seq 4) followed by the six 'B's.
        let (seq, text) = ws.read_since(0).unwrap();
        assert_eq!(seq, 11);
        assert_eq!(text, "ABBBBBB");
    }

    #[test]
    fn read_past_window_is_a_hard_error() {
        // Window shorter than header + wlen claims
        let mem = SimMemory::new(HEADER_BYTES + 8);
        let win = ByteWindow::new(Arc::new(mem), 0, 12).unwrap();
        let ws = Winstream::new(win, HistoryPolicy::Replay);
        assert!(matches!(
            ws.read_since(0),
            Err(ConsoleError::OutOfRange { .. })
        ));
    }
}
