//! Winstream log-ring header format.
//!
//! The firmware writes console text into a single-producer circular buffer
//! at the start of the log window.  A 16-byte header precedes the ring:
//!
//! ```text
//! Offset  Field  Meaning
//! ──────  ─────  ─────────────────────────────────────────────
//!   0     wlen   ring capacity in bytes
//!   4     start  offset of the oldest live byte
//!   8     end    offset one past the newest live byte
//!  12     seq    total bytes ever written (mod 2^32)
//! ```
//!
//! All fields are little-endian `u32`.  `(end - start) mod wlen` is the
//! number of live bytes; `seq` counts every byte ever produced, so a reader
//! can detect how far it has fallen behind.

/// Size of the ring header in bytes.
pub const HEADER_BYTES: usize = 16;

/// Byte offset of the `wlen` field.
pub const WLEN_OFFSET: usize = 0;
/// Byte offset of the `start` field.
pub const START_OFFSET: usize = 4;
/// Byte offset of the `end` field.
pub const END_OFFSET: usize = 8;
/// Byte offset of the `seq` field.
pub const SEQ_OFFSET: usize = 12;
