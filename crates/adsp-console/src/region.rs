//! Shared-memory access to the DSP BAR.
//!
//! Everything the console touches — registers, host windows, the log ring —
//! is device memory that the remote firmware mutates concurrently.  The
//! [`SharedMemory`] trait is the single seam for that access: bounds-checked
//! byte and 32-bit word operations over a region whose contents can change
//! under us at any time.
//!
//! Two implementations exist: [`MappedBar`] maps a PCI BAR resource file and
//! goes to real hardware, and [`SimMemory`] is a plain in-process buffer used
//! for development and tests.  [`ByteWindow`] carves a bounds-checked view
//! out of either.

use crate::error::{ConsoleError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

/// Bounds-checked access to externally mutated shared memory.
///
/// Writes take `&self`: the backing store is device memory (or a simulation
/// of one), and exclusivity is the hardware protocol's job, not the borrow
/// checker's.
pub trait SharedMemory: Send + Sync {
    /// Region size in bytes.
    fn len(&self) -> usize;

    /// True if the region is zero-sized.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the span exceeds the region.
    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the span exceeds the region.
    fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Read a little-endian 32-bit word at `offset`.
    ///
    /// Every call goes to the backing memory; values are never cached.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if `offset + 4` exceeds the region.
    fn read_u32(&self, offset: usize) -> Result<u32>;

    /// Write a little-endian 32-bit word at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if `offset + 4` exceeds the region.
    fn write_u32(&self, offset: usize, value: u32) -> Result<()>;
}

fn check_span(offset: usize, len: usize, size: usize) -> Result<()> {
    if offset.checked_add(len).is_none_or(|end| end > size) {
        return Err(ConsoleError::OutOfRange { offset, len, size });
    }
    Ok(())
}

/// Block-read strategy for [`MappedBar`].
///
/// Some PCI interfaces return garbage on wide reads from device memory; the
/// byte-wise strategy trades speed for reliability.  The contract is
/// identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// One bulk copy per block read.
    #[default]
    Bulk,
    /// One volatile byte access per byte.
    ByteWise,
}

/// Memory-mapped PCI BAR region.
///
/// Register words use volatile access so the compiler never elides or
/// reorders them — the firmware changes these values asynchronously.
#[derive(Debug)]
pub struct MappedBar {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: String,
    strategy: ReadStrategy,
}

// SAFETY: MappedBar owns its mapping exclusively and the mapping stays valid
// wherever the value moves (mmap'd memory is process-wide). No thread-local
// state.
unsafe impl Send for MappedBar {}

// SAFETY: all accesses are bounds-checked, and word accesses are volatile.
// Concurrent access discipline is the doorbell/sequence protocol's concern;
// the mapping itself is safe to touch from any thread.
unsafe impl Sync for MappedBar {}

impl MappedBar {
    /// Map the BAR of a PCI device via its sysfs resource file.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource file cannot be opened, is empty
    /// (device not enabled), or the mapping fails.
    pub fn new(pcie_address: &str, bar_index: usize, strategy: ReadStrategy) -> Result<Self> {
        let path = format!("/sys/bus/pci/devices/{pcie_address}/resource{bar_index}");
        Self::from_path(Path::new(&path), strategy)
    }

    /// Map an arbitrary BAR resource file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn from_path(path: &Path, strategy: ReadStrategy) -> Result<Self> {
        tracing::debug!("Mapping DSP BAR: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                ConsoleError::config(format!(
                    "Cannot open {}: {e}. Is the device enabled?",
                    path.display()
                ))
            })?;

        // BAR sizes fit in usize on 64-bit, our only target
        #[allow(clippy::cast_possible_truncation)]
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(ConsoleError::config(format!(
                "{} has size 0 (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: fd was just opened read/write, size is non-zero, offset 0 is
        // the start of the BAR. The file handle is stored in the struct so the
        // mapping outlives no fd, and Drop unmaps exactly what was mapped.
        let ptr = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| ConsoleError::config(format!("mmap {} failed: {e}", path.display())))?;

            NonNull::new(addr.cast::<u8>()).expect("mmap returns non-null on success")
        };

        tracing::info!(
            "Mapped {} ({} KB at {ptr:p})",
            path.display(),
            size / 1024
        );

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.display().to_string(),
            strategy,
        })
    }
}

impl SharedMemory for MappedBar {
    fn len(&self) -> usize {
        self.size
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_span(offset, buf.len(), self.size)?;
        match self.strategy {
            ReadStrategy::Bulk => {
                // SAFETY: span validated above; src is inside the mapping, dst
                // is a distinct user buffer, u8 has alignment 1.
                unsafe {
                    let src = self.ptr.as_ptr().add(offset);
                    std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len());
                }
            }
            ReadStrategy::ByteWise => {
                for (i, slot) in buf.iter_mut().enumerate() {
                    // SAFETY: offset + i < offset + buf.len() <= size.
                    *slot = unsafe { self.ptr.as_ptr().add(offset + i).read_volatile() };
                }
            }
        }
        Ok(())
    }

    fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_span(offset, data.len(), self.size)?;
        // SAFETY: span validated above; dst is inside the mapping, src is a
        // distinct user buffer, u8 has alignment 1.
        unsafe {
            let dst = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        check_span(offset, 4, self.size)?;
        // SAFETY: span validated above; BAR registers are 4-byte aligned.
        // read_volatile is required: the firmware changes these values and the
        // compiler must not cache or reorder the access.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("read  u32 @ {offset:#x} = {value:#010x}");
        Ok(value)
    }

    fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        check_span(offset, 4, self.size)?;
        tracing::trace!("write u32 @ {offset:#x} = {value:#010x}");
        // SAFETY: span validated above; BAR registers are 4-byte aligned.
        // write_volatile is required: register writes have device side effects.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }
}

impl Drop for MappedBar {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned in from_path, and
        // Drop runs at most once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap {} failed during drop: {e}", self.path);
            }
        }
        tracing::debug!("Unmapped {}", self.path);
    }
}

/// In-process stand-in for a BAR, for development and tests.
///
/// Cloning yields another handle to the same buffer, so a test can play the
/// firmware side while the console holds its own handle.
#[derive(Debug, Clone, Default)]
pub struct SimMemory {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SimMemory {
    /// Create a zero-filled region of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(vec![0; len])),
        }
    }
}

impl SharedMemory for SimMemory {
    fn len(&self) -> usize {
        self.buf.lock().expect("sim memory poisoned").len()
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let mem = self.buf.lock().expect("sim memory poisoned");
        check_span(offset, buf.len(), mem.len())?;
        buf.copy_from_slice(&mem[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut mem = self.buf.lock().expect("sim memory poisoned");
        check_span(offset, data.len(), mem.len())?;
        mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_bytes(offset, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }
}

/// Bounds-checked view over part of a [`SharedMemory`] region.
///
/// Windows and register blocks are all views over the same mapped BAR;
/// each view re-checks its own bounds before delegating, so a bad offset
/// fails against the window, never against the whole BAR.
#[derive(Clone)]
pub struct ByteWindow {
    mem: Arc<dyn SharedMemory>,
    base: usize,
    len: usize,
}

impl std::fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteWindow")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

impl ByteWindow {
    /// Create a view of `len` bytes at `base` within `mem`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the view exceeds the region.
    pub fn new(mem: Arc<dyn SharedMemory>, base: usize, len: usize) -> Result<Self> {
        check_span(base, len, mem.len())?;
        Ok(Self { mem, base, len })
    }

    /// View covering an entire region.
    pub fn whole(mem: Arc<dyn SharedMemory>) -> Self {
        let len = mem.len();
        Self { mem, base: 0, len }
    }

    /// Window length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the window is zero-sized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read `buf.len()` bytes at `offset` within the window.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the span exceeds the window.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_span(offset, buf.len(), self.len)?;
        self.mem.read_bytes(self.base + offset, buf)
    }

    /// Write `data` at `offset` within the window.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the span exceeds the window.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_span(offset, data.len(), self.len)?;
        self.mem.write_bytes(self.base + offset, data)
    }

    /// Read a 32-bit word at `offset` within the window.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if `offset + 4` exceeds the window.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        check_span(offset, 4, self.len)?;
        self.mem.read_u32(self.base + offset)
    }

    /// Write a 32-bit word at `offset` within the window.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if `offset + 4` exceeds the window.
    pub fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        check_span(offset, 4, self.len)?;
        self.mem.write_u32(self.base + offset, value)
    }
}
