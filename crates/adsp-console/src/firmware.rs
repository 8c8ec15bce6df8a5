//! Firmware image preparation and the external loader seam.
//!
//! Actually pushing a firmware binary onto the device over PCI/FPGA is the
//! job of an external loader; this module only prepares the byte images and
//! drives that collaborator through the [`FirmwareLoader`] trait — one
//! blocking call with a timeout contract.
//!
//! The load policy mirrors bring-up practice on flaky FPGA setups: strict
//! mode waits five seconds and propagates a timeout; best-effort mode waits
//! half a second and treats a timeout as success, because the DMA engine
//! often completes the transfer even when the completion signal is lost.

use crate::error::{ConsoleError, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Minimum firmware image size; the DMA transfer needs at least this much,
/// so shorter images are zero-padded.
pub const MIN_FIRMWARE_SIZE: usize = 512 * 1024;

/// Timeout when load errors are to be surfaced.
pub const STRICT_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout when load errors are to be ignored.
pub const BEST_EFFORT_TIMEOUT: Duration = Duration::from_millis(500);

/// The byte images a load needs: ROM(s), ROM extension, firmware.
#[derive(Debug, Clone)]
pub struct FirmwareImages {
    /// ROM image(s), in load order. May be empty.
    pub rom: Vec<Bytes>,
    /// ROM extension image.
    pub rom_ext: Bytes,
    /// Firmware image, padded to [`MIN_FIRMWARE_SIZE`].
    pub firmware: Bytes,
}

impl FirmwareImages {
    /// Assemble images from raw bytes, padding the firmware.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the firmware image is empty.
    pub fn new(rom: Vec<Bytes>, rom_ext: Bytes, firmware: impl Into<Bytes>) -> Result<Self> {
        let firmware = firmware.into();
        if firmware.is_empty() {
            return Err(ConsoleError::config("firmware image is empty"));
        }

        let firmware = if firmware.len() < MIN_FIRMWARE_SIZE {
            let original = firmware.len();
            let mut padded = Vec::with_capacity(MIN_FIRMWARE_SIZE);
            padded.extend_from_slice(&firmware);
            padded.resize(MIN_FIRMWARE_SIZE, 0);
            tracing::debug!("padded firmware from {original} to {MIN_FIRMWARE_SIZE} bytes");
            Bytes::from(padded)
        } else {
            firmware
        };

        Ok(Self {
            rom,
            rom_ext,
            firmware,
        })
    }

    /// Read images from files.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for unreadable files and a configuration error
    /// for an empty firmware image.
    pub fn from_files(rom: &[PathBuf], rom_ext: &Path, firmware: &Path) -> Result<Self> {
        let rom = rom
            .iter()
            .map(|p| Ok(Bytes::from(std::fs::read(p)?)))
            .collect::<Result<Vec<_>>>()?;
        let rom_ext = Bytes::from(std::fs::read(rom_ext)?);
        let fw = std::fs::read(firmware)?;

        tracing::info!(
            "firmware {} ({} bytes), rom ext {} bytes, {} rom image(s)",
            firmware.display(),
            fw.len(),
            rom_ext.len(),
            rom.len()
        );

        Self::new(rom, rom_ext, fw)
    }
}

/// The external firmware-loading collaborator: one blocking call.
pub trait FirmwareLoader {
    /// Load the images onto the device, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::LoadTimeout`] if loading does not complete in
    /// time, or [`ConsoleError::LoadFailed`] for other loader failures.
    fn load(&mut self, images: &FirmwareImages, timeout: Duration) -> Result<()>;
}

/// Load policy knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Swallow loader timeouts and consider loading complete anyway.
    pub ignore_errors: bool,
}

impl LoadOptions {
    /// The timeout this policy grants the loader.
    #[must_use]
    pub const fn timeout(self) -> Duration {
        if self.ignore_errors {
            BEST_EFFORT_TIMEOUT
        } else {
            STRICT_TIMEOUT
        }
    }
}

/// Drive one load through the collaborator, applying the error policy.
///
/// # Errors
///
/// Propagates loader failures; a [`ConsoleError::LoadTimeout`] is swallowed
/// when `opts.ignore_errors` is set.
pub fn load_firmware(
    loader: &mut dyn FirmwareLoader,
    images: &FirmwareImages,
    opts: LoadOptions,
) -> Result<()> {
    match loader.load(images, opts.timeout()) {
        Err(ConsoleError::LoadTimeout { duration_ms }) if opts.ignore_errors => {
            tracing::warn!("ignoring firmware load timeout after {duration_ms}ms");
            Ok(())
        }
        other => other,
    }
}

/// Loader that shells out to an external loader executable.
///
/// Images are written to temporary files and passed as `--rom`, `--romext`
/// and `--fw` arguments; the child is killed once the timeout elapses.
#[derive(Debug)]
pub struct CommandLoader {
    program: PathBuf,
}

impl CommandLoader {
    /// Use `program` as the loader executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Temporary directory holding the staged image files.
///
/// Removed on drop, so every exit path of [`CommandLoader::load`] — success,
/// loader failure, spawn failure, timeout — cleans up.
struct StagedDir {
    dir: PathBuf,
}

impl StagedDir {
    fn create() -> Result<Self> {
        use std::sync::atomic::{AtomicU32, Ordering};
        // Unique per call so concurrent loads never share a directory
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "adsp-load-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn stage(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        std::fs::write(&path, data)?;
        Ok(path)
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

impl FirmwareLoader for CommandLoader {
    fn load(&mut self, images: &FirmwareImages, timeout: Duration) -> Result<()> {
        let staged = StagedDir::create()?;

        let mut cmd = Command::new(&self.program);
        for (i, rom) in images.rom.iter().enumerate() {
            cmd.arg("--rom").arg(staged.stage(&format!("rom{i}.bin"), rom)?);
        }
        cmd.arg("--romext").arg(staged.stage("romext.bin", &images.rom_ext)?);
        cmd.arg("--fw").arg(staged.stage("fw.bin", &images.firmware)?);
        cmd.stdin(Stdio::null());

        tracing::info!("running loader {} (timeout {timeout:?})", self.program.display());
        let mut child = cmd.spawn().map_err(|e| {
            ConsoleError::load_failed(format!("cannot run {}: {e}", self.program.display()))
        })?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                // Truncation is fine for any sane timeout
                #[allow(clippy::cast_possible_truncation)]
                return Err(ConsoleError::LoadTimeout {
                    duration_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        if status.success() {
            tracing::info!("firmware load complete");
            Ok(())
        } else {
            Err(ConsoleError::load_failed(format!(
                "loader exited with {status}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_firmware_is_padded() {
        let images =
            FirmwareImages::new(vec![], Bytes::from_static(b"romext"), vec![0x42; 100]).unwrap();
        assert_eq!(images.firmware.len(), MIN_FIRMWARE_SIZE);
        assert_eq!(&images.firmware[..100], &[0x42; 100][..]);
        assert!(images.firmware[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn large_firmware_is_left_alone() {
        let big = vec![1u8; MIN_FIRMWARE_SIZE + 1];
        let images = FirmwareImages::new(vec![], Bytes::new(), big).unwrap();
        assert_eq!(images.firmware.len(), MIN_FIRMWARE_SIZE + 1);
    }

    #[test]
    fn empty_firmware_is_a_config_error() {
        assert!(matches!(
            FirmwareImages::new(vec![], Bytes::new(), Bytes::new()),
            Err(ConsoleError::Config { .. })
        ));
    }

    struct FixedLoader(Option<ConsoleError>);

    impl FirmwareLoader for FixedLoader {
        fn load(&mut self, _images: &FirmwareImages, _timeout: Duration) -> Result<()> {
            match self.0.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn images() -> FirmwareImages {
        FirmwareImages::new(vec![], Bytes::new(), vec![0u8; 4]).unwrap()
    }

    #[test]
    fn timeout_swallowed_only_when_ignoring_errors() {
        let timeout = ConsoleError::LoadTimeout { duration_ms: 500 };
        let mut loader = FixedLoader(Some(timeout));
        let opts = LoadOptions {
            ignore_errors: true,
        };
        load_firmware(&mut loader, &images(), opts).unwrap();

        let timeout = ConsoleError::LoadTimeout { duration_ms: 5000 };
        let mut loader = FixedLoader(Some(timeout));
        assert!(matches!(
            load_firmware(&mut loader, &images(), LoadOptions::default()),
            Err(ConsoleError::LoadTimeout { .. })
        ));
    }

    #[test]
    fn other_load_failures_always_propagate() {
        let mut loader = FixedLoader(Some(ConsoleError::load_failed("bad image")));
        let opts = LoadOptions {
            ignore_errors: true,
        };
        assert!(matches!(
            load_firmware(&mut loader, &images(), opts),
            Err(ConsoleError::LoadFailed { .. })
        ));
    }

    #[test]
    fn policy_picks_the_timeout() {
        assert_eq!(LoadOptions::default().timeout(), STRICT_TIMEOUT);
        assert_eq!(
            LoadOptions {
                ignore_errors: true
            }
            .timeout(),
            BEST_EFFORT_TIMEOUT
        );
    }

    #[test]
    fn command_loader_runs_the_program() {
        let mut loader = CommandLoader::new("/bin/true");
        loader.load(&images(), Duration::from_secs(5)).unwrap();

        let mut loader = CommandLoader::new("/bin/false");
        assert!(matches!(
            loader.load(&images(), Duration::from_secs(5)),
            Err(ConsoleError::LoadFailed { .. })
        ));
    }

    #[test]
    fn staged_dir_is_removed_on_drop() {
        let staged = StagedDir::create().unwrap();
        let file = staged.stage("fw.bin", b"abc").unwrap();
        assert!(file.exists());

        let dir = staged.dir.clone();
        drop(staged);
        assert!(!dir.exists(), "staged images must not outlive the load");
    }

    #[test]
    fn missing_loader_program_fails_cleanly() {
        let mut loader = CommandLoader::new("/nonexistent/adsp-loader");
        assert!(matches!(
            loader.load(&images(), Duration::from_secs(5)),
            Err(ConsoleError::LoadFailed { .. })
        ));
    }

    #[test]
    fn command_loader_kills_on_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir();
        let script = dir.join(format!("adsp-slow-loader-{}.sh", std::process::id()));
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut loader = CommandLoader::new(&script);
        let result = loader.load(&images(), Duration::from_millis(50));
        let _ = std::fs::remove_file(&script);

        assert!(matches!(result, Err(ConsoleError::LoadTimeout { .. })));
    }
}
