//! Cooperative console loop.
//!
//! One logical task does everything: drain new winstream text to the sink,
//! service a pending IPC request if handling is enabled, and progress the
//! opcode-1 delayed completion.  There is no second thread — unsynchronized
//! register access from two host tasks would reintroduce exactly the races
//! the decoder only tolerates from the remote firmware.
//!
//! The stop flag is checked every iteration, so an interrupt handler that
//! sets it gets a prompt, clean exit with no already-decoded text lost.

use crate::error::Result;
use crate::ipc::IpcResponder;
use crate::winstream::Winstream;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where decoded firmware log text goes.
pub enum LogSink {
    /// Raw standard output, flushed after every chunk.
    Stdout,
    /// The structured logger (`tracing`), one event per chunk.
    Logger,
    /// Any writer — used by tests and by callers that redirect the stream.
    Writer(Box<dyn Write + Send>),
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("LogSink::Stdout"),
            Self::Logger => f.write_str("LogSink::Logger"),
            Self::Writer(_) => f.write_str("LogSink::Writer(..)"),
        }
    }
}

impl LogSink {
    fn emit(&mut self, text: &str) -> Result<()> {
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes())?;
                out.flush()?;
            }
            Self::Logger => tracing::info!(target: "adsp_fw", "{}", text.trim_end_matches('\n')),
            Self::Writer(w) => {
                w.write_all(text.as_bytes())?;
                w.flush()?;
            }
        }
        Ok(())
    }
}

/// The bring-up console: winstream drain plus optional IPC service.
#[derive(Debug)]
pub struct Console {
    winstream: Winstream,
    ipc: Option<IpcResponder>,
    sink: LogSink,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    last_seq: u32,
}

impl Console {
    /// Create a console that drains `winstream` into `sink`.
    #[must_use]
    pub fn new(winstream: Winstream, sink: LogSink) -> Self {
        Self {
            winstream,
            ipc: None,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_millis(1),
            last_seq: 0,
        }
    }

    /// Enable IPC request handling.
    #[must_use]
    pub fn with_ipc(mut self, ipc: IpcResponder) -> Self {
        self.ipc = Some(ipc);
        self
    }

    /// Override the yield interval between iterations.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Flag that stops [`run`](Self::run); hand it to an interrupt handler.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One loop iteration: drain log text, service IPC, progress timers.
    ///
    /// # Errors
    ///
    /// Propagates window/register access failures and sink write failures.
    pub fn tick(&mut self) -> Result<()> {
        let (seq, text) = self.winstream.read_since(self.last_seq)?;
        self.last_seq = seq;
        if !text.is_empty() {
            self.sink.emit(&text)?;
        }

        if let Some(ipc) = &mut self.ipc {
            if let Some((data, ext_data)) = ipc.pending_request()? {
                ipc.process(data, ext_data)?;
            }
            ipc.service()?;
        }

        Ok(())
    }

    /// Run until the stop flag is set.
    ///
    /// The flag is observed every iteration; text decoded before the stop
    /// was requested has already reached the sink when this returns.
    ///
    /// # Errors
    ///
    /// Propagates the first [`tick`](Self::tick) failure.
    pub fn run(&mut self) -> Result<()> {
        tracing::debug!(ipc = self.ipc.is_some(), "console loop starting");
        while !self.stop.load(Ordering::Relaxed) {
            self.tick()?;
            // Yield point: lets the host breathe and paces register polling
            std::thread::sleep(self.poll_interval);
        }
        tracing::debug!("console loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{ByteWindow, SharedMemory, SimMemory};
    use crate::winstream::HistoryPolicy;
    use adsp_chip::winstream::HEADER_BYTES;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn console_over(mem: &SimMemory, sink: &Captured) -> Console {
        let ws = Winstream::new(
            ByteWindow::whole(Arc::new(mem.clone())),
            HistoryPolicy::Replay,
        );
        Console::new(ws, LogSink::Writer(Box::new(sink.clone())))
            .with_poll_interval(Duration::from_micros(100))
    }

    fn write_ring(mem: &SimMemory, text: &str, seq: u32) {
        mem.write_u32(0, 64).unwrap();
        mem.write_u32(4, 0).unwrap();
        #[allow(clippy::cast_possible_truncation)]
        mem.write_u32(8, text.len() as u32).unwrap();
        mem.write_u32(12, seq).unwrap();
        mem.write_bytes(HEADER_BYTES, text.as_bytes()).unwrap();
    }

    #[test]
    fn tick_drains_text_once() {
        let mem = SimMemory::new(HEADER_BYTES + 64);
        let sink = Captured::default();
        let mut console = console_over(&mem, &sink);

        write_ring(&mem, "boot: hello", 11);
        console.tick().unwrap();
        console.tick().unwrap(); // no duplication on the second pass

        assert_eq!(sink.0.lock().unwrap().as_slice(), b"boot: hello");
    }

    #[test]
    fn run_honors_stop_flag_and_keeps_text() {
        let mem = SimMemory::new(HEADER_BYTES + 64);
        write_ring(&mem, "last words", 10);

        let sink = Captured::default();
        let mut console = console_over(&mem, &sink);
        let stop = console.stop_flag();

        let handle = std::thread::spawn(move || console.run());
        std::thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();

        assert_eq!(sink.0.lock().unwrap().as_slice(), b"last words");
    }
}
