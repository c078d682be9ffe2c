//! Wiring: transport + sinks + the two worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::unbounded;

use crate::ingest::IngestLoop;
use crate::interact::InteractLoop;
use crate::serial_link::{LineSink, LineSource, LinkError, SerialLink};
use crate::sinks::{ExportSink, PlotSink, PromptSink};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Serial link error: {0}")]
    Link(#[from] LinkError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A running analyzer session: one ingestion thread, one interaction thread,
/// connected by the event and command channels.
///
/// Dropping the handle does not stop the session; call
/// [`AnalyzerHost::request_shutdown`] (or let the device disconnect) and then
/// [`AnalyzerHost::wait`].
pub struct AnalyzerHost {
    shutdown: Arc<AtomicBool>,
    ingest: JoinHandle<()>,
    interact: JoinHandle<()>,
}

impl AnalyzerHost {
    /// Open the named serial port and start both loops with the given sinks.
    ///
    /// An open failure is fatal (callers are expected to exit non-zero).
    pub fn open<E, P, V>(
        port: &str,
        baud: u32,
        export: E,
        prompts: P,
        plots: V,
    ) -> Result<Self, HostError>
    where
        E: ExportSink + Send + 'static,
        P: PromptSink + Send + 'static,
        V: PlotSink + Send + 'static,
    {
        let link = SerialLink::open(port, baud)?;
        let ack = link.clone_writer()?;
        let (reader, responder) = link.split()?;
        Self::spawn(reader, responder, ack, export, prompts, plots)
    }

    /// Start both loops over an already-assembled transport. This is the
    /// seam the end-to-end tests drive with in-memory line sources.
    pub fn spawn<R, W, A, E, P, V>(
        reader: R,
        responder: W,
        ack: A,
        export: E,
        prompts: P,
        plots: V,
    ) -> Result<Self, HostError>
    where
        R: LineSource + Send + 'static,
        W: LineSink + Send + 'static,
        A: LineSink + Send + 'static,
        E: ExportSink + Send + 'static,
        P: PromptSink + Send + 'static,
        V: PlotSink + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();

        let ingest = IngestLoop::new(
            reader,
            ack,
            export,
            event_tx,
            command_rx,
            Arc::clone(&shutdown),
        );
        let interact = InteractLoop::new(event_rx, command_tx, responder, prompts, plots);

        let ingest = std::thread::Builder::new()
            .name("bioimp-ingest".to_string())
            .spawn(move || ingest.run())?;
        let interact = std::thread::Builder::new()
            .name("bioimp-interact".to_string())
            .spawn(move || interact.run())?;

        Ok(Self {
            shutdown,
            ingest,
            interact,
        })
    }

    /// Flag checked by the ingestion loop between reads; share it with a
    /// signal handler to get buffers flushed before exit.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Block until both loops have finished. The ingestion loop ends on
    /// disconnect or shutdown and hands its leftover buffers over; the
    /// interaction loop flushes them and follows.
    pub fn wait(self) {
        if self.ingest.join().is_err() {
            log::error!("ingestion thread panicked");
        }
        if self.interact.join().is_err() {
            log::error!("interaction thread panicked");
        }
    }
}
