//! Emit actor with a dedicated output stream and MPSC channel.
//!
//! Single-writer pattern: one thread owns the stream and processes commands.
//! Each batch becomes one envelope, written as a JSON line (or a pretty block).

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::emit::EmitError;
use crate::emit::types::{Envelope, MetricBatch};

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the emit actor.
#[derive(Debug)]
pub enum Command {
    /// Serialize one batch.
    Emit(MetricBatch),
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Actor
// =============================================================================

/// Output options applied by the actor.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Envelope name; the batch host when unset.
    pub name: Option<String>,
    /// Pretty-print envelopes.
    pub pretty: bool,
}

pub struct EmitActor {
    out: Box<dyn Write + Send>,
    rx: Receiver<Command>,
    options: EmitOptions,
}

impl EmitActor {
    /// Spawn the actor thread.
    pub fn spawn(
        out: Box<dyn Write + Send>,
        channel_capacity: usize,
        options: EmitOptions,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>), EmitError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let mut actor = EmitActor { out, rx, options };
        let handle = thread::Builder::new()
            .name("perfmon-emit".to_string())
            .spawn(move || actor.run())?;
        Ok((handle, tx))
    }

    fn run(&mut self) {
        tracing::debug!("EmitActor started");

        while let Ok(cmd) = self.rx.recv() {
            match cmd {
                Command::Emit(batch) => {
                    if let Err(e) = self.write_batch(&batch) {
                        tracing::error!(error = %e, records = batch.len(), "Failed to write batch");
                    }
                }
                Command::Shutdown => {
                    tracing::debug!("EmitActor shutting down");
                    break;
                }
            }
        }

        self.flush();
        tracing::debug!("EmitActor stopped");
    }

    fn write_batch(&mut self, batch: &MetricBatch) -> Result<(), EmitError> {
        let name = self.options.name.as_deref().unwrap_or(batch.host());
        let envelope = Envelope::new(name, batch.records());
        if self.options.pretty {
            serde_json::to_writer_pretty(&mut self.out, &envelope)?;
        } else {
            serde_json::to_writer(&mut self.out, &envelope)?;
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::error!(error = %e, "Failed to flush output");
        }
    }
}
