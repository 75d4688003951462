//! Emitter trait and the channel-backed writer facade.

use std::sync::mpsc::SyncSender;

use crate::emit::EmitError;
use crate::emit::actor::Command;
use crate::emit::types::MetricBatch;

/// Sink for finished metric batches. Shared by every scheduling unit.
pub trait Emitter: Send + Sync + 'static {
    fn emit(&self, batch: MetricBatch) -> Result<(), EmitError>;
}

/// Writer facade over the emit actor channel.
#[derive(Clone)]
pub struct BatchWriter {
    tx: SyncSender<Command>,
}

impl BatchWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    pub(crate) fn shutdown(&self) -> Result<(), EmitError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| EmitError::ChannelSend)
    }
}

impl Emitter for BatchWriter {
    fn emit(&self, batch: MetricBatch) -> Result<(), EmitError> {
        self.tx
            .send(Command::Emit(batch))
            .map_err(|_| EmitError::ChannelSend)
    }
}
