//! Emit builder and handles.

use std::io::Write;
use std::thread::JoinHandle;

use crate::emit::EmitError;
use crate::emit::actor::{EmitActor, EmitOptions};
use crate::emit::writer::BatchWriter;

/// Default channel capacity for emit commands.
const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Builder for constructing the emit layer.
pub struct EmitBuilder {
    out: Box<dyn Write + Send>,
    channel_capacity: usize,
    options: EmitOptions,
}

impl EmitBuilder {
    /// Emit to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            options: EmitOptions::default(),
        }
    }

    /// Set the channel capacity for emit commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Use a fixed envelope name instead of the batch host.
    pub fn name(mut self, name: Option<String>) -> Self {
        self.options.name = name;
        self
    }

    /// Pretty-print envelopes.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.options.pretty = pretty;
        self
    }

    pub fn build(self) -> Result<EmitHandles, EmitError> {
        let (actor_handle, tx) = EmitActor::spawn(self.out, self.channel_capacity, self.options)?;
        Ok(EmitHandles {
            writer: BatchWriter::new(tx),
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to the running emit layer.
pub struct EmitHandles {
    /// Writer facade; clone it into the engine.
    pub writer: BatchWriter,
    actor_handle: Option<JoinHandle<()>>,
}

impl EmitHandles {
    /// Drain pending batches and stop the actor.
    pub fn shutdown(mut self) -> Result<(), EmitError> {
        self.writer.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| EmitError::Internal("Failed to join emit actor thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for EmitHandles {
    fn drop(&mut self) {
        if self.actor_handle.is_some() {
            let _ = self.writer.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{Emitter, MetricBatch, MetricRecord};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn batch(host: &str, value: i64) -> MetricBatch {
        let mut record = MetricRecord::new("Memory");
        record.insert("AvailableMBytes", json!(value));
        let mut batch = MetricBatch::new(host);
        batch.push(record);
        batch
    }

    #[test]
    fn test_emit_writes_one_line_per_batch() {
        let buf = SharedBuf::default();
        let handles = EmitBuilder::new(buf.clone()).build().unwrap();

        handles.writer.emit(batch("web-01", 1)).unwrap();
        handles.writer.emit(batch("web-02", 2)).unwrap();
        handles.shutdown().unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], json!("web-01"));
        assert_eq!(lines[1]["metrics"][0]["AvailableMBytes"], json!(2));
    }

    #[test]
    fn test_emit_name_override() {
        let buf = SharedBuf::default();
        let handles = EmitBuilder::new(buf.clone())
            .name(Some("com.example.perfmon".to_string()))
            .pretty(true)
            .build()
            .unwrap();

        handles.writer.emit(batch("web-01", 1)).unwrap();
        handles.shutdown().unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["name"], json!("com.example.perfmon"));
    }

    #[test]
    fn test_small_channel_applies_backpressure_without_loss() {
        let buf = SharedBuf::default();
        let handles = EmitBuilder::new(buf.clone()).channel_capacity(1).build().unwrap();

        for value in 0..20 {
            handles.writer.emit(batch("web-01", value)).unwrap();
        }
        handles.shutdown().unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let last: Value = serde_json::from_str(output.lines().last().unwrap()).unwrap();
        assert_eq!(output.lines().count(), 20);
        assert_eq!(last["metrics"][0]["AvailableMBytes"], json!(19));
    }

    #[test]
    fn test_emit_after_shutdown_fails() {
        let handles = EmitBuilder::new(SharedBuf::default()).build().unwrap();
        let writer = handles.writer.clone();
        handles.shutdown().unwrap();
        assert!(matches!(
            writer.emit(batch("web-01", 1)),
            Err(EmitError::ChannelSend)
        ));
    }
}
