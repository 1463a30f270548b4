use simcore_lib::{DeviceId, LogError, LogRecord, LogSchema};
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Destination for fully validated log records.
pub trait LogSink: Send {
    /// Called once with the run schema before any record.
    fn begin(&mut self, _schema: &LogSchema) -> Result<(), LogError> {
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> Result<(), LogError>;
}

/// Time-synchronized record collection.
///
/// The schema is fixed when the pipeline is created; every record is
/// checked against it before the sink sees anything: the device must be
/// part of the declared set, time must advance strictly across ticks, and
/// a device may contribute at most one record per tick. A violation is
/// fatal for the pipeline only — the caller stops appending and control
/// keeps running.
pub struct LogPipeline {
    schema: LogSchema,
    sink: Box<dyn LogSink>,
    current_tick: Option<u64>,
    current_time: Option<f64>,
    last_time: Option<f64>,
    devices_this_tick: BTreeSet<DeviceId>,
    records_written: u64,
}

impl LogPipeline {
    pub fn new(schema: LogSchema, mut sink: Box<dyn LogSink>) -> Result<Self, LogError> {
        sink.begin(&schema)?;
        Ok(Self {
            schema,
            sink,
            current_tick: None,
            current_time: None,
            last_time: None,
            devices_this_tick: BTreeSet::new(),
            records_written: 0,
        })
    }

    pub fn schema(&self) -> &LogSchema {
        &self.schema
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        if !self.schema.devices.contains(&record.device) {
            return Err(LogError::UnknownDevice(record.device.clone()));
        }

        match self.current_tick {
            Some(tick) if tick == record.tick => {
                // Within a tick all devices share one timestamp.
                if Some(record.sim_time) != self.current_time {
                    return Err(LogError::SchemaViolation(format!(
                        "tick {} carries two timestamps ({:?} and {})",
                        record.tick, self.current_time, record.sim_time
                    )));
                }
                if self.devices_this_tick.contains(&record.device) {
                    return Err(LogError::DuplicateRecord {
                        device: record.device.clone(),
                        tick: record.tick,
                    });
                }
            }
            _ => {
                // New tick: time must advance past the previous tick.
                if let Some(last) = self.last_time {
                    if record.sim_time <= last {
                        return Err(LogError::NonMonotonicTime {
                            last,
                            got: record.sim_time,
                        });
                    }
                }
                self.current_tick = Some(record.tick);
                self.current_time = Some(record.sim_time);
                self.last_time = Some(record.sim_time);
                self.devices_this_tick.clear();
            }
        }

        self.sink.append(record)?;
        self.devices_this_tick.insert(record.device.clone());
        self.records_written += 1;
        debug!(
            "logged tick {} device {} ({} records total)",
            record.tick, record.device, self.records_written
        );
        Ok(())
    }
}

/// In-memory sink. Records are pushed under a lock, so an external reader
/// holding a handle only ever observes fully appended records.
#[derive(Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared reader handle; clones see the same record sequence.
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            records: Arc::clone(&self.records),
        }
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        self.records
            .lock()
            .map_err(|_| LogError::Sink("memory sink poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemorySinkHandle {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySinkHandle {
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().expect("memory sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Line-delimited JSON sink: the schema header first, then one record per
/// line.
pub struct JsonlSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<(), LogError> {
        serde_json::to_writer(&mut self.writer, value)
            .map_err(|e| LogError::Sink(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| LogError::Sink(e.to_string()))
    }
}

impl<W: Write + Send> LogSink for JsonlSink<W> {
    fn begin(&mut self, schema: &LogSchema) -> Result<(), LogError> {
        self.write_line(schema)
    }

    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        self.write_line(record)
    }
}
