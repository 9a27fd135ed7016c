//! Channel event traces.
//!
//! When a simulation is built with a trace sink, every send and receive emits
//! an enter record before the operation and an exit record once it
//! completes. The exit record carries the task's time after resumption, so a
//! blocked transfer's recorded span includes the wait.
//!
//! Sinks:
//!
//! - [`TextSink`]: one `label tid channel TAG time` line per event
//! - [`JsonLinesSink`]: one JSON object per line
//! - [`TraceLog`]: in-memory, for tests and tools
//!
//! A sink that fails to write does not stop the simulation; the failure is
//! logged and counted in [`RunReport::trace_failures`](crate::RunReport::trace_failures).

use crate::channel::ChannelId;
use crate::task::TaskId;

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use tracing::warn;

/// Which side of which operation an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceKind {
    #[serde(rename = "ES")]
    EnterSend,
    #[serde(rename = "XS")]
    ExitSend,
    #[serde(rename = "ER")]
    EnterRecv,
    #[serde(rename = "XR")]
    ExitRecv,
}

impl TraceKind {
    /// The two-letter tag used in trace output.
    pub fn tag(self) -> &'static str {
        match self {
            TraceKind::EnterSend => "ES",
            TraceKind::ExitSend => "XS",
            TraceKind::EnterRecv => "ER",
            TraceKind::ExitRecv => "XR",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One trace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Task name, or `-unknown-`.
    pub label: String,
    pub task: TaskId,
    pub channel: ChannelId,
    pub kind: TraceKind,
    /// Task time, rendered by the time type's `Display`.
    pub time: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:8x} {} {}",
            self.label, self.task, self.channel, self.kind, self.time
        )
    }
}

/// Destination for trace records.
pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes events as text lines.
#[derive(Debug)]
pub struct TextSink<W> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for TextSink<W> {
    fn record(&mut self, event: &TraceEvent) -> io::Result<()> {
        writeln!(self.writer, "{event}")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Writes events as JSON lines.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for JsonLinesSink<W> {
    fn record(&mut self, event: &TraceEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Shared in-memory event log.
///
/// Clones refer to the same log, so a test can keep one clone and hand the
/// other to the simulation builder.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Events rendered as text lines.
    pub fn lines(&self) -> Vec<String> {
        self.events.borrow().iter().map(ToString::to_string).collect()
    }
}

impl TraceSink for TraceLog {
    fn record(&mut self, event: &TraceEvent) -> io::Result<()> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

/// The simulation's sink together with its failure count.
pub(crate) struct Tracer {
    sink: RefCell<Box<dyn TraceSink>>,
    failures: Cell<u64>,
}

impl Tracer {
    pub(crate) fn new(sink: Box<dyn TraceSink>) -> Self {
        Self {
            sink: RefCell::new(sink),
            failures: Cell::new(0),
        }
    }

    pub(crate) fn record(&self, event: &TraceEvent) {
        let result = match self.sink.try_borrow_mut() {
            Ok(mut sink) => sink.record(event),
            Err(_) => Err(io::Error::other("trace sink is busy")),
        };

        if let Err(err) = result {
            self.failures.set(self.failures.get() + 1);
            warn!(error = %err, event = %event, "failed to write trace record");
        }
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures.get()
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        match self.sink.try_borrow_mut() {
            Ok(mut sink) => sink.flush(),
            Err(_) => Err(io::Error::other("trace sink is busy")),
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        if let Err(err) = self.sink.get_mut().flush() {
            warn!(error = %err, "failed to flush trace sink");
        }
    }
}
