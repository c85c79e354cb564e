//! Per-filesystem write-only log sinks.
//!
//! Two streams: a coarse operational log and a debug log that receives, among
//! other things, the raw bytes of every rejected metadata entry. Both default
//! to discarding. Sinks are per-filesystem rather than process-global;
//! interleaving between threads is acceptable, ordering within one sink is
//! whatever the writer provides.

use parking_lot::Mutex;
use std::io::Write;

/// One write-only sink. Write errors are swallowed: logging must never fail
/// an operation.
pub(crate) struct LogSink {
    inner: Mutex<Option<Box<dyn Write + Send>>>,
}

impl LogSink {
    pub(crate) fn discard() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, writer: Box<dyn Write + Send>) {
        *self.inner.lock() = Some(writer);
    }

    pub(crate) fn write_line(&self, line: &str) {
        if let Some(writer) = self.inner.lock().as_mut() {
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
    }
}

/// The filesystem's pair of sinks.
pub(crate) struct Sinks {
    pub(crate) log: LogSink,
    pub(crate) debug: LogSink,
}

impl Sinks {
    pub(crate) fn discard() -> Self {
        Self {
            log: LogSink::discard(),
            debug: LogSink::discard(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::SharedBuf;
    use super::*;

    #[test]
    fn discarded_sink_swallows_writes() {
        let sink = LogSink::discard();
        sink.write_line("nobody hears this");
    }

    #[test]
    fn set_sink_receives_lines() {
        let sink = LogSink::discard();
        let buf = SharedBuf::default();
        sink.set(Box::new(buf.clone()));
        sink.write_line("hello");
        sink.write_line("world");
        assert_eq!(buf.contents(), "hello\nworld\n");
    }
}
