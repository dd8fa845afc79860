use std::cell::{Cell, RefCell};
use std::io::{Result as IoResult, Write};
use std::rc::Rc;

/// Memory-backed writer used as the interpreter console in tests and as the
/// sink for captured module output.
#[derive(Default, Clone)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer plus a shared handle for reading what was written after the
    /// writer has been moved into an interpreter.
    pub fn with_handle() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let writer = Self::new();
        let handle = Rc::clone(&writer.buf);
        (writer, handle)
    }

    /// Collected bytes decoded lossily.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.borrow()).into_owned()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Raised when a capture is requested while another one is still open.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("output capture is already active")]
pub struct CaptureError;

/// The single, non-reentrant slot through which module console output is
/// redirected while a pipe stage runs.
#[derive(Default)]
pub struct OutputCapture {
    active: Cell<bool>,
}

impl OutputCapture {
    /// Start redirecting into a fresh in-memory sink.
    ///
    /// The redirection ends when the returned guard is dropped, on every exit path.
    pub fn acquire(&self) -> Result<CaptureGuard<'_>, CaptureError> {
        if self.active.replace(true) {
            return Err(CaptureError);
        }
        tracing::trace!(target: "pipeline", "output capture acquired");
        Ok(CaptureGuard {
            slot: self,
            sink: MemWriter::new(),
        })
    }

    /// Whether a capture is currently open.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

/// Scoped ownership of the [`OutputCapture`] slot.
pub struct CaptureGuard<'a> {
    slot: &'a OutputCapture,
    sink: MemWriter,
}

impl CaptureGuard<'_> {
    /// Everything written through the guard so far.
    pub fn captured(&self) -> String {
        self.sink.contents()
    }
}

impl Write for CaptureGuard<'_> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.sink.write(data)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.sink.flush()
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.slot.active.set(false);
        tracing::trace!(target: "pipeline", "output capture released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_writer_shares_buffer_with_handle() {
        let (mut writer, handle) = MemWriter::with_handle();
        write!(writer, "abc").unwrap();
        assert_eq!(handle.borrow().as_slice(), b"abc");
        assert_eq!(writer.contents(), "abc");
    }

    #[test]
    fn capture_is_not_reentrant() {
        let capture = OutputCapture::default();
        let mut first = capture.acquire().unwrap();
        assert!(capture.is_active());
        assert_eq!(capture.acquire().err(), Some(CaptureError));

        writeln!(first, "line").unwrap();
        assert_eq!(first.captured(), "line\n");
        drop(first);

        assert!(!capture.is_active());
        assert!(capture.acquire().is_ok());
    }

    #[test]
    fn capture_is_released_when_unwinding_through_an_error() {
        let capture = OutputCapture::default();
        let result: Result<(), CaptureError> = (|| {
            let _guard = capture.acquire()?;
            Err(CaptureError)
        })();
        assert!(result.is_err());
        assert!(!capture.is_active());
    }
}
