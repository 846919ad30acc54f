use std::fmt;

use crate::utils::AutoEscape;
use crate::value::Value;

/// How a capture should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureMode {
    /// Captured output is collected into a value.
    Capture,
    /// Captured output is thrown away.
    Discard,
}

/// An abstraction over [`Write`](std::fmt::Write) for the rendering.
///
/// The evaluator writes all emitted chunks into an output.  Blocks
/// that capture their body (`{% set %}` blocks, `{% filter %}` blocks
/// and macro calls) push a capture onto the internal stack.  In
/// native-types mode the output additionally logs every emitted value
/// so a single expression template can round-trip without
/// stringification.
pub struct Output<'a> {
    w: &'a mut (dyn fmt::Write + 'a),
    capture_stack: Vec<Option<String>>,
    value_log: Option<Vec<Value>>,
    discard_hole: NullWriter,
}

pub struct NullWriter;

impl fmt::Write for NullWriter {
    #[inline]
    fn write_str(&mut self, _s: &str) -> fmt::Result {
        Ok(())
    }
}

impl<'a> Output<'a> {
    /// Creates an output writing into a string.
    pub(crate) fn with_string(buf: &'a mut String) -> Self {
        Self {
            w: buf,
            capture_stack: Vec::new(),
            value_log: None,
            discard_hole: NullWriter,
        }
    }

    /// Creates an output writing into any writer.
    pub(crate) fn with_write(w: &'a mut (dyn fmt::Write + 'a)) -> Self {
        Self {
            w,
            capture_stack: Vec::new(),
            value_log: None,
            discard_hole: NullWriter,
        }
    }

    /// Creates an output that additionally records emitted values.
    pub(crate) fn with_value_log(buf: &'a mut String) -> Self {
        Self {
            w: buf,
            capture_stack: Vec::new(),
            value_log: Some(Vec::new()),
            discard_hole: NullWriter,
        }
    }

    /// Begins capturing of output.
    pub(crate) fn begin_capture(&mut self, mode: CaptureMode) {
        self.capture_stack.push(match mode {
            CaptureMode::Capture => Some(String::new()),
            CaptureMode::Discard => None,
        });
    }

    /// Ends capturing and returns the captured string as value.
    pub(crate) fn end_capture(&mut self, auto_escape: AutoEscape) -> Value {
        let captured = self.capture_stack.pop().unwrap();
        match captured {
            Some(buf) => {
                if !matches!(auto_escape, AutoEscape::None) {
                    Value::from_safe_string(buf)
                } else {
                    Value::from(buf)
                }
            }
            None => Value::UNDEFINED,
        }
    }

    #[inline(always)]
    fn target(&mut self) -> &mut dyn fmt::Write {
        match self.capture_stack.last_mut() {
            Some(Some(stream)) => stream as _,
            Some(None) => &mut self.discard_hole,
            None => self.w,
        }
    }

    /// Records an emitted value in native-types mode.
    pub(crate) fn log_value(&mut self, value: &Value) {
        if self.capture_stack.is_empty() {
            if let Some(ref mut log) = self.value_log {
                log.push(value.clone());
            }
        }
    }

    /// Records a raw data chunk in native-types mode.
    pub(crate) fn log_raw(&mut self, raw: &str) {
        if self.capture_stack.is_empty() {
            if let Some(ref mut log) = self.value_log {
                if !raw.is_empty() {
                    log.push(Value::from(raw));
                }
            }
        }
    }

    /// Consumes the value log.
    pub(crate) fn take_value_log(&mut self) -> Vec<Value> {
        self.value_log.take().unwrap_or_default()
    }

    /// Writes some data to the underlying buffer.
    #[inline]
    pub fn write_str(&mut self, s: &str) -> fmt::Result {
        self.target().write_str(s)
    }

    /// Writes some formatted data into this output.
    #[inline]
    pub fn write_fmt(&mut self, a: fmt::Arguments<'_>) -> fmt::Result {
        self.target().write_fmt(a)
    }
}


impl fmt::Write for Output<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        fmt::Write::write_str(self.target(), s)
    }

    #[inline]
    fn write_char(&mut self, c: char) -> fmt::Result {
        fmt::Write::write_char(self.target(), c)
    }

    #[inline]
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        fmt::Write::write_fmt(self.target(), args)
    }
}
