//! Log output that stays readable while the keyboard listener holds the
//! terminal in raw mode.

use std::io::{self, Write};

/// Writes to `inner`, turning `\n` into `\r\n` when raw mode is on.
pub struct TerminalWriter<W> {
    inner: W,
    raw: bool,
}

impl TerminalWriter<io::Stderr> {
    /// Stderr, checking the terminal mode at the time the log line is written.
    pub fn stderr() -> Self {
        let raw = crossterm::terminal::is_raw_mode_enabled().unwrap_or(false);
        Self::new(io::stderr(), raw)
    }
}

impl<W: Write> TerminalWriter<W> {
    pub fn new(inner: W, raw: bool) -> Self {
        Self { inner, raw }
    }
}

impl<W: Write> Write for TerminalWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw || !buf.contains(&b'\n') {
            return self.inner.write(buf);
        }

        let mut out = Vec::with_capacity(buf.len() + 8);
        for &byte in buf {
            if byte == b'\n' {
                out.push(b'\r');
            }
            out.push(byte);
        }
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(raw: bool, text: &str) -> String {
        let mut writer = TerminalWriter::new(Vec::new(), raw);
        writer.write_all(text.as_bytes()).unwrap();
        String::from_utf8(writer.inner).unwrap()
    }

    #[test]
    fn raw_mode_gets_carriage_returns() {
        assert_eq!(
            written(true, " INFO Started server\n WARN slow\n"),
            " INFO Started server\r\n WARN slow\r\n"
        );
    }

    #[test]
    fn cooked_mode_is_untouched() {
        assert_eq!(written(false, "line\n"), "line\n");
    }

    #[test]
    fn reports_the_caller_length() {
        let mut writer = TerminalWriter::new(Vec::new(), true);
        assert_eq!(writer.write(b"a\nb\n").unwrap(), 4);
        assert_eq!(writer.inner, b"a\r\nb\r\n");
    }
}
