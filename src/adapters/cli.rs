//! Line-oriented command adapter (§6 "Command wire/CLI", optional).
//!
//! Assembles raw bytes into `\n`-terminated lines up to the port's 64-byte
//! cap, silently dropping anything past that length rather than blocking —
//! a malformed or over-long line must never stall the cooperative loop.
//! On ESP-IDF, bytes are pulled from a UART driver handed in at
//! construction; the PC-side terminal/monitor that talks to the other end
//! of that UART is out of scope here (§9 non-goals).

use heapless::String;

use crate::error::Result;
use crate::ports::CommandLinePort;

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::uart::UartDriver;

struct LineAssembler {
    buf: String<64>,
    overflowed: bool,
}

impl LineAssembler {
    const fn new() -> Self {
        Self {
            buf: String::new(),
            overflowed: false,
        }
    }

    /// Feed one byte; returns `Some(line)` once a `\n` completes it.
    fn push(&mut self, byte: u8) -> Option<String<64>> {
        if byte == b'\n' {
            if self.overflowed {
                self.buf.clear();
                self.overflowed = false;
                return None;
            }
            let line = self.buf.clone();
            self.buf.clear();
            return Some(line);
        }
        if byte == b'\r' {
            return None;
        }
        if self.buf.push(byte as char).is_err() {
            self.overflowed = true;
        }
        None
    }
}

#[cfg(target_os = "espidf")]
pub struct UartCliAdapter<'d> {
    uart: UartDriver<'d>,
    assembler: LineAssembler,
}

#[cfg(target_os = "espidf")]
impl<'d> UartCliAdapter<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self {
            uart,
            assembler: LineAssembler::new(),
        }
    }
}

#[cfg(target_os = "espidf")]
impl<'d> CommandLinePort for UartCliAdapter<'d> {
    fn read_line(&mut self) -> Result<Option<String<64>>> {
        let mut byte = [0u8; 1];
        while self.uart.read(&mut byte, 0).unwrap_or(0) > 0 {
            if let Some(line) = self.assembler.push(byte[0]) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.uart.write(line.as_bytes()).ok();
        self.uart.write(b"\r\n").ok();
        Ok(())
    }
}

/// Host-simulation backend: bytes are pushed in by the test harness via
/// [`FakeCliAdapter::feed`] rather than read from a real serial port.
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct FakeCliAdapter {
    assembler: LineAssembler,
    pending: std::collections::VecDeque<u8>,
    pub written: std::vec::Vec<std::string::String>,
}

#[cfg(not(target_os = "espidf"))]
impl FakeCliAdapter {
    pub fn new() -> Self {
        Self {
            assembler: LineAssembler::new(),
            pending: std::collections::VecDeque::new(),
            written: std::vec::Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }
}

#[cfg(not(target_os = "espidf"))]
impl CommandLinePort for FakeCliAdapter {
    fn read_line(&mut self) -> Result<Option<String<64>>> {
        while let Some(byte) = self.pending.pop_front() {
            if let Some(line) = self.assembler.push(byte) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.written.push(line.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_single_line() {
        let mut cli = FakeCliAdapter::new();
        cli.feed(b"STATUS\n");
        assert_eq!(cli.read_line().unwrap().unwrap(), "STATUS");
    }

    #[test]
    fn no_line_until_newline_seen() {
        let mut cli = FakeCliAdapter::new();
        cli.feed(b"STAT");
        assert!(cli.read_line().unwrap().is_none());
        cli.feed(b"US\n");
        assert_eq!(cli.read_line().unwrap().unwrap(), "STATUS");
    }

    #[test]
    fn carriage_return_is_ignored() {
        let mut cli = FakeCliAdapter::new();
        cli.feed(b"PING\r\n");
        assert_eq!(cli.read_line().unwrap().unwrap(), "PING");
    }

    #[test]
    fn overlong_line_is_dropped_not_truncated() {
        let mut cli = FakeCliAdapter::new();
        let long = [b'x'; 100];
        cli.feed(&long);
        cli.feed(b"\n");
        assert!(cli.read_line().unwrap().is_none());
        cli.feed(b"ok\n");
        assert_eq!(cli.read_line().unwrap().unwrap(), "ok");
    }

    #[test]
    fn write_line_records_output() {
        let mut cli = FakeCliAdapter::new();
        cli.write_line("OK").unwrap();
        assert_eq!(cli.written, vec!["OK".to_string()]);
    }
}
