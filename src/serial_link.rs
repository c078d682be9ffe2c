//! Serial transport: newline-delimited text with a short read timeout.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port disconnected")]
    Disconnected,
}

impl LinkError {
    /// Whether this error means the peer went away (normal end of session)
    /// rather than a transient hiccup worth retrying.
    pub fn is_disconnection(&self) -> bool {
        match self {
            LinkError::Disconnected => true,
            LinkError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::UnexpectedEof
            ),
            LinkError::SerialPort(_) => true,
        }
    }
}

/// Blocking-with-timeout source of decoded, trimmed protocol lines.
///
/// `Ok(None)` means no complete line arrived within the timeout window; the
/// caller is expected to poll again (keeping it responsive to shutdown).
pub trait LineSource {
    fn read_line(&mut self) -> Result<Option<String>, LinkError>;
}

/// Sink for `\n`-terminated UTF-8 lines written back to the device.
pub trait LineSink {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;
}

/// Serial connection to the analyzer.
///
/// Opens with a short timeout so reads never block longer than the poll
/// interval, and splits into independent reader/writer halves so the
/// ingestion and interaction threads can own one each.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub const DEFAULT_BAUD: u32 = 115_200;
    const READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// Open the named port and clear any stale buffered traffic.
    pub fn open(port: &str, baud: u32) -> Result<Self, LinkError> {
        let port = serialport::new(port, baud)
            .timeout(Self::READ_TIMEOUT)
            .open()?;
        port.clear(serialport::ClearBuffer::All)?;
        Ok(Self { port })
    }

    /// Split into a reader for the ingestion loop and a writer for the
    /// interaction loop. The reader half keeps its own writer for protocol
    /// acknowledgements.
    pub fn split(self) -> Result<(SerialReader, SerialWriter), LinkError> {
        let writer = self.port.try_clone()?;
        Ok((
            SerialReader {
                port: self.port,
                pending: Vec::new(),
            },
            SerialWriter { port: writer },
        ))
    }

    /// An extra writer handle (the producer sends acknowledgements itself).
    pub fn clone_writer(&self) -> Result<SerialWriter, LinkError> {
        Ok(SerialWriter {
            port: self.port.try_clone()?,
        })
    }
}

pub struct SerialReader {
    port: Box<dyn SerialPort>,
    /// Bytes of the line currently being assembled.
    pending: Vec<u8>,
}

impl LineSource for SerialReader {
    fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        loop {
            let mut byte = [0u8; 1];
            match self.port.read_exact(&mut byte) {
                Ok(()) => {
                    if byte[0] == b'\n' {
                        // Undecodable bytes are replaced, never fatal.
                        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                        self.pending.clear();
                        if line.is_empty() {
                            continue;
                        }
                        return Ok(Some(line));
                    }
                    self.pending.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl LineSink for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }
}
