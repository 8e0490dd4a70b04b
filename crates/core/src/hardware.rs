//! Authentication hardware.
//!
//! Card readers at MedLink terminals are USB-serial NFC modules that print each scanned UID on its
//! own line, sometimes preceded by a banner or diagnostic lines starting with `#`. The reader
//! device is opened as a plain file, so no serial-port configuration happens here; the port is
//! expected to be configured by the OS (for example with `stty`).
//!
//! Fingerprint sensors are abstracted behind [`FingerprintSensor`]. No sensor driver ships with
//! MedLink; [`UnavailableSensor`] is used where a sensor would be, and [`ScriptedSensor`] replays
//! predetermined matches for demos and tests.

use crate::error::{MedLinkError, MedLinkResult};
use medlink_types::CardUid;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A source of scanned card UIDs.
pub trait CardReader {
    /// Blocks until the next card is scanned and returns its UID.
    fn read_uid(&mut self) -> MedLinkResult<CardUid>;
}

/// Line-oriented card reader over any buffered byte stream.
#[derive(Debug)]
pub struct SerialCardReader<R> {
    input: R,
    line: String,
}

impl SerialCardReader<BufReader<File>> {
    /// Opens a reader device such as `/dev/ttyUSB0`.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError::Hardware` if the device cannot be opened.
    pub fn open(path: &Path) -> MedLinkResult<Self> {
        let file = File::open(path).map_err(|e| {
            MedLinkError::Hardware(format!("cannot open card reader {}: {e}", path.display()))
        })?;
        tracing::info!("opened card reader {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> SerialCardReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }
}

impl<R: BufRead> CardReader for SerialCardReader<R> {
    fn read_uid(&mut self) -> MedLinkResult<CardUid> {
        loop {
            self.line.clear();
            let read = self
                .input
                .read_line(&mut self.line)
                .map_err(|e| MedLinkError::Hardware(format!("card reader I/O error: {e}")))?;
            if read == 0 {
                return Err(MedLinkError::Hardware("reader closed".into()));
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // Some firmwares prefix the UID with a label, e.g. `UID: 04 A2 1B 7F`.
            let raw = trimmed
                .split_once(':')
                .filter(|(label, _)| label.trim().eq_ignore_ascii_case("uid"))
                .map_or(trimmed, |(_, rest)| rest);

            let uid = CardUid::parse(raw)?;
            tracing::debug!("card scanned: {}", uid);
            return Ok(uid);
        }
    }
}

/// A fingerprint sensor that matches a finger against its enrolled templates.
pub trait FingerprintSensor {
    /// Waits for a finger and returns the sensor slot of the matching template.
    fn capture(&mut self) -> MedLinkResult<u16>;
}

/// Placeholder used when no fingerprint hardware is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableSensor;

impl FingerprintSensor for UnavailableSensor {
    fn capture(&mut self) -> MedLinkResult<u16> {
        Err(MedLinkError::Hardware(
            "fingerprint sensor not available".into(),
        ))
    }
}

/// Replays a fixed sequence of matches, then reports the sensor as unavailable.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSensor {
    slots: VecDeque<u16>,
}

impl ScriptedSensor {
    pub fn new(slots: impl IntoIterator<Item = u16>) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }
}

impl FingerprintSensor for ScriptedSensor {
    fn capture(&mut self) -> MedLinkResult<u16> {
        self.slots
            .pop_front()
            .ok_or_else(|| MedLinkError::Hardware("fingerprint sensor not available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn serial_reader_skips_noise_and_parses_uids() {
        let input = "# ACR122 ready\n\n04:a2:1b:7f\r\nUID: 04 11 22 33 44 55 66\n";
        let mut reader = SerialCardReader::new(Cursor::new(input));

        assert_eq!(reader.read_uid().unwrap().as_str(), "04A21B7F");
        assert_eq!(reader.read_uid().unwrap().as_str(), "04112233445566");

        let err = reader.read_uid().expect_err("stream is exhausted");
        assert!(matches!(err, MedLinkError::Hardware(ref m) if m == "reader closed"));
    }

    #[test]
    fn serial_reader_reports_garbage() {
        let mut reader = SerialCardReader::new(Cursor::new("not-a-card\n"));
        assert!(matches!(reader.read_uid(), Err(MedLinkError::CardUid(_))));
    }

    #[test]
    fn serial_reader_opens_device_path() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "04A21B7F").unwrap();

        let mut reader = SerialCardReader::open(file.path()).expect("open should succeed");
        assert_eq!(reader.read_uid().unwrap().as_str(), "04A21B7F");

        let missing = SerialCardReader::open(Path::new("/nonexistent/ttyUSB9"));
        assert!(matches!(missing, Err(MedLinkError::Hardware(_))));
    }

    #[test]
    fn sensors() {
        assert!(UnavailableSensor.capture().is_err());

        let mut scripted = ScriptedSensor::new([3, 7]);
        assert_eq!(scripted.capture().unwrap(), 3);
        assert_eq!(scripted.capture().unwrap(), 7);
        assert!(scripted.capture().is_err());
    }
}
