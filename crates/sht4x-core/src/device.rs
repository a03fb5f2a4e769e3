//! Character device reader.
//!
//! [`DeviceReader`] owns at most one open stream to the sensor's device node
//! and turns its text output into [`SensorReading`]s.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, info, trace};

use sht4x_types::SensorReading;

use crate::error::{Error, Result};
use crate::traits::SensorDevice;

/// Longest line accepted from the device, newline included. Longer lines are
/// discarded whole.
pub const MAX_LINE_LEN: usize = 256;

/// Reader for a sensor exposed as a text device.
#[derive(Debug)]
pub struct DeviceReader {
    path: PathBuf,
    stream: Option<BufReader<File>>,
    line: Vec<u8>,
}

impl DeviceReader {
    /// Create a closed reader for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            line: Vec::with_capacity(MAX_LINE_LEN),
        }
    }
}

#[async_trait]
impl SensorDevice for DeviceReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| Error::device_open(&self.path, e))?;
        self.stream = Some(BufReader::new(file));
        info!("Device {} opened", self.path.display());
        Ok(())
    }

    async fn read_next(&mut self) -> Result<SensorReading> {
        let stream = self.stream.as_mut().ok_or(Error::NotOpen)?;

        let mut overlong = false;
        loop {
            self.line.clear();
            let read = (&mut *stream)
                .take(MAX_LINE_LEN as u64)
                .read_until(b'\n', &mut self.line)
                .await?;
            if read == 0 {
                return Err(Error::end_of_stream(&self.path));
            }

            let complete = self.line.last() == Some(&b'\n');
            if overlong {
                // Still inside the line that hit the limit
                overlong = !complete;
                continue;
            }
            if !complete && read == MAX_LINE_LEN {
                trace!("Discarding line longer than {} bytes", MAX_LINE_LEN);
                overlong = true;
                continue;
            }

            // Noisy devices may emit garbage bytes; decode lossily and let the
            // parser reject the line.
            let line = String::from_utf8_lossy(&self.line);
            match SensorReading::parse_line(&line, OffsetDateTime::now_utc()) {
                Ok(Some(reading)) => return Ok(reading),
                Ok(None) => {}
                Err(e) => trace!("Skipping line {:?}: {}", line.trim_end(), e),
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Device {} closed", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn device_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_read_skips_comments() {
        let file = device_file("# comment\n1001, 21.50, 55.25, 0\n");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();

        let reading = reader.read_next().await.unwrap();
        assert_eq!(reading.serial, 1001);
        assert!((reading.temperature - 21.50).abs() < 0.001);
        assert!((reading.humidity - 55.25).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_read_consecutive_lines() {
        let file = device_file("1, 20.0, 40.0, 0\n2, 21.0, 41.0, 1\n");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();

        assert_eq!(reader.read_next().await.unwrap().serial, 1);
        let second = reader.read_next().await.unwrap();
        assert_eq!(second.serial, 2);
        assert!(second.touched);
        assert!(matches!(
            reader.read_next().await,
            Err(Error::EndOfStream { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_skips_malformed_and_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"garbage\n\xff\xfe\n1001, hot, 55.2, 0\n")
            .unwrap();
        file.write_all(b"1002, 22.00, 50.00, 0\n").unwrap();
        file.flush().unwrap();

        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert_eq!(reader.read_next().await.unwrap().serial, 1002);
    }

    #[tokio::test]
    async fn test_overlong_line_is_discarded_whole() {
        // The tail after the limit would parse as a reading on its own
        let mut contents = "x".repeat(MAX_LINE_LEN);
        contents.push_str("1, 20.0, 40.0, 0\n");
        contents.push_str(&"y".repeat(MAX_LINE_LEN * 40));
        contents.push_str("\n2, 21.0, 41.0, 0\n");
        let file = device_file(&contents);

        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert_eq!(reader.read_next().await.unwrap().serial, 2);
        assert!(reader.line.capacity() <= MAX_LINE_LEN * 2);
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut line = "3, 19.5, 45.0, 0".to_string();
        line.push_str(&" ".repeat(MAX_LINE_LEN - line.len() - 1));
        line.push('\n');
        assert_eq!(line.len(), MAX_LINE_LEN);
        let file = device_file(&line);

        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert_eq!(reader.read_next().await.unwrap().serial, 3);
    }

    #[tokio::test]
    async fn test_read_last_line_without_newline() {
        let file = device_file("# header\n1001, 21.5, 55.2, 0");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert_eq!(reader.read_next().await.unwrap().serial, 1001);
    }

    #[tokio::test]
    async fn test_only_comments_is_end_of_stream() {
        let file = device_file("# one\n# two\n\n");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert!(matches!(
            reader.read_next().await,
            Err(Error::EndOfStream { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_end_of_stream() {
        let file = device_file("");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert!(reader.read_next().await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let mut reader = DeviceReader::new(&path);

        let err = reader.open().await.unwrap_err();
        assert!(matches!(err, Error::DeviceOpen { .. }));
        assert!(!reader.is_open());
    }

    #[tokio::test]
    async fn test_read_while_closed() {
        let mut reader = DeviceReader::new("/nonexistent/sht4x");
        assert!(matches!(reader.read_next().await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let file = device_file("1001, 21.5, 55.2, 0\n");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        assert!(reader.is_open());

        reader.close();
        reader.close();
        assert!(!reader.is_open());
        assert!(matches!(reader.read_next().await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_reopen_restarts_stream() {
        let file = device_file("1001, 21.5, 55.2, 0\n");
        let mut reader = DeviceReader::new(file.path());
        reader.open().await.unwrap();
        reader.read_next().await.unwrap();
        assert!(reader.read_next().await.is_err());

        reader.close();
        reader.open().await.unwrap();
        assert_eq!(reader.read_next().await.unwrap().serial, 1001);
    }
}
