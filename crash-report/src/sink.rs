use crate::Error;
use report_json::{JsonError, ReportSink};
use std::{fs::File, io::Write, path::Path};

/// The size of the buffer data is gathered in before being written to disk
pub const SINK_BUFFER_SIZE: usize = 1024;

/// Writes report data to a file through a small fixed buffer.
///
/// Only [`ReportSink::flush`] guarantees that data has reached the file, which
/// report writing does after every top-level section.
pub struct BufferedFileSink {
    file: File,
    buffer: [u8; SINK_BUFFER_SIZE],
    len: usize,
}

impl BufferedFileSink {
    /// Creates, or truncates, the file at `path`
    pub fn create(path: &Path) -> Result<Self, Error> {
        Ok(Self::new(File::create(path)?))
    }

    pub fn new(file: File) -> Self {
        Self {
            file,
            buffer: [0; SINK_BUFFER_SIZE],
            len: 0,
        }
    }

    fn write_file(&mut self, data: &[u8]) -> Result<(), JsonError> {
        self.file.write_all(data).map_err(|err| {
            log::error!("failed to write report data: {err}");
            JsonError::CannotAddData
        })
    }

    fn flush_buffer(&mut self) -> Result<(), JsonError> {
        if self.len == 0 {
            return Ok(());
        }

        let len = self.len;
        self.len = 0;
        let buffer = self.buffer;
        self.write_file(&buffer[..len])
    }
}

impl ReportSink for BufferedFileSink {
    fn add_data(&mut self, data: &[u8]) -> Result<(), JsonError> {
        if data.len() > SINK_BUFFER_SIZE - self.len {
            self.flush_buffer()?;
        }

        if data.len() >= SINK_BUFFER_SIZE {
            return self.write_file(data);
        }

        self.buffer[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), JsonError> {
        self.flush_buffer()
    }
}

impl Drop for BufferedFileSink {
    fn drop(&mut self) {
        if let Err(err) = self.flush_buffer() {
            log::error!("failed to flush report on close: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_flush_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut sink = BufferedFileSink::create(&path).unwrap();
        sink.add_data(b"{\"a\":").unwrap();
        assert!(std::fs::read(&path).unwrap().is_empty());

        sink.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":");

        let big = vec![b'1'; SINK_BUFFER_SIZE * 2 + 3];
        sink.add_data(b"[").unwrap();
        sink.add_data(&big).unwrap();
        // Oversized writes bypass the buffer, after flushing what preceded them
        assert_eq!(std::fs::read(&path).unwrap().len(), 5 + 1 + big.len());

        sink.add_data(b"]}").unwrap();
        drop(sink);

        let contents = std::fs::read(&path).unwrap();
        assert!(contents.ends_with(b"11]}"));
    }
}
