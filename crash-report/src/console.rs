use std::{io::Read, path::Path};

/// The maximum length of a single line, the rest of a longer line is dropped
pub const MAX_LINE_LENGTH: usize = 1024;

/// Supplies the lines of the application's console log
pub trait ConsoleLog: Send + Sync {
    /// Invokes `on_line` for every line of the log at `path`
    fn read_lines(&self, path: &Path, on_line: &mut dyn FnMut(&str)) -> std::io::Result<()>;
}

/// Reads the log from a plain text file through a fixed buffer
#[derive(Copy, Clone, Default)]
pub struct FileConsoleLog;

impl ConsoleLog for FileConsoleLog {
    fn read_lines(&self, path: &Path, on_line: &mut dyn FnMut(&str)) -> std::io::Result<()> {
        let mut file = std::fs::File::open(path)?;

        let mut read_buf = [0u8; 1024];
        let mut line = [0u8; MAX_LINE_LENGTH];
        let mut len = 0;

        let emit = |line: &[u8], on_line: &mut dyn FnMut(&str)| {
            let valid = match std::str::from_utf8(line) {
                Ok(s) => s,
                Err(err) => std::str::from_utf8(&line[..err.valid_up_to()]).unwrap_or_default(),
            };
            on_line(valid.strip_suffix('\r').unwrap_or(valid));
        };

        loop {
            let read = match file.read(&mut read_buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            for &byte in &read_buf[..read] {
                if byte == b'\n' {
                    emit(&line[..len], on_line);
                    len = 0;
                } else if len < line.len() {
                    line[len] = byte;
                    len += 1;
                }
            }
        }

        if len > 0 {
            emit(&line[..len], on_line);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");

        let long = "x".repeat(MAX_LINE_LENGTH + 100);
        std::fs::write(&path, format!("first\r\nsecond\n\n{long}\nlast")).unwrap();

        let mut lines = Vec::new();
        FileConsoleLog
            .read_lines(&path, &mut |line| lines.push(line.to_owned()))
            .unwrap();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "first");
        assert_eq!(lines[1], "second");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3].len(), MAX_LINE_LENGTH);
        assert_eq!(lines[4], "last");

        assert!(FileConsoleLog.read_lines(&dir.path().join("missing"), &mut |_| {}).is_err());
    }
}
