use report_json::{Encoder, JsonError, ReportSink};
use std::{io::Read, os::fd::AsRawFd, path::Path, ptr};

/// The operations report sections, and user supplied callbacks, use to add
/// data to a report.
///
/// Failures are logged by the implementation and otherwise ignored so that
/// a single bad element never prevents the rest of a report being written.
pub trait ReportWriter {
    fn add_boolean(&mut self, name: Option<&str>, value: bool);
    fn add_float(&mut self, name: Option<&str>, value: f64);
    fn add_integer(&mut self, name: Option<&str>, value: i64);
    fn add_unsigned(&mut self, name: Option<&str>, value: u64);
    /// A `None` value is written as `null`
    fn add_string(&mut self, name: Option<&str>, value: Option<&str>);
    fn add_null(&mut self, name: Option<&str>);
    /// Adds binary data as a hex string
    fn add_data(&mut self, name: Option<&str>, data: &[u8]);
    fn begin_data(&mut self, name: Option<&str>);
    fn append_data(&mut self, data: &[u8]);
    fn end_data(&mut self);
    /// A `None` value is written as `null`
    fn add_uuid(&mut self, name: Option<&str>, uuid: Option<&[u8; 16]>);
    /// Adds the contents of a text file as a single string
    fn add_text_file(&mut self, name: Option<&str>, path: &Path);
    /// Splices already encoded JSON. Invalid JSON is replaced by an object
    /// holding an error message and the original text.
    fn add_json(&mut self, name: Option<&str>, json: &[u8], close_last_container: bool);
    /// Re-encodes a possibly truncated JSON document, returning false if it
    /// was not complete
    fn add_json_document(&mut self, name: Option<&str>, data: &[u8], close_last_container: bool)
    -> bool;
    /// Re-encodes the JSON document in a file, returning false if it could not
    /// be read or was not complete
    fn add_json_file(&mut self, name: Option<&str>, path: &Path, close_last_container: bool) -> bool;
    fn begin_object(&mut self, name: Option<&str>);
    fn begin_array(&mut self, name: Option<&str>);
    fn end_container(&mut self);
    /// Pushes everything written so far to durable storage
    fn flush(&mut self);
}

/// The [`ReportWriter`] that encodes a report as JSON
pub struct JsonReportWriter<S: ReportSink> {
    encoder: Encoder<S>,
}

impl<S: ReportSink> JsonReportWriter<S> {
    pub fn new(sink: S, pretty_print: bool) -> Self {
        Self {
            encoder: Encoder::new(sink, pretty_print),
        }
    }

    /// Closes every open container, completing the document
    pub fn end_encode(&mut self) {
        let res = self.encoder.end_encode();
        Self::check("end_encode", None, res);
    }

    #[inline]
    pub fn encoder(&self) -> &Encoder<S> {
        &self.encoder
    }

    #[inline]
    pub fn into_inner(self) -> S {
        self.encoder.into_inner()
    }

    #[inline]
    fn check(op: &str, name: Option<&str>, res: Result<(), JsonError>) {
        if let Err(err) = res {
            log::warn!("{op} failed for {}: {err}", name.unwrap_or("<unnamed>"));
        }
    }
}

impl<S: ReportSink> ReportWriter for JsonReportWriter<S> {
    fn add_boolean(&mut self, name: Option<&str>, value: bool) {
        Self::check("add_boolean", name, self.encoder.add_boolean(name, value));
    }

    fn add_float(&mut self, name: Option<&str>, value: f64) {
        Self::check("add_float", name, self.encoder.add_float(name, value));
    }

    fn add_integer(&mut self, name: Option<&str>, value: i64) {
        Self::check("add_integer", name, self.encoder.add_integer(name, value));
    }

    fn add_unsigned(&mut self, name: Option<&str>, value: u64) {
        Self::check("add_unsigned", name, self.encoder.add_unsigned(name, value));
    }

    fn add_string(&mut self, name: Option<&str>, value: Option<&str>) {
        Self::check("add_string", name, self.encoder.add_string(name, value));
    }

    fn add_null(&mut self, name: Option<&str>) {
        Self::check("add_null", name, self.encoder.add_null(name));
    }

    fn add_data(&mut self, name: Option<&str>, data: &[u8]) {
        Self::check("add_data", name, self.encoder.add_data(name, data));
    }

    fn begin_data(&mut self, name: Option<&str>) {
        Self::check("begin_data", name, self.encoder.begin_data_element(name));
    }

    fn append_data(&mut self, data: &[u8]) {
        Self::check("append_data", None, self.encoder.append_data_element(data));
    }

    fn end_data(&mut self) {
        Self::check("end_data", None, self.encoder.end_data_element());
    }

    fn add_uuid(&mut self, name: Option<&str>, uuid: Option<&[u8; 16]>) {
        Self::check("add_uuid", name, self.encoder.add_uuid(name, uuid));
    }

    fn add_text_file(&mut self, name: Option<&str>, path: &Path) {
        let mut file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(err) => {
                log::error!("could not open {}: {err}", path.display());
                return;
            }
        };

        if let Err(err) = self.encoder.begin_string_element(name) {
            log::error!("could not start string element: {err}");
            return;
        }

        let mut buffer = [0u8; 512];
        // Bytes of a character split across reads
        let mut carry = 0;
        loop {
            let read = match file.read(&mut buffer[carry..]) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("failed to read {}: {err}", path.display());
                    break;
                }
            };

            let available = carry + read;
            let (text, consumed) = match std::str::from_utf8(&buffer[..available]) {
                Ok(text) => (text, available),
                Err(err) => {
                    let valid = err.valid_up_to();
                    let text = std::str::from_utf8(&buffer[..valid]).unwrap_or_default();
                    // Invalid sequences are dropped, incomplete ones kept
                    let skip = err.error_len().unwrap_or(0);
                    (text, valid + skip)
                }
            };

            if let Err(err) = self.encoder.append_string_element(text) {
                log::error!("could not append string element: {err}");
                break;
            }

            buffer.copy_within(consumed..available, 0);
            carry = available - consumed;
        }

        Self::check("end_string_element", name, self.encoder.end_string_element());
    }

    fn add_json(&mut self, name: Option<&str>, json: &[u8], close_last_container: bool) {
        let res = self
            .encoder
            .add_preformatted_json(name, json, close_last_container);
        Self::check("add_json", name, res);
    }

    fn add_json_document(
        &mut self,
        name: Option<&str>,
        data: &[u8],
        close_last_container: bool,
    ) -> bool {
        match self.encoder.add_json_document(name, data, close_last_container) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("embedded JSON document is incomplete: {err}");
                false
            }
        }
    }

    fn add_json_file(&mut self, name: Option<&str>, path: &Path, close_last_container: bool) -> bool {
        // Mapped rather than read so no heap allocation is needed while crashed
        match MappedFile::open(path) {
            Ok(file) => self.add_json_document(name, file.as_slice(), close_last_container),
            Err(err) => {
                log::error!("could not read {}: {err}", path.display());
                if !close_last_container {
                    self.begin_object(name);
                }
                false
            }
        }
    }

    fn begin_object(&mut self, name: Option<&str>) {
        Self::check("begin_object", name, self.encoder.begin_object(name));
    }

    fn begin_array(&mut self, name: Option<&str>) {
        Self::check("begin_array", name, self.encoder.begin_array(name));
    }

    fn end_container(&mut self) {
        Self::check("end_container", None, self.encoder.end_container());
    }

    fn flush(&mut self) {
        Self::check("flush", None, self.encoder.flush());
    }
}

/// A read only private mapping of a whole file
struct MappedFile {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MappedFile {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_too_big| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;

        // Zero length mappings are rejected by mmap
        if len == 0 {
            return Ok(Self {
                ptr: ptr::null_mut(),
                len,
            });
        }

        // SAFETY: syscall, the mapping outlives the file descriptor
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }

        // SAFETY: the mapping is valid and readable for `len` bytes until drop
        unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: we own the mapping
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

/// Formats a name on the stack, eg. `stack@0x7ffd5e8c`
pub(crate) struct NameBuf {
    buf: [u8; 40],
    len: usize,
}

impl NameBuf {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0; 40],
            len: 0,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl std::fmt::Write for NameBuf {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(std::fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(writer: JsonReportWriter<Vec<u8>>) -> serde_json::Value {
        let out = writer.into_inner();
        serde_json::from_slice(&out)
            .unwrap_or_else(|err| panic!("{err}: {}", String::from_utf8_lossy(&out)))
    }

    #[test]
    fn errors_do_not_stop_writing() {
        let mut writer = JsonReportWriter::new(Vec::new(), false);
        writer.begin_object(None);
        // Missing names inside objects are rejected without writing anything
        writer.add_integer(None, 1);
        writer.add_integer(Some("kept"), 2);
        writer.add_json(Some("user"), b"{\"a\": [1, 2", true);
        writer.end_encode();

        let report = parse(writer);
        assert_eq!(report["kept"], 2);
        assert_eq!(report["user"]["json_data"], "{\"a\": [1, 2");
        assert!(report["user"]["error"].as_str().unwrap().starts_with("Invalid JSON data: "));
    }

    #[test]
    fn text_files_are_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        // Multibyte characters straddle the read buffer boundary
        let text = format!("{}\n\"quoted\"", "é".repeat(700));
        std::fs::write(&path, &text).unwrap();

        let mut writer = JsonReportWriter::new(Vec::new(), true);
        writer.begin_object(None);
        writer.add_text_file(Some("notes"), &path);
        writer.add_text_file(Some("missing"), &dir.path().join("missing.txt"));
        writer.end_encode();

        let report = parse(writer);
        assert_eq!(report["notes"], text.as_str());
        assert!(report.get("missing").is_none());
    }

    #[test]
    fn json_files_are_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previous.json");
        std::fs::write(&path, br#"{"report": {"id": "abc"}, "crash": {"threads": [{"index"#).unwrap();

        let mut writer = JsonReportWriter::new(Vec::new(), false);
        writer.begin_object(None);
        assert!(!writer.add_json_file(Some("recrash_report"), &path, false));
        writer.add_boolean(Some("incomplete"), true);
        writer.end_container();
        assert!(!writer.add_json_file(Some("gone"), &dir.path().join("gone.json"), false));
        writer.end_container();
        writer.add_uuid(Some("id"), Some(&[0xab; 16]));
        writer.end_encode();

        let report = parse(writer);
        assert_eq!(report["recrash_report"]["report"]["id"], "abc");
        assert_eq!(report["recrash_report"]["incomplete"], true);
        assert!(report["gone"].as_object().unwrap().is_empty());
        assert_eq!(report["id"], "ABABABAB-ABAB-ABAB-ABAB-ABABABABABAB");
    }

    #[test]
    fn json_files_are_mapped() {
        let dir = tempfile::tempdir().unwrap();

        // Larger than any buffer used while writing a report
        let path = dir.path().join("large.json");
        let numbers: Vec<String> = (0..50_000).map(|i| i.to_string()).collect();
        std::fs::write(
            &path,
            format!(r#"{{"n": [{}], "last": "end"}}"#, numbers.join(", ")),
        )
        .unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 256 * 1024);

        let mapped = MappedFile::open(&path).unwrap();
        assert_eq!(mapped.as_slice(), std::fs::read(&path).unwrap().as_slice());
        drop(mapped);

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, b"").unwrap();
        assert!(MappedFile::open(&empty).unwrap().as_slice().is_empty());

        let mut writer = JsonReportWriter::new(Vec::new(), false);
        writer.begin_object(None);
        assert!(writer.add_json_file(Some("large"), &path, true));
        assert!(!writer.add_json_file(Some("empty"), &empty, true));
        writer.end_encode();

        let report = parse(writer);
        assert_eq!(report["large"]["n"].as_array().unwrap().len(), 50_000);
        assert_eq!(report["large"]["n"][49_999], 49_999);
        assert_eq!(report["large"]["last"], "end");
    }
}
