use crate::{DecodeCallbacks, JsonError, ReportSink, decoder};
use std::fmt::Write as _;

/// The maximum number of containers that can be open at once, in both the
/// encoder and the decoder
pub const MAX_CONTAINER_DEPTH: usize = 200;

const INDENT: &[u8] = b"    ";
const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Scratch space used when re-encoding an existing document, one quarter of
/// which holds element names
const REENCODE_BUFFER_SIZE: usize = 4096;

/// Fixed size formatting target so numbers can be written without allocating
struct NumBuf {
    buf: [u8; 64],
    len: usize,
}

impl NumBuf {
    #[inline]
    fn new() -> Self {
        Self {
            buf: [0; 64],
            len: 0,
        }
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl std::fmt::Write for NumBuf {
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

/// Streaming JSON encoder.
///
/// Elements are written to the [`ReportSink`] as soon as they are added, the
/// only state kept is one flag per open container recording whether it is an
/// object (and so requires element names) plus whether the innermost
/// container has had an entry yet (to place commas).
///
/// Nothing is allocated while encoding, which makes the encoder usable from
/// a compromised context.
pub struct Encoder<S> {
    sink: S,
    pretty_print: bool,
    /// Index 0 is the top level, which never requires names
    is_object: [bool; MAX_CONTAINER_DEPTH + 1],
    level: usize,
    first_entry: bool,
}

impl<S: ReportSink> Encoder<S> {
    /// Begins a new encoding session that writes to `sink`
    pub fn new(sink: S, pretty_print: bool) -> Self {
        Self {
            sink,
            pretty_print,
            is_object: [false; MAX_CONTAINER_DEPTH + 1],
            level: 0,
            first_entry: true,
        }
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline]
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// The number of containers currently open
    #[inline]
    pub fn depth(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn flush(&mut self) -> Result<(), JsonError> {
        self.sink.flush()
    }

    /// Closes every container that is still open
    pub fn end_encode(&mut self) -> Result<(), JsonError> {
        while self.level > 0 {
            self.end_container()?;
        }
        Ok(())
    }

    /// Passes `data` straight through to the sink without any checks
    #[inline]
    pub fn add_raw_json(&mut self, data: &[u8]) -> Result<(), JsonError> {
        self.sink.add_data(data)
    }

    fn newline_indent(&mut self) -> Result<(), JsonError> {
        self.add_raw_json(b"\n")?;
        for _ in 0..self.level {
            self.add_raw_json(INDENT)?;
        }
        Ok(())
    }

    /// Writes the separator, indentation and (inside objects) name that must
    /// precede every element
    pub fn begin_element(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        let name = if self.is_object[self.level] {
            Some(name.ok_or(JsonError::InvalidData)?)
        } else {
            None
        };

        if !self.first_entry {
            self.add_raw_json(b",")?;
        }
        if self.pretty_print && self.level > 0 {
            self.newline_indent()?;
        }
        self.first_entry = false;

        if let Some(name) = name {
            self.add_raw_json(b"\"")?;
            self.escape(name)?;
            let separator: &[u8] = if self.pretty_print { b"\": " } else { b"\":" };
            self.add_raw_json(separator)?;
        }
        Ok(())
    }

    fn begin_container(&mut self, name: Option<&str>, is_object: bool) -> Result<(), JsonError> {
        if self.level >= MAX_CONTAINER_DEPTH {
            log::warn!("unable to open container, maximum depth of {MAX_CONTAINER_DEPTH} reached");
            return Err(JsonError::NestingTooDeep);
        }

        self.begin_element(name)?;
        self.add_raw_json(if is_object { b"{" } else { b"[" })?;
        self.level += 1;
        self.is_object[self.level] = is_object;
        self.first_entry = true;
        Ok(())
    }

    #[inline]
    pub fn begin_object(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.begin_container(name, true)
    }

    #[inline]
    pub fn begin_array(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.begin_container(name, false)
    }

    /// Closes the innermost container, does nothing if none are open
    pub fn end_container(&mut self) -> Result<(), JsonError> {
        if self.level == 0 {
            return Ok(());
        }

        let is_object = self.is_object[self.level];
        self.level -= 1;
        if self.pretty_print && !self.first_entry {
            self.newline_indent()?;
        }
        self.first_entry = false;
        self.add_raw_json(if is_object { b"}" } else { b"]" })
    }

    pub fn add_boolean(&mut self, name: Option<&str>, value: bool) -> Result<(), JsonError> {
        self.begin_element(name)?;
        let literal: &[u8] = if value { b"true" } else { b"false" };
        self.add_raw_json(literal)
    }

    pub fn add_null(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.begin_element(name)?;
        self.add_raw_json(b"null")
    }

    pub fn add_integer(&mut self, name: Option<&str>, value: i64) -> Result<(), JsonError> {
        let mut nb = NumBuf::new();
        write!(nb, "{value}").map_err(|_e| JsonError::InvalidData)?;
        self.begin_element(name)?;
        self.add_raw_json(nb.as_bytes())
    }

    /// Values are written as their full unsigned magnitude, so register
    /// values survive a round trip exactly
    pub fn add_unsigned(&mut self, name: Option<&str>, value: u64) -> Result<(), JsonError> {
        let mut nb = NumBuf::new();
        write!(nb, "{value}").map_err(|_e| JsonError::InvalidData)?;
        self.begin_element(name)?;
        self.add_raw_json(nb.as_bytes())
    }

    /// Non-finite values have no JSON representation and are written as `null`
    pub fn add_float(&mut self, name: Option<&str>, value: f64) -> Result<(), JsonError> {
        if !value.is_finite() {
            return self.add_null(name);
        }

        let mut nb = NumBuf::new();
        let magnitude = value.abs();
        let res = if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
            write!(nb, "{value:e}")
        } else {
            write!(nb, "{value}")
        };
        res.map_err(|_e| JsonError::InvalidData)?;

        self.begin_element(name)?;
        self.add_raw_json(nb.as_bytes())
    }

    /// Adds a string element, or `null` if there is no value
    pub fn add_string(&mut self, name: Option<&str>, value: Option<&str>) -> Result<(), JsonError> {
        let Some(value) = value else {
            return self.add_null(name);
        };

        self.begin_string_element(name)?;
        self.escape(value)?;
        self.end_string_element()
    }

    pub fn begin_string_element(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.begin_element(name)?;
        self.add_raw_json(b"\"")
    }

    /// Appends to the string element previously begun with
    /// [`Self::begin_string_element`]
    #[inline]
    pub fn append_string_element(&mut self, value: &str) -> Result<(), JsonError> {
        self.escape(value)
    }

    #[inline]
    pub fn end_string_element(&mut self) -> Result<(), JsonError> {
        self.add_raw_json(b"\"")
    }

    /// Adds binary data, hex encoded
    pub fn add_data(&mut self, name: Option<&str>, data: &[u8]) -> Result<(), JsonError> {
        self.begin_data_element(name)?;
        self.append_data_element(data)?;
        self.end_data_element()
    }

    pub fn begin_data_element(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.begin_element(name)?;
        self.add_raw_json(b"\"")
    }

    pub fn append_data_element(&mut self, data: &[u8]) -> Result<(), JsonError> {
        let mut buf = [0u8; 256];
        for chunk in data.chunks(buf.len() / 2) {
            for (i, b) in chunk.iter().enumerate() {
                buf[i * 2] = HEX[usize::from(b >> 4)];
                buf[i * 2 + 1] = HEX[usize::from(b & 0xf)];
            }
            self.add_raw_json(&buf[..chunk.len() * 2])?;
        }
        Ok(())
    }

    #[inline]
    pub fn end_data_element(&mut self) -> Result<(), JsonError> {
        self.add_raw_json(b"\"")
    }

    /// Adds a UUID in its canonical upper case hyphenated form, or `null`
    pub fn add_uuid(&mut self, name: Option<&str>, uuid: Option<&[u8; 16]>) -> Result<(), JsonError> {
        let Some(uuid) = uuid else {
            return self.add_null(name);
        };

        let mut buf = [0u8; 38];
        buf[0] = b'"';
        let mut len = 1;
        for (i, b) in uuid.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                buf[len] = b'-';
                len += 1;
            }
            buf[len] = HEX[usize::from(b >> 4)];
            buf[len + 1] = HEX[usize::from(b & 0xf)];
            len += 2;
        }
        buf[len] = b'"';

        self.begin_element(name)?;
        self.add_raw_json(&buf[..=len])
    }

    fn escape(&mut self, value: &str) -> Result<(), JsonError> {
        let mut buf = [0u8; 256];
        let mut len = 0;

        for &b in value.as_bytes() {
            if len + 6 > buf.len() {
                self.add_raw_json(&buf[..len])?;
                len = 0;
            }

            let short = match b {
                b'"' => Some(b'"'),
                b'\\' => Some(b'\\'),
                0x08 => Some(b'b'),
                0x0c => Some(b'f'),
                b'\n' => Some(b'n'),
                b'\r' => Some(b'r'),
                b'\t' => Some(b't'),
                _ => None,
            };

            if let Some(short) = short {
                buf[len] = b'\\';
                buf[len + 1] = short;
                len += 2;
            } else if b < 0x20 {
                buf[len..len + 4].copy_from_slice(b"\\u00");
                buf[len + 4] = HEX[usize::from(b >> 4)];
                buf[len + 5] = HEX[usize::from(b & 0xf)];
                len += 6;
            } else {
                buf[len] = b;
                len += 1;
            }
        }

        if len > 0 {
            self.add_raw_json(&buf[..len])?;
        }
        Ok(())
    }

    /// Splices an already encoded JSON fragment into the output verbatim.
    ///
    /// The fragment is validated in full before anything is written. If it is
    /// not valid JSON an object with an `error` message and the original text
    /// as `json_data` is written in its place, so the surrounding output stays
    /// parseable and no error is returned.
    ///
    /// If `close_last_container` is false the outermost container of the
    /// fragment is left open so further elements can be added to it, a
    /// scalar fragment cannot be left open and is substituted as invalid. The
    /// substitute object is left open in the same way.
    ///
    /// Errors are only returned for failures of the encoder itself, eg. the
    /// sink refusing data or the maximum depth being reached.
    pub fn add_preformatted_json(
        &mut self,
        name: Option<&str>,
        json: &[u8],
        close_last_container: bool,
    ) -> Result<(), JsonError> {
        let trimmed = json.trim_ascii();

        let checked = decoder::validate(trimmed)
            .map_err(|de| de.kind)
            .and_then(|()| {
                if close_last_container || matches!(trimmed.first(), Some(b'{' | b'[')) {
                    Ok(())
                } else {
                    Err(JsonError::InvalidData)
                }
            });

        match checked {
            Ok(()) => {
                if close_last_container {
                    self.begin_element(name)?;
                    return self.add_raw_json(trimmed);
                }

                if self.level >= MAX_CONTAINER_DEPTH {
                    return Err(JsonError::NestingTooDeep);
                }

                let is_object = trimmed[0] == b'{';
                let body = &trimmed[..trimmed.len() - 1];
                self.begin_element(name)?;
                self.add_raw_json(body)?;
                self.level += 1;
                self.is_object[self.level] = is_object;
                self.first_entry = body[1..].trim_ascii().is_empty();
                Ok(())
            }
            Err(err) => {
                log::warn!("substituting invalid JSON fragment: {err}");
                self.add_invalid_fragment(name, json, err, close_last_container)
            }
        }
    }

    fn add_invalid_fragment(
        &mut self,
        name: Option<&str>,
        json: &[u8],
        err: JsonError,
        close_last_container: bool,
    ) -> Result<(), JsonError> {
        self.begin_object(name)?;

        self.begin_string_element(Some("error"))?;
        self.append_string_element("Invalid JSON data: ")?;
        self.append_string_element(err.as_str())?;
        self.end_string_element()?;

        self.begin_string_element(Some("json_data"))?;
        for chunk in json.utf8_chunks() {
            self.append_string_element(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                self.append_string_element("\u{fffd}")?;
            }
        }
        self.end_string_element()?;

        if close_last_container {
            self.end_container()?;
        }
        Ok(())
    }

    /// Decodes an existing document and re-encodes it element by element as
    /// an element named `name`, tolerating a document that was truncated.
    ///
    /// When `close_last_container` is false exactly one container named
    /// `name` is left open on return whether or not decoding succeeded: on
    /// failure every inner container opened by the document is closed, and if
    /// the document did not open a container an empty object is begun
    /// instead. When it is true every container opened is closed.
    ///
    /// The decoding error, if any, is returned after the output has been
    /// balanced so the caller can annotate it.
    pub fn add_json_document(
        &mut self,
        name: Option<&str>,
        data: &[u8],
        close_last_container: bool,
    ) -> Result<(), JsonError> {
        let mut buffer = [0u8; REENCODE_BUFFER_SIZE];
        let mut reencoder = Reencoder {
            encoder: self,
            name,
            depth: 0,
            opened_root: false,
            close_last_container,
        };

        let res = decoder::decode(data, &mut buffer, &mut reencoder);
        let Err(err) = res else {
            return Ok(());
        };

        let keep = usize::from(!close_last_container);
        let opened_root = reencoder.opened_root;
        let mut depth = reencoder.depth;
        while depth > keep {
            self.end_container()?;
            depth -= 1;
        }

        if !close_last_container && !opened_root {
            self.begin_object(name)?;
        }

        Err(err.kind)
    }
}

/// Forwards every decoded element to an encoder, renaming the top level
/// element
struct Reencoder<'e, 'n, S> {
    encoder: &'e mut Encoder<S>,
    name: Option<&'n str>,
    depth: usize,
    opened_root: bool,
    close_last_container: bool,
}

impl<S: ReportSink> Reencoder<'_, '_, S> {
    /// Adds a scalar, renaming it if it is the top level element. A scalar
    /// top level element cannot be left open.
    fn scalar(
        &mut self,
        name: Option<&str>,
        add: impl FnOnce(&mut Encoder<S>, Option<&str>) -> Result<(), JsonError>,
    ) -> Result<(), JsonError> {
        if self.depth > 0 {
            return add(&mut *self.encoder, name);
        }
        if !self.close_last_container {
            return Err(JsonError::InvalidData);
        }
        add(&mut *self.encoder, self.name)
    }

    fn container(&mut self, name: Option<&str>, is_object: bool) -> Result<(), JsonError> {
        let name = if self.depth == 0 {
            self.opened_root = true;
            self.name
        } else {
            name
        };

        if is_object {
            self.encoder.begin_object(name)?;
        } else {
            self.encoder.begin_array(name)?;
        }
        self.depth += 1;
        Ok(())
    }
}

impl<S: ReportSink> DecodeCallbacks for Reencoder<'_, '_, S> {
    fn on_boolean(&mut self, name: Option<&str>, value: bool) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_boolean(name, value))
    }

    fn on_integer(&mut self, name: Option<&str>, value: i64) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_integer(name, value))
    }

    fn on_unsigned_integer(&mut self, name: Option<&str>, value: u64) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_unsigned(name, value))
    }

    fn on_floating_point(&mut self, name: Option<&str>, value: f64) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_float(name, value))
    }

    fn on_null(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_null(name))
    }

    fn on_string(&mut self, name: Option<&str>, value: &str) -> Result<(), JsonError> {
        self.scalar(name, |enc, name| enc.add_string(name, Some(value)))
    }

    fn on_begin_object(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.container(name, true)
    }

    fn on_begin_array(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        self.container(name, false)
    }

    fn on_end_container(&mut self) -> Result<(), JsonError> {
        self.depth -= 1;
        if self.depth == 0 && !self.close_last_container {
            return Ok(());
        }
        self.encoder.end_container()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoder() -> Encoder<Vec<u8>> {
        Encoder::new(Vec::new(), false)
    }

    fn text(enc: Encoder<Vec<u8>>) -> String {
        String::from_utf8(enc.into_inner()).unwrap()
    }

    #[test]
    fn commas_and_names() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_integer(Some("a"), -1).unwrap();
        enc.begin_array(Some("b")).unwrap();
        enc.add_boolean(Some("ignored"), true).unwrap();
        enc.add_null(None).unwrap();
        enc.end_container().unwrap();
        enc.add_string(Some("c"), None).unwrap();
        enc.begin_object(Some("d")).unwrap();
        enc.end_encode().unwrap();

        assert_eq!(text(enc), r#"{"a":-1,"b":[true,null],"c":null,"d":{}}"#);
    }

    #[test]
    fn objects_require_names() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        assert_eq!(enc.add_boolean(None, true), Err(JsonError::InvalidData));
        enc.end_encode().unwrap();
        assert_eq!(text(enc), "{}");
    }

    #[test]
    fn end_container_at_top_level_is_a_no_op() {
        let mut enc = encoder();
        enc.end_container().unwrap();
        enc.begin_array(None).unwrap();
        enc.end_container().unwrap();
        enc.end_container().unwrap();
        assert_eq!(text(enc), "[]");
    }

    #[test]
    fn pretty_printing() {
        let mut enc = Encoder::new(Vec::new(), true);
        enc.begin_object(None).unwrap();
        enc.add_unsigned(Some("a"), 1).unwrap();
        enc.begin_array(Some("b")).unwrap();
        enc.end_container().unwrap();
        enc.end_encode().unwrap();

        assert_eq!(text(enc), "{\n    \"a\": 1,\n    \"b\": []\n}");
    }

    #[test]
    fn numbers() {
        let mut enc = encoder();
        enc.begin_array(None).unwrap();
        enc.add_unsigned(None, u64::MAX).unwrap();
        enc.add_integer(None, i64::MIN).unwrap();
        enc.add_float(None, 0.5).unwrap();
        enc.add_float(None, 1e300).unwrap();
        enc.add_float(None, f64::NAN).unwrap();
        enc.end_encode().unwrap();

        let out = text(enc);
        assert_eq!(
            out,
            "[18446744073709551615,-9223372036854775808,0.5,1e300,null]"
        );

        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0].as_u64(), Some(u64::MAX));
    }

    #[test]
    fn strings_are_escaped() {
        let long = "\"".repeat(1000);
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_string(Some("k\n"), Some("a\"b\\c\u{1}\té")).unwrap();
        enc.add_string(Some("long"), Some(&long)).unwrap();
        enc.end_encode().unwrap();

        let out = text(enc);
        assert!(out.starts_with(r#"{"k\n":"a\"b\\c\u0001\té","long":""#));

        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["long"].as_str().unwrap(), long);
    }

    #[test]
    fn streamed_elements() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.begin_string_element(Some("s")).unwrap();
        enc.append_string_element("ab").unwrap();
        enc.append_string_element("\"c").unwrap();
        enc.end_string_element().unwrap();
        enc.begin_data_element(Some("d")).unwrap();
        enc.append_data_element(&[0xde, 0xad]).unwrap();
        enc.append_data_element(&[0x0f]).unwrap();
        enc.end_data_element().unwrap();
        enc.add_uuid(
            Some("u"),
            Some(&[
                0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89,
                0xab, 0xcd, 0xef,
            ]),
        )
        .unwrap();
        enc.end_encode().unwrap();

        assert_eq!(
            text(enc),
            r#"{"s":"ab\"c","d":"DEAD0F","u":"12345678-9ABC-DEF0-0123-456789ABCDEF"}"#
        );
    }

    #[test]
    fn nesting_limit() {
        let mut enc = encoder();
        for _ in 0..MAX_CONTAINER_DEPTH {
            enc.begin_array(None).unwrap();
        }
        assert_eq!(enc.begin_array(None), Err(JsonError::NestingTooDeep));
        assert_eq!(enc.depth(), MAX_CONTAINER_DEPTH);
        enc.end_encode().unwrap();

        let out = text(enc);
        assert_eq!(out.len(), MAX_CONTAINER_DEPTH * 2);
    }

    #[test]
    fn preformatted_valid_fragment() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_preformatted_json(Some("user"), b" {\"a\": [1, 2]} ", true)
            .unwrap();
        enc.add_integer(Some("after"), 1).unwrap();
        enc.end_encode().unwrap();

        assert_eq!(text(enc), r#"{"user":{"a": [1, 2]},"after":1}"#);
    }

    #[test]
    fn preformatted_fragment_left_open() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_preformatted_json(Some("user"), br#"{"a": 1}"#, false)
            .unwrap();
        enc.add_integer(Some("b"), 2).unwrap();
        enc.end_container().unwrap();
        enc.add_preformatted_json(Some("empty"), b"{ }", false).unwrap();
        enc.add_integer(Some("c"), 3).unwrap();
        enc.end_encode().unwrap();

        let out = text(enc);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["user"]["a"], 1);
        assert_eq!(parsed["user"]["b"], 2);
        assert_eq!(parsed["empty"]["c"], 3);
    }

    #[test]
    fn preformatted_invalid_fragment_is_substituted() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_integer(Some("before"), 0).unwrap();
        enc.add_preformatted_json(Some("user"), b"{\"a\": ", true)
            .unwrap();
        enc.add_integer(Some("after"), 1).unwrap();
        enc.end_encode().unwrap();

        let out = text(enc);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["before"], 0);
        assert_eq!(parsed["after"], 1);
        assert_eq!(
            parsed["user"]["error"],
            "Invalid JSON data: incomplete data"
        );
        assert_eq!(parsed["user"]["json_data"], "{\"a\": ");
    }

    #[test]
    fn preformatted_scalar_cannot_stay_open() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_preformatted_json(Some("user"), b"42", false).unwrap();
        enc.add_boolean(Some("extra"), true).unwrap();
        enc.end_encode().unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&text(enc)).unwrap();
        assert_eq!(parsed["user"]["error"], "Invalid JSON data: invalid data");
        assert_eq!(parsed["user"]["json_data"], "42");
        assert_eq!(parsed["user"]["extra"], true);
    }

    #[test]
    fn reencodes_documents() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        enc.add_json_document(
            Some("old"),
            br#"{"report": {"id": "x", "n": 18446744073709551615}, "l": [1.5, null]}"#,
            true,
        )
        .unwrap();
        enc.end_encode().unwrap();

        assert_eq!(
            text(enc),
            r#"{"old":{"report":{"id":"x","n":18446744073709551615},"l":[1.5,null]}}"#
        );
    }

    #[test]
    fn truncated_documents_stay_balanced() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        let err = enc
            .add_json_document(Some("old"), br#"{"report": {"id": "x", "threads": [{"a"#, false)
            .unwrap_err();
        assert_eq!(err, JsonError::Incomplete);
        assert_eq!(enc.depth(), 2);
        enc.add_boolean(Some("incomplete"), true).unwrap();
        enc.end_encode().unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&text(enc)).unwrap();
        assert_eq!(parsed["old"]["report"]["id"], "x");
        assert_eq!(parsed["old"]["incomplete"], true);
    }

    #[test]
    fn empty_documents_open_a_placeholder() {
        let mut enc = encoder();
        enc.begin_object(None).unwrap();
        assert_eq!(
            enc.add_json_document(Some("old"), b"", false),
            Err(JsonError::Incomplete)
        );
        enc.add_boolean(Some("incomplete"), true).unwrap();
        enc.end_encode().unwrap();

        assert_eq!(text(enc), r#"{"old":{"incomplete":true}}"#);
    }
}
