use crate::{DecodeError, JsonError, MAX_CONTAINER_DEPTH};

/// Receives elements as they are decoded.
///
/// Every method has a default implementation that accepts and ignores the
/// element, so implementors only need to handle the kinds they care about.
/// Returning an error from any callback stops decoding immediately and the
/// error is returned from [`decode`].
#[allow(unused_variables)]
pub trait DecodeCallbacks {
    fn on_boolean(&mut self, name: Option<&str>, value: bool) -> Result<(), JsonError> {
        Ok(())
    }

    /// Integers that fit in an `i64`
    fn on_integer(&mut self, name: Option<&str>, value: i64) -> Result<(), JsonError> {
        Ok(())
    }

    /// Non-negative integers above `i64::MAX`
    fn on_unsigned_integer(&mut self, name: Option<&str>, value: u64) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_floating_point(&mut self, name: Option<&str>, value: f64) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_null(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_string(&mut self, name: Option<&str>, value: &str) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_begin_object(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_begin_array(&mut self, name: Option<&str>) -> Result<(), JsonError> {
        Ok(())
    }

    fn on_end_container(&mut self) -> Result<(), JsonError> {
        Ok(())
    }

    /// Invoked once after the top-level value has been fully decoded
    fn on_end_data(&mut self) -> Result<(), JsonError> {
        Ok(())
    }
}

/// Decodes `data`, invoking `callbacks` for every element encountered.
///
/// `string_buffer` is scratch space for unescaped strings, the first quarter
/// holds the name of the current element and the rest holds string values.
/// Strings that don't fit fail with [`JsonError::DataTooLong`]. Nothing is
/// allocated.
pub fn decode<C: DecodeCallbacks + ?Sized>(
    data: &[u8],
    string_buffer: &mut [u8],
    callbacks: &mut C,
) -> Result<(), DecodeError> {
    let split = string_buffer.len() / 4;
    let (names, values) = string_buffer.split_at_mut(split);

    let mut parser = Parser {
        data,
        pos: 0,
        depth: 0,
        validate_only: false,
    };
    let res = parser.document(names, values, callbacks);
    res.map_err(|kind| DecodeError {
        kind,
        offset: parser.pos,
    })
}

/// Checks that `data` is a single syntactically valid JSON value without
/// needing a string buffer, so string length is not limited.
pub fn validate(data: &[u8]) -> Result<(), DecodeError> {
    struct Ignore;
    impl DecodeCallbacks for Ignore {}

    let mut parser = Parser {
        data,
        pos: 0,
        depth: 0,
        validate_only: true,
    };
    let res = parser.document(&mut [], &mut [], &mut Ignore);
    res.map_err(|kind| DecodeError {
        kind,
        offset: parser.pos,
    })
}

enum Opened {
    Nothing,
    Object,
    Array,
}

struct Parser<'d> {
    data: &'d [u8],
    pos: usize,
    depth: usize,
    validate_only: bool,
}

impl Parser<'_> {
    fn document<C: DecodeCallbacks + ?Sized>(
        &mut self,
        names: &mut [u8],
        values: &mut [u8],
        cb: &mut C,
    ) -> Result<(), JsonError> {
        self.skip_whitespace();
        match self.begin_value(None, values, cb)? {
            Opened::Nothing => {}
            Opened::Object => self.members(true, names, values, cb)?,
            Opened::Array => self.members(false, names, values, cb)?,
        }

        self.skip_whitespace();
        if self.pos < self.data.len() {
            return Err(JsonError::InvalidCharacter);
        }

        cb.on_end_data()
    }

    #[inline]
    fn peek(&self) -> Result<u8, JsonError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(JsonError::Incomplete)
    }

    #[inline]
    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.data.get(self.pos) {
            self.pos += 1;
        }
    }

    fn open(&mut self) -> Result<(), JsonError> {
        if self.depth >= MAX_CONTAINER_DEPTH {
            return Err(JsonError::NestingTooDeep);
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    /// Decodes a scalar completely, or consumes the opening bracket of a
    /// container and reports which kind was opened
    fn begin_value<C: DecodeCallbacks + ?Sized>(
        &mut self,
        name: Option<&str>,
        values: &mut [u8],
        cb: &mut C,
    ) -> Result<Opened, JsonError> {
        match self.peek()? {
            b'{' => {
                self.open()?;
                cb.on_begin_object(name)?;
                Ok(Opened::Object)
            }
            b'[' => {
                self.open()?;
                cb.on_begin_array(name)?;
                Ok(Opened::Array)
            }
            b'"' => {
                let s = self.string(values)?;
                cb.on_string(name, s)?;
                Ok(Opened::Nothing)
            }
            b't' => {
                self.literal(b"true")?;
                cb.on_boolean(name, true)?;
                Ok(Opened::Nothing)
            }
            b'f' => {
                self.literal(b"false")?;
                cb.on_boolean(name, false)?;
                Ok(Opened::Nothing)
            }
            b'n' => {
                self.literal(b"null")?;
                cb.on_null(name)?;
                Ok(Opened::Nothing)
            }
            b'-' | b'0'..=b'9' => {
                self.number(name, cb)?;
                Ok(Opened::Nothing)
            }
            _ => Err(JsonError::InvalidCharacter),
        }
    }

    /// Decodes the members of a container whose opening bracket has already
    /// been consumed, up to and including the closing bracket
    fn members<C: DecodeCallbacks + ?Sized>(
        &mut self,
        is_object: bool,
        names: &mut [u8],
        values: &mut [u8],
        cb: &mut C,
    ) -> Result<(), JsonError> {
        let close = if is_object { b'}' } else { b']' };

        self.skip_whitespace();
        if self.peek()? == close {
            self.pos += 1;
            self.depth -= 1;
            return cb.on_end_container();
        }

        loop {
            let opened = if is_object {
                if self.peek()? != b'"' {
                    return Err(JsonError::InvalidCharacter);
                }
                let name = self.string(names)?;
                self.skip_whitespace();
                if self.peek()? != b':' {
                    return Err(JsonError::InvalidCharacter);
                }
                self.pos += 1;
                self.skip_whitespace();
                self.begin_value(Some(name), values, cb)?
            } else {
                self.begin_value(None, values, cb)?
            };

            match opened {
                Opened::Nothing => {}
                Opened::Object => self.members(true, names, values, cb)?,
                Opened::Array => self.members(false, names, values, cb)?,
            }

            self.skip_whitespace();
            match self.peek()? {
                b',' => {
                    self.pos += 1;
                    self.skip_whitespace();
                }
                c if c == close => {
                    self.pos += 1;
                    self.depth -= 1;
                    return cb.on_end_container();
                }
                _ => return Err(JsonError::InvalidCharacter),
            }
        }
    }

    fn literal(&mut self, lit: &'static [u8]) -> Result<(), JsonError> {
        let rest = &self.data[self.pos..];
        if rest.starts_with(lit) {
            self.pos += lit.len();
            Ok(())
        } else if rest.len() < lit.len() && lit.starts_with(rest) {
            self.pos = self.data.len();
            Err(JsonError::Incomplete)
        } else {
            Err(JsonError::InvalidCharacter)
        }
    }

    fn digits(&mut self) -> Result<(), JsonError> {
        match self.peek()? {
            b'0'..=b'9' => {}
            _ => return Err(JsonError::InvalidCharacter),
        }
        while let Some(b'0'..=b'9') = self.data.get(self.pos) {
            self.pos += 1;
        }
        Ok(())
    }

    fn number<C: DecodeCallbacks + ?Sized>(
        &mut self,
        name: Option<&str>,
        cb: &mut C,
    ) -> Result<(), JsonError> {
        let start = self.pos;
        if self.data[self.pos] == b'-' {
            self.pos += 1;
        }
        self.digits()?;

        let mut is_float = false;
        if self.data.get(self.pos) == Some(&b'.') {
            is_float = true;
            self.pos += 1;
            self.digits()?;
        }
        if let Some(b'e' | b'E') = self.data.get(self.pos) {
            is_float = true;
            self.pos += 1;
            if let Some(b'+' | b'-') = self.data.get(self.pos) {
                self.pos += 1;
            }
            self.digits()?;
        }

        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_e| JsonError::InvalidCharacter)?;

        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                return cb.on_integer(name, v);
            }
            if let Ok(v) = text.parse::<u64>() {
                return cb.on_unsigned_integer(name, v);
            }
        }

        let v = text
            .parse::<f64>()
            .map_err(|_e| JsonError::InvalidCharacter)?;
        cb.on_floating_point(name, v)
    }

    fn hex4(&mut self) -> Result<u32, JsonError> {
        if self.data.len() - self.pos < 4 {
            self.pos = self.data.len();
            return Err(JsonError::Incomplete);
        }

        let mut v = 0;
        for _ in 0..4 {
            let d = match self.data[self.pos] {
                c @ b'0'..=b'9' => c - b'0',
                c @ b'a'..=b'f' => c - b'a' + 10,
                c @ b'A'..=b'F' => c - b'A' + 10,
                _ => return Err(JsonError::InvalidCharacter),
            };
            v = (v << 4) | u32::from(d);
            self.pos += 1;
        }
        Ok(v)
    }

    fn unicode_escape(&mut self) -> Result<char, JsonError> {
        let first = self.hex4()?;
        let scalar = match first {
            0xd800..=0xdbff => {
                if self.peek()? != b'\\' {
                    return Err(JsonError::InvalidCharacter);
                }
                self.pos += 1;
                if self.peek()? != b'u' {
                    return Err(JsonError::InvalidCharacter);
                }
                self.pos += 1;
                let second = self.hex4()?;
                if !(0xdc00..=0xdfff).contains(&second) {
                    return Err(JsonError::InvalidCharacter);
                }
                0x10000 + ((first - 0xd800) << 10) + (second - 0xdc00)
            }
            0xdc00..=0xdfff => return Err(JsonError::InvalidCharacter),
            other => other,
        };

        char::from_u32(scalar).ok_or(JsonError::InvalidCharacter)
    }

    /// Decodes a string starting at the opening quote into `buf`
    fn string<'b>(&mut self, buf: &'b mut [u8]) -> Result<&'b str, JsonError> {
        #[inline]
        fn put(buf: &mut [u8], len: &mut usize, bytes: &[u8]) -> Result<(), JsonError> {
            let end = *len + bytes.len();
            if end > buf.len() {
                return Err(JsonError::DataTooLong);
            }
            buf[*len..end].copy_from_slice(bytes);
            *len = end;
            Ok(())
        }

        self.pos += 1;
        let start = self.pos;
        let validate_only = self.validate_only;
        let mut len = 0;

        loop {
            let b = self.peek()?;
            self.pos += 1;

            match b {
                b'"' => break,
                b'\\' => {
                    let unescaped = match self.peek()? {
                        b'"' => b'"',
                        b'\\' => b'\\',
                        b'/' => b'/',
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'u' => {
                            self.pos += 1;
                            let c = self.unicode_escape()?;
                            if !validate_only {
                                let mut tmp = [0u8; 4];
                                put(buf, &mut len, c.encode_utf8(&mut tmp).as_bytes())?;
                            }
                            continue;
                        }
                        _ => return Err(JsonError::InvalidCharacter),
                    };
                    self.pos += 1;
                    if !validate_only {
                        put(buf, &mut len, &[unescaped])?;
                    }
                }
                0..=0x1f => return Err(JsonError::InvalidCharacter),
                _ => {
                    if !validate_only {
                        put(buf, &mut len, &[b])?;
                    }
                }
            }
        }

        if validate_only {
            // Escapes are pure ASCII, so the raw text is valid UTF-8 iff the
            // decoded text would be
            std::str::from_utf8(&self.data[start..self.pos - 1])
                .map_err(|_e| JsonError::InvalidCharacter)?;
            return Ok("");
        }

        std::str::from_utf8(&buf[..len]).map_err(|_e| JsonError::InvalidCharacter)
    }
}
