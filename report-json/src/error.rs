/// The ways encoding or decoding can fail.
///
/// Each variant maps to a stable numeric [`JsonError::code`] so that it can
/// be written into a report without formatting.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonError {
    /// An unexpected byte was encountered
    #[error("invalid character")]
    InvalidCharacter,
    /// A string did not fit in the buffer supplied to the decoder
    #[error("data too long")]
    DataTooLong,
    /// The sink refused the encoded bytes
    #[error("cannot add data")]
    CannotAddData,
    /// The input ended before the document was complete
    #[error("incomplete data")]
    Incomplete,
    /// The input was well formed but not usable in the requested way
    #[error("invalid data")]
    InvalidData,
    /// Opening another container would exceed [`crate::MAX_CONTAINER_DEPTH`]
    #[error("container nesting too deep")]
    NestingTooDeep,
    /// A decode callback asked for decoding to stop
    #[error("aborted by callback")]
    Aborted,
}

impl JsonError {
    /// Numeric error code, stable across releases
    #[inline]
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidCharacter => 1,
            Self::DataTooLong => 2,
            Self::CannotAddData => 3,
            Self::Incomplete => 4,
            Self::InvalidData => 5,
            Self::NestingTooDeep => 6,
            Self::Aborted => 7,
        }
    }

    /// Static description, usable where formatting is not allowed
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCharacter => "invalid character",
            Self::DataTooLong => "data too long",
            Self::CannotAddData => "cannot add data",
            Self::Incomplete => "incomplete data",
            Self::InvalidData => "invalid data",
            Self::NestingTooDeep => "container nesting too deep",
            Self::Aborted => "aborted by callback",
        }
    }
}

/// A decoding failure along with the byte offset where it was detected
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} at offset {offset}")]
pub struct DecodeError {
    pub kind: JsonError,
    pub offset: usize,
}

#[cfg(test)]
mod test {
    use super::JsonError;

    #[test]
    fn codes_are_distinct() {
        let all = [
            JsonError::InvalidCharacter,
            JsonError::DataTooLong,
            JsonError::CannotAddData,
            JsonError::Incomplete,
            JsonError::InvalidData,
            JsonError::NestingTooDeep,
            JsonError::Aborted,
        ];

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
            assert_eq!(a.as_str(), a.to_string());
        }
    }
}
