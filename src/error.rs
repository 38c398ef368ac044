use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Metadata decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Compression error: {0}")]
    Compress(String),

    #[error("Schema not match: {0}")]
    SchemaNotMatch(String),

    #[error("Logic error: {0}")]
    Logic(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::InvalidFormat(_) => -2,
            Error::Decode(_) => -3,
            Error::OutOfRange(_) => -4,
            Error::Compress(_) => -5,
            Error::SchemaNotMatch(_) => -6,
            Error::Logic(_) => -7,
            Error::Config(_) => -13,
        }
    }

    /// True for errors raised while parsing bytes that did not come from a
    /// well-formed micro-partition file.
    pub fn is_format_error(&self) -> bool {
        matches!(self, Error::InvalidFormat(_) | Error::Decode(_))
    }

    pub(crate) fn out_of_range(index: usize, len: usize) -> Self {
        Error::OutOfRange(format!("index {} beyond length {}", index, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = vec![
            Error::Io(std::io::Error::other("disk")),
            Error::InvalidFormat("magic".into()),
            Error::OutOfRange("row".into()),
            Error::Compress("zstd".into()),
            Error::SchemaNotMatch("columns".into()),
            Error::Logic("read only".into()),
            Error::Config("group_limit".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_format_error_grouping() {
        assert!(Error::InvalidFormat("bad".into()).is_format_error());
        assert!(!Error::Logic("bad".into()).is_format_error());
        let e = Error::out_of_range(10, 4);
        assert_eq!(e.to_string(), "Out of range: index 10 beyond length 4");
    }
}
