//! Error types and the expected-error classifier / 错误类型与可忽略错误判定

/// Store status: object not modified since the supplied condition / 未修改
pub const STATUS_NOT_MODIFIED: u16 = 304;
/// Store status: a conditional header did not hold / 前置条件失败
pub const STATUS_PRECONDITION_FAILED: u16 = 412;
/// Store status: no such key / 对象不存在
pub const STATUS_NOT_FOUND: u16 = 404;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store answered with a non-success status code / 存储返回非成功状态码
    #[error("storage returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// Path escapes the bucket root / 访问路径超出根目录范围
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Write-through stream was used after a failed write / 写入流已因错误终止
    #[error("write-through stream halted by an earlier failure")]
    Halted,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl Error {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Error::Status {
            code,
            message: message.into(),
        }
    }

    /// Numeric store status carried by this error, if any / 错误携带的状态码
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Status { code, .. } => Some(*code),
            Error::NotFound(_) => Some(STATUS_NOT_FOUND),
            _ => None,
        }
    }
}

/// Whether a read failure is a benign outcome of a conditional read.
///
/// `304 Not Modified` and `412 Precondition Failed` mean the object was
/// deliberately not returned; the read pipeline skips such objects instead of
/// aborting. Every other code, and every error without a code, is fatal.
pub fn is_expected_error(error: &Error) -> bool {
    matches!(
        error.status_code(),
        Some(STATUS_NOT_MODIFIED) | Some(STATUS_PRECONDITION_FAILED)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_statuses_are_expected() {
        assert!(is_expected_error(&Error::status(304, "not modified")));
        assert!(is_expected_error(&Error::status(412, "precondition failed")));
    }

    #[test]
    fn test_other_statuses_are_fatal() {
        for code in [200, 400, 403, 404, 500, 503] {
            assert!(!is_expected_error(&Error::status(code, "boom")), "code {}", code);
        }
        assert!(!is_expected_error(&Error::NotFound("a/1.txt".into())));
    }

    #[test]
    fn test_uncoded_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert!(!is_expected_error(&Error::Io(io)));
        assert!(!is_expected_error(&Error::Backend(anyhow::anyhow!("socket closed"))));
        assert!(!is_expected_error(&Error::Halted));
        assert_eq!(Error::Config("x".into()).status_code(), None);
    }
}
