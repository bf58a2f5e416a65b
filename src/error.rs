use std::io;
use thiserror::Error;

/// The error delivered through a request's completion callback (and, for
///  rejected submissions, returned synchronously).
///
/// Negative-errno style transport failures from the I/O substrate are passed
///  through as [`ScpError::Transport`]; the remaining variants are defined by
///  the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScpError {
    /// A bulk read/write received a response with a non-OK return code. The
    ///  offending code is attached; it is the `cmd_rc` of the first bad reply
    ///  to arrive.
    #[error("bad response to CMD_READ/CMD_WRITE")]
    BadReturnCode { cmd_rc: u16 },

    /// No matching response arrived within the configured number of attempts.
    #[error("SCP command timed out")]
    Timeout,

    /// The connection was closed while the request was pending, or the
    ///  request was submitted after the close began.
    #[error("SCP connection was closed")]
    Closed,

    /// The I/O substrate reported a send failure.
    #[error("transport error: {0:?}")]
    Transport(io::ErrorKind),
}

impl ScpError {
    /// Short symbolic name, in the spirit of `errno` names.
    pub fn name(&self) -> &'static str {
        match self {
            ScpError::BadReturnCode { .. } => "EBAD_RC",
            ScpError::Timeout => "ETIMEOUT",
            ScpError::Closed => "ECLOSED",
            ScpError::Transport(_) => "EIO",
        }
    }
}

impl From<&io::Error> for ScpError {
    fn from(e: &io::Error) -> ScpError {
        ScpError::Transport(e.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bad_rc(ScpError::BadReturnCode { cmd_rc: 0x88 }, "EBAD_RC")]
    #[case::timeout(ScpError::Timeout, "ETIMEOUT")]
    #[case::closed(ScpError::Closed, "ECLOSED")]
    #[case::transport(ScpError::Transport(io::ErrorKind::ConnectionRefused), "EIO")]
    fn test_name(#[case] error: ScpError, #[case] expected: &str) {
        assert_eq!(error.name(), expected);
    }

    #[test]
    fn test_from_io_error() {
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            ScpError::from(&e),
            ScpError::Transport(io::ErrorKind::PermissionDenied)
        );
    }
}
