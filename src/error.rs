//! Error types for the demodulation pipeline
//!
//! Every fallible operation in the crate returns `Result<T, DspError>`.
//! `EndOfStream` is the universal termination signal: it propagates up from
//! sample ingestion through `find_header` and the bit readers and is not a
//! fatal condition, only "the source is exhausted".

use snafu::Snafu;

/// Result alias used throughout the crate
pub type DspResult<T> = Result<T, DspError>;

/// Closed error taxonomy of the demodulation core
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DspError {
    /// The underlying sample source is exhausted
    #[snafu(display("end of input stream"))]
    EndOfStream,

    /// Correlation peak sits exactly on a search-window edge; the peak is
    /// ambiguous or truncated and the detection cycle yields no candidate
    #[snafu(display("correlation peak at search window boundary"))]
    BoundaryRejection,

    /// No header confirmed within the no-signal timeout, or the session's
    /// consumer slot was deactivated
    #[snafu(display("signal lost: no header confirmed"))]
    SignalLost,

    /// Session parameters are inconsistent (checked at initialization)
    #[snafu(display("invalid session configuration: {msg}"))]
    InvalidConfig { msg: String },

    /// The PCM container or sample format cannot be handled
    #[snafu(display("unsupported PCM format: {msg}"))]
    UnsupportedFormat { msg: String },

    /// An I/O error other than end-of-stream
    #[snafu(display("i/o error: {source}"))]
    Io { source: std::io::Error },
}

impl DspError {
    /// Map an I/O error to the crate taxonomy.
    ///
    /// `UnexpectedEof` becomes `EndOfStream` so that a truncated read at any
    /// layer surfaces as the normal termination signal.
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DspError::EndOfStream
        } else {
            DspError::Io { source: e }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_eof_maps_to_end_of_stream() {
        let e = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(DspError::from_io(e), DspError::EndOfStream));
    }

    #[test]
    fn test_other_io_errors_stay_io() {
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(DspError::from_io(e), DspError::Io { .. }));
    }
}
