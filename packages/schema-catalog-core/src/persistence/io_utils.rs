//! I/O helpers for catalog files.

use std::io::ErrorKind;

use tracing::warn;

use crate::error::SchemaError;

/// Classifies an I/O error into a `SchemaError` variant.
pub fn classify_io_error(error: std::io::Error, context: &str) -> SchemaError {
    match error.kind() {
        ErrorKind::StorageFull | ErrorKind::OutOfMemory => SchemaError::DiskFull(format!("{context}: {error}")),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            SchemaError::TransientIoError(format!("{context}: {error}"))
        }
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
            SchemaError::DataCorruption(format!("{context}: {error}"))
        }
        _ => SchemaError::IoError(format!("{context}: {error}")),
    }
}

/// Runs `operation`, retrying it up to `max_retries` times while it fails
/// with a transient I/O error.
pub fn retry_io_operation<F, R>(
    operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<R, SchemaError>
where
    F: Fn() -> Result<R, SchemaError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(context, attempt, max_retries, error = %err, "transient I/O error, retrying");
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_classify_io_error() {
        let err = classify_io_error(std::io::Error::new(ErrorKind::TimedOut, "slow"), "read");
        assert!(matches!(err, SchemaError::TransientIoError(_)));
        let err = classify_io_error(std::io::Error::new(ErrorKind::NotFound, "gone"), "read");
        assert!(matches!(err, SchemaError::IoError(ref m) if m.starts_with("read:")));
    }

    #[test]
    fn test_retry_only_transient_errors() {
        let calls = Cell::new(0);
        let result: Result<u32, _> = retry_io_operation(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(SchemaError::TransientIoError("busy".to_string()))
                } else {
                    Ok(7)
                }
            },
            3,
            0,
            "test",
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let result: Result<u32, _> = retry_io_operation(
            || {
                calls.set(calls.get() + 1);
                Err(SchemaError::IoError("denied".to_string()))
            },
            3,
            0,
            "test",
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
