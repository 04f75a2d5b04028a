//! Deadline helpers.
//!
//! A deadline is an absolute instant. Callers compute a fresh one with
//! [`deadline_after`] immediately before every blocking read, write, accept
//! or dial, then bound that single operation with [`with_deadline`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::error::constants::{ERR_DEADLINE_OVERFLOW, ERR_ZERO_DEADLINE};
use crate::error::{ProtocolError, Result};

/// The instant `timeout` from now.
///
/// Fails with `ProtocolError::Deadline` for a zero duration (the operation
/// could never succeed) or when the instant overflows the clock.
pub fn deadline_after(timeout: Duration) -> Result<Instant> {
    if timeout.is_zero() {
        return Err(ProtocolError::Deadline(ERR_ZERO_DEADLINE.to_string()));
    }
    Instant::now()
        .checked_add(timeout)
        .ok_or_else(|| ProtocolError::Deadline(ERR_DEADLINE_OVERFLOW.to_string()))
}

/// Run `fut` to completion, failing with `ProtocolError::Timeout` once
/// `deadline` passes. `None` runs the operation unbounded.
pub async fn with_deadline<F, T, E>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    ProtocolError: From<E>,
{
    match deadline {
        Some(deadline) => match timeout_at(deadline, fut).await {
            Ok(result) => result.map_err(ProtocolError::from),
            Err(_) => Err(ProtocolError::Timeout),
        },
        None => fut.await.map_err(ProtocolError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_zero_duration_is_rejected() {
        assert!(matches!(
            deadline_after(Duration::ZERO),
            Err(ProtocolError::Deadline(_))
        ));
    }

    #[test]
    fn test_overflowing_duration_is_rejected() {
        assert!(matches!(
            deadline_after(Duration::MAX),
            Err(ProtocolError::Deadline(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_times_out() {
        let deadline = deadline_after(Duration::from_millis(50)).unwrap();
        let result: Result<()> = with_deadline(
            Some(deadline),
            std::future::pending::<io::Result<()>>(),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_completed_operation_passes_through() {
        let deadline = deadline_after(Duration::from_secs(1)).unwrap();
        let value = with_deadline(Some(deadline), async { Ok::<_, io::Error>(7u8) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = with_deadline(None, async {
            Err::<(), _>(io::Error::from(io::ErrorKind::BrokenPipe))
        })
        .await
        .unwrap_err();
        assert!(err.is_disconnect());
    }
}
