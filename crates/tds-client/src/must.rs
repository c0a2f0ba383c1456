//! Panicking convenience layer.
//!
//! [`Must::must`] turns any fallible call into one that panics with a
//! [`MustError`] payload. [`recover`] and [`recover_async`] catch that
//! payload at a boundary and hand the original [`Error`] back; any other
//! panic keeps unwinding.
//!
//! ```rust,ignore
//! let count = must::recover_async(async {
//!     let mut rows = db.query("select count(*) from t").await.must();
//!     let mut n = 0i32;
//!     rows.scan(&mut [&mut n]).await.must();
//!     n
//! })
//! .await?;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, UnwindSafe};

use futures_util::FutureExt;

use crate::error::{Error, Result};

/// Panic payload carrying the error a [`Must::must`] call hit.
#[derive(Debug)]
pub struct MustError(pub Error);

/// Unwrap a result by panicking with [`MustError`].
pub trait Must<T> {
    /// The value, or a panic carrying the error.
    fn must(self) -> T;
}

impl<T> Must<T> for Result<T> {
    fn must(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic::panic_any(MustError(err)),
        }
    }
}

fn into_error(payload: Box<dyn Any + Send>) -> Error {
    match payload.downcast::<MustError>() {
        Ok(must) => must.0,
        Err(other) => panic::resume_unwind(other),
    }
}

/// Run `f`, turning a [`MustError`] panic back into its error.
pub fn recover<T>(f: impl FnOnce() -> T + UnwindSafe) -> Result<T> {
    panic::catch_unwind(f).map_err(into_error)
}

/// Await `fut`, turning a [`MustError`] panic back into its error.
pub async fn recover_async<F: Future>(fut: F) -> Result<F::Output> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(into_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_returns_value() {
        assert_eq!(recover(|| Ok::<_, Error>(5).must()).unwrap(), 5);
    }

    #[test]
    fn test_recover_returns_original_error() {
        let err = recover(|| -> i32 { Err(Error::Timeout).must() }).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn test_foreign_panics_keep_unwinding() {
        let outer = panic::catch_unwind(|| recover(|| -> i32 { panic!("boom") }));
        assert!(outer.is_err());
    }

    #[tokio::test]
    async fn test_recover_async() {
        let err = recover_async(async {
            tokio::task::yield_now().await;
            Err::<(), _>(Error::Cancelled).must()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
