//! Result type aliases for Courier.

use crate::CourierError;

/// A specialized `Result` type for Courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

/// A boxed future returning a `CourierResult`.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = CourierResult<T>> + Send + 'a>>;
