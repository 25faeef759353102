//! Client verification.

use std::future::Future;

use crate::request::UpgradeRequest;
use crate::route::BoxFuture;

/// Async predicate deciding whether an upgrade request may proceed.
///
/// Runs after origin checks and before capacity is reserved. Returning
/// `false`, or panicking, rejects the request with 401.
pub trait ClientVerifier: Send + Sync + 'static {
    /// Decide whether `request` is allowed.
    fn verify(&self, request: UpgradeRequest) -> BoxFuture<'static, bool>;
}

impl<F, Fut> ClientVerifier for F
where
    F: Fn(UpgradeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn verify(&self, request: UpgradeRequest) -> BoxFuture<'static, bool> {
        Box::pin(self(request))
    }
}

/// Verifier that accepts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ClientVerifier for AllowAll {
    fn verify(&self, _request: UpgradeRequest) -> BoxFuture<'static, bool> {
        Box::pin(async { true })
    }
}
