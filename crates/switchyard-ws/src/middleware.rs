//! Upgrade middleware.
//!
//! Middleware runs on a freshly established connection, in registration
//! order, before the route handler. Each stage receives a [`Next`] and must
//! call [`Next::run`] exactly once to continue the chain. A stage that
//! returns an error, or returns without running its continuation, causes the
//! connection to be closed with 1011 and the handler is never invoked.
//!
//! # Example
//!
//! ```ignore
//! struct RequireToken;
//!
//! impl UpgradeMiddleware for RequireToken {
//!     fn name(&self) -> &'static str {
//!         "require-token"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         conn: &'a Connection,
//!         request: &'a UpgradeRequest,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, WsResult<()>> {
//!         Box::pin(async move {
//!             if request.query().is_none() {
//!                 return Err(WsError::internal("missing token"));
//!             }
//!             next.run().await
//!         })
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{WsError, WsResult};
use crate::request::UpgradeRequest;
use crate::route::BoxFuture;

/// A stage that runs between connection establishment and the handler.
pub trait UpgradeMiddleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        "anonymous"
    }

    /// Process the connection, calling `next.run()` to continue.
    fn process<'a>(
        &'a self,
        conn: &'a Connection,
        request: &'a UpgradeRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, WsResult<()>>;
}

/// Continuation to the rest of the middleware chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn UpgradeMiddleware>],
    conn: &'a Connection,
    request: &'a UpgradeRequest,
    completed: &'a AtomicBool,
}

impl<'a> Next<'a> {
    /// Run the remaining stages.
    pub fn run(self) -> BoxFuture<'a, WsResult<()>> {
        match self.remaining.split_first() {
            None => {
                self.completed.store(true, Ordering::Release);
                Box::pin(async { Ok(()) })
            }
            Some((stage, rest)) => {
                let next = Next {
                    remaining: rest,
                    conn: self.conn,
                    request: self.request,
                    completed: self.completed,
                };
                stage.process(self.conn, self.request, next)
            }
        }
    }
}

/// Run `chain` to completion for `conn`.
///
/// Fails if any stage errors or if the chain was not run to its end.
pub async fn run_chain(
    chain: &[Arc<dyn UpgradeMiddleware>],
    conn: &Connection,
    request: &UpgradeRequest,
) -> WsResult<()> {
    let completed = AtomicBool::new(false);
    let next = Next {
        remaining: chain,
        conn,
        request,
        completed: &completed,
    };
    next.run().await?;

    if completed.load(Ordering::Acquire) {
        Ok(())
    } else {
        let names: Vec<&str> = chain.iter().map(|m| m.name()).collect();
        debug!(connection_id = %conn.id(), chain = ?names, "Middleware chain did not complete");
        Err(WsError::internal("middleware did not call next"))
    }
}
