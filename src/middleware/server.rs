//! Server middleware chain (§4.9): panic recovery → tracing start →
//! metadata extraction → auth check → metrics → handler.

use super::CallMetrics;
use crate::error::{MeshError, Result};
use crate::metadata::{stamp_source, RequestContext};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info_span, Instrument};

/// Auth-check collaborator (§1 Non-goals: "authenticator wiring remains
/// an external collaborator"). The server chain calls this after
/// metadata extraction and before the handler; a host that doesn't need
/// auth can pass `AllowAll`.
#[async_trait]
pub trait AuthCheck: Send + Sync {
    async fn check(&self, ctx: &RequestContext) -> Result<()>;
}

pub struct AllowAll;

#[async_trait]
impl AuthCheck for AllowAll {
    async fn check(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }
}

/// Returned when the handler task panicked; the chain turns that into a
/// `MeshError::Transport` rather than propagating the panic to the
/// caller, since a single bad handler shouldn't take the process down.
#[derive(Debug)]
pub struct PanicRecovered;

pub struct ServerMiddleware {
    auth: Arc<dyn AuthCheck>,
    metrics: Arc<CallMetrics>,
}

impl ServerMiddleware {
    pub fn new(auth: Arc<dyn AuthCheck>, metrics: Arc<CallMetrics>) -> Self {
        ServerMiddleware { auth, metrics }
    }

    /// Runs an inbound call through the chain. `source_namespace`/
    /// `source_name`/`interface` are the values the transport extracted
    /// from the wire (§6) and are stamped onto `ctx` before the auth
    /// check and handler run.
    pub async fn handle<F, Fut, T>(
        &self,
        mut ctx: RequestContext,
        source_namespace: &str,
        source_name: &str,
        interface: &str,
        handler: F,
    ) -> Result<T>
    where
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let span = info_span!("mesh_server_call", source = %source_name, interface = %interface);
        async {
            stamp_source(&mut ctx, source_namespace, source_name, interface);

            if let Err(e) = self.auth.check(&ctx).await {
                self.metrics.record(true);
                return Err(e);
            }

            let outcome = tokio::spawn(handler(ctx)).await;
            match outcome {
                Ok(result) => {
                    self.metrics.record(result.is_err());
                    if let Err(e) = &result {
                        error!(interface = %interface, error = %e, "server middleware: handler returned an error");
                    }
                    result
                }
                Err(join_err) => {
                    self.metrics.record(true);
                    error!(interface = %interface, panic = %join_err, "server middleware: handler panicked");
                    Err(MeshError::Transport(anyhow::anyhow!(
                        "handler panicked: {join_err}"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn middleware() -> ServerMiddleware {
        ServerMiddleware::new(StdArc::new(AllowAll), StdArc::new(CallMetrics::new()))
    }

    #[tokio::test]
    async fn stamps_source_metadata_before_handler_runs() {
        let mw = middleware();
        let ctx = RequestContext::new();
        let seen = mw
            .handle(ctx, "ns", "orders", "GetOrder", |ctx| async move {
                Ok::<_, MeshError>(ctx.field("source_service_name").map(|s| s.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(seen, Some("orders".to_string()));
    }

    #[tokio::test]
    async fn handler_panic_is_recovered_as_transport_error() {
        let mw = middleware();
        let ctx = RequestContext::new();
        let result = mw
            .handle(ctx, "ns", "orders", "GetOrder", |_ctx| async move {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok::<(), MeshError>(())
            })
            .await;
        assert!(matches!(result, Err(MeshError::Transport(_))));
    }

    struct DenyAll;

    #[async_trait]
    impl AuthCheck for DenyAll {
        async fn check(&self, _ctx: &RequestContext) -> Result<()> {
            Err(MeshError::NoInstanceAvailable)
        }
    }

    #[tokio::test]
    async fn auth_check_failure_short_circuits_before_handler() {
        let mw = ServerMiddleware::new(StdArc::new(DenyAll), StdArc::new(CallMetrics::new()));
        let ctx = RequestContext::new();
        let called = StdArc::new(std::sync::atomic::AtomicBool::new(false));
        let called_inner = called.clone();
        let result = mw
            .handle(ctx, "ns", "orders", "GetOrder", move |_ctx| {
                called_inner.store(true, std::sync::atomic::Ordering::SeqCst);
                async move { Ok::<(), MeshError>(()) }
            })
            .await;
        assert!(result.is_err());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
