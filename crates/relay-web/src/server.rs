use std::future::Future;

use axum::serve;
use tokio::net::TcpListener;

use crate::error::WebError;
use crate::routes::router;
use crate::state::WebState;

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn run_web_server<F>(bind_addr: &str, state: WebState, shutdown: F) -> Result<(), WebError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = %bind_addr, "http server listening");
    serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| WebError::Internal {
            message: err.to_string(),
        })?;
    Ok(())
}
