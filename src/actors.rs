//! Ready-made actor handlers.

use std::fmt::Display;

use tracing::error;

use crate::actor::Actor;

/// Handler that drains values and logs each one at error level.
///
/// Spawn it under a well-known name and forward failures to it:
///
/// ```no_run
/// use troupe::CancellationToken;
///
/// # async fn wire() -> Result<(), troupe::ActorError> {
/// let ctx = CancellationToken::new();
/// let errors = troupe::spawn::<String, _, _>(
///     &ctx,
///     "errors",
///     16,
///     troupe::actors::log_error_handler,
///     -1,
/// )
/// .await?;
///
/// errors.send("downstream timed out".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn log_error_handler<M>(actor: Actor<M>)
where
    M: Display + Send + 'static,
{
    while let Some(value) = actor.recv().await {
        error!(
            service = crate::SERVICE,
            actor = %actor.name(),
            uuid = %actor.uuid(),
            error = %value,
            "error logged"
        );
    }
}
