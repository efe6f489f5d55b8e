use std::future::Future;
use std::time::Duration;

use crate::consumer::handler::HandlerResult;
use crate::error::BrokerError;

/// Runs a handler invocation under a one-shot deadline.
///
/// `budget = None` (or `Some(Duration::ZERO)`) disables the watchdog,
/// matching `messageConsumeTimeout: 0` meaning "no timeout". Otherwise
/// the handler future is driven under [`tokio::time::timeout`]: if the
/// deadline elapses first, the future is dropped right there (cancelling
/// whatever it was doing at its next await point) and a synthesized
/// [`BrokerError::Timeout`] is returned as though the handler had
/// failed. A handler that completes a moment after the deadline never
/// gets the chance to report success -- its future was already dropped,
/// so there is nothing to observe.
pub async fn run<F>(budget: Option<Duration>, fut: F) -> Result<(), BrokerError>
where
    F: Future<Output = HandlerResult>,
{
    match budget {
        Some(budget) if !budget.is_zero() => match tokio::time::timeout(budget, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(BrokerError::Handler(reason)),
            Err(_elapsed) => Err(BrokerError::Timeout),
        },
        _ => fut.await.map_err(BrokerError::Handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn disabled_watchdog_awaits_to_completion() {
        let result = run(None, async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_when_handler_exceeds_budget() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        };
        let result = run(Some(Duration::from_millis(100)), slow).await;
        assert!(matches!(result, Err(BrokerError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_handler_failure_within_budget() {
        let failing = async { Err("boom".to_string()) };
        let result = run(Some(Duration::from_millis(100)), failing).await;
        assert!(matches!(result, Err(BrokerError::Handler(reason)) if reason == "boom"));
    }
}
