/// What the implementer's processing logic hands back to the broker.
///
/// This replaces the source library's `consume(message, cb)` callback
/// style: a handler is a plain async function from payload to outcome,
/// and the broker owns the completion bookkeeping (the deadline timer,
/// the retry/dead-letter decision) instead of the caller.
pub type HandlerResult = std::result::Result<(), String>;

/// User-supplied message-processing logic for one queue.
///
/// An implementer does not subclass anything (there is no `Consumer`
/// base type to extend); they hand a value implementing this trait,
/// plus a [`crate::consumer::ConsumerOptions`] naming the queue, to
/// [`crate::consumer::Consumer::new`].
pub trait Handler<T>: Send + Sync + 'static {
    /// Process one payload. Returning `Ok(())` acks the message;
    /// returning `Err(reason)` triggers the retry/dead-letter policy as
    /// though the handler had thrown. `reason` is surfaced only in logs
    /// -- the broker's bookkeeping never reaches user code.
    fn handle(&self, payload: T) -> impl std::future::Future<Output = HandlerResult> + Send;
}

/// Adapts a plain async closure into a [`Handler`], for callers who do
/// not want to name a type.
pub struct FnHandler<F>(pub F);

impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send,
{
    fn handle(&self, payload: T) -> impl std::future::Future<Output = HandlerResult> + Send {
        (self.0)(payload)
    }
}
