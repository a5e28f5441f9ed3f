use crate::StatusCode;

/// Lifecycle hooks for observing server activity outside the request/response
/// data path.
///
/// Every method has a no-op default, so implementors only override the events
/// they care about. All methods are called synchronously from worker tasks;
/// keep them cheap (a `tracing` event, a counter increment) or hand off to
/// your own background task.
///
/// # Examples
/// ```
/// use mingoose::{EventSink, StatusCode};
///
/// struct Metrics;
///
/// impl EventSink for Metrics {
///     fn request_end(&self, status: Option<StatusCode>) {
///         tracing::debug!(?status, "request finished");
///     }
/// }
/// ```
pub trait EventSink: Sync + Send + 'static {
    /// Called once, right after a worker task starts, before it processes
    /// its first connection.
    #[allow(unused_variables)]
    fn thread_begin(&self) {}

    /// Called once, right before a worker task exits during shutdown.
    #[allow(unused_variables)]
    fn thread_end(&self) {}

    /// Called after a response has been written, with the status code the
    /// handler set (`None` if the handler never called [`status()`]).
    ///
    /// [`status()`]: crate::Response::status
    #[allow(unused_variables)]
    fn request_end(&self, status: Option<StatusCode>) {}

    /// Called for diagnostic messages the server itself wants to surface
    /// (e.g. a rejected connection, a filter error). Prefer `tracing` for
    /// your own logging; this exists for embedders that want to route
    /// server-internal events through their own sink instead.
    #[allow(unused_variables)]
    fn log(&self, message: &str) {}
}

impl EventSink for () {}
