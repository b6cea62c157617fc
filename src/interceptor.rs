//! Response interception interface
use crate::message::InterceptedMessage;

/// Caller-supplied logic invoked once per intercepted message.
///
/// The pipeline always awaits completion before re-encoding the message and
/// replying to the proxy, so an implementation may rewrite the response
/// either synchronously or after suspending on its own I/O.
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
  /// Inspect and optionally rewrite the response half of `message`.
  async fn intercept(&self, message: &mut InterceptedMessage);
}

/// An interceptor that does nothing.
pub struct NopInterceptor;

#[async_trait::async_trait]
impl Interceptor for NopInterceptor {
  async fn intercept(&self, _message: &mut InterceptedMessage) {}
}

/// An interceptor that logs each message and leaves it untouched.
pub struct LoggingInterceptor;

#[async_trait::async_trait]
impl Interceptor for LoggingInterceptor {
  async fn intercept(&self, message: &mut InterceptedMessage) {
    tracing::info!(
      "[bridge] {} {} -> {} ({} bytes)",
      message.request().method(),
      message.request().raw_url(),
      message.response().status_code(),
      message.response_body().len()
    );
  }
}
