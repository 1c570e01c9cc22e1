/// Down alerts for website owners
///
/// The dispatcher is the only outbound notification path; it is invoked by
/// the health cycle when a target goes from reachable to unreachable.
pub mod email;

pub use email::EmailAlerter;

/// Delivers a down alert for `url` to a user
#[async_trait::async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Returns whether the alert was delivered. Never fails; implementations
    /// log their own errors.
    async fn send_down_alert(&self, to_email: &str, display_name: &str, url: &str) -> bool;
}
