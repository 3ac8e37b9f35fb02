use tracing::{info, instrument};

/// Fire-and-forget boundary to the institutional mail relay. Delivery is a
/// collaborator concern: the reset flow never waits on it and never fails
/// because of it.
#[derive(Clone, Default)]
pub struct Mailer;

impl Mailer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, token))]
    pub fn send_reset_email(&self, email: &str, token: &str, requires_challenge: bool) {
        let email = email.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            // Relay handoff goes here; the token value is never logged.
            info!(
                recipient = %email,
                requires_challenge,
                token_len = token.len(),
                "Password recovery email dispatched"
            );
        });
    }
}
