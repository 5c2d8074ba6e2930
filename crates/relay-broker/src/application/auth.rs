//! Delayed password verification.
//!
//! Both checks in the protocol go through [`Authenticator::verify`]:
//!
//! - **Space admission**: the setup password against the space digest.
//! - **Server attachment**: the connect password against the digest the
//!   server registered during its own setup.
//!
//! Every check sleeps for the configured login delay *before* comparing.
//! The sleep suspends only the task that issued the check, so one slow
//! guesser never delays other connections.

use std::time::Duration;

use relay_core::PasswordDigest;
use thiserror::Error;

/// Password verification failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("password mismatch")]
    Mismatch,
}

/// Verifies clear-text passwords against stored digests after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct Authenticator {
    delay: Duration,
}

impl Authenticator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits the login delay, then compares `offered` against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Mismatch`] if the digests differ.
    pub async fn verify(&self, offered: &str, expected: &PasswordDigest) -> Result<(), AuthError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if expected.verify(offered) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_verify_accepts_matching_password() {
        let auth = Authenticator::new(Duration::ZERO);
        let stored = PasswordDigest::of("test123");
        tokio_test::assert_ok!(auth.verify("test123", &stored).await);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_password() {
        let auth = Authenticator::new(Duration::ZERO);
        let stored = PasswordDigest::of("test123");
        assert_eq!(auth.verify("nope", &stored).await, Err(AuthError::Mismatch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_waits_full_delay_before_answering() {
        let auth = Authenticator::new(Duration::from_secs(2));
        let stored = PasswordDigest::of("test123");

        let started = Instant::now();
        let result = auth.verify("wrong", &stored).await;

        assert_eq!(result, Err(AuthError::Mismatch));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_to_successful_checks_too() {
        let auth = Authenticator::new(Duration::from_millis(500));
        let stored = PasswordDigest::of("ok");

        let started = Instant::now();
        tokio_test::assert_ok!(auth.verify("ok", &stored).await);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
