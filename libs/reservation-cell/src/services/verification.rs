use async_trait::async_trait;

use crate::models::Reservation;

/// Checks the one-time code a patient submits to confirm a lock.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn verify(&self, reservation: &Reservation, code: &str) -> bool;
}

/// Accepts a single configured code for every reservation.
pub struct StaticCodeVerifier {
    code: String,
}

impl StaticCodeVerifier {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[async_trait]
impl VerificationProvider for StaticCodeVerifier {
    async fn verify(&self, _reservation: &Reservation, code: &str) -> bool {
        constant_time_eq(self.code.trim().as_bytes(), code.trim().as_bytes())
    }
}

fn constant_time_eq(expected: &[u8], given: &[u8]) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected
        .iter()
        .zip(given)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn lock() -> Reservation {
        Reservation::new_lock(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now(),
            Duration::minutes(30),
            Duration::minutes(5),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn accepts_only_the_configured_code() {
        let verifier = StaticCodeVerifier::new("123456");
        let reservation = lock();

        assert!(verifier.verify(&reservation, "123456").await);
        assert!(verifier.verify(&reservation, " 123456 ").await);
        assert!(!verifier.verify(&reservation, "123457").await);
        assert!(!verifier.verify(&reservation, "12345").await);
        assert!(!verifier.verify(&reservation, "").await);
    }
}
