use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::collections::HashMap;
use std::time::Duration;

/// Circuit breaker guarding one geocoding provider.
pub type ProviderBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for a geocoding provider.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// Only errors count as failures. A provider answering "nothing found"
/// is healthy.
pub fn create_provider_circuit_breaker() -> ProviderBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// One breaker per provider id.
#[derive(Default)]
pub struct ProviderBreakers {
    breakers: HashMap<String, ProviderBreaker>,
}

impl ProviderBreakers {
    pub fn new<I, S>(provider_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            breakers: provider_ids
                .into_iter()
                .map(|id| (id.into(), create_provider_circuit_breaker()))
                .collect(),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderBreaker> {
        self.breakers.get(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_provider_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("provider down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_breakers_are_independent_per_provider() {
        let breakers = ProviderBreakers::new(["google", "nominatim"]);
        let google = breakers.get("google").unwrap();

        for _ in 0..5 {
            let _: Result<(), Error<&str>> = google.call(|| Err::<(), &str>("503"));
        }

        assert!(!google.is_call_permitted());
        assert!(breakers.get("nominatim").unwrap().is_call_permitted());
        assert!(breakers.get("opencage").is_none());
    }
}
