use sef_schemas::{StorageEvent, UserRecord};
use serde::{Deserialize, Serialize};

/// Exchange result codes reported by clients and farmers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeCodes {
    pub success: i32,
    pub failure: i32,
}

impl Default for ExchangeCodes {
    fn default() -> Self {
        Self {
            success: 1000,
            failure: 1100,
        }
    }
}

/// Inputs to [`resolve`] that come from configuration rather than the records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvePolicy {
    pub codes: ExchangeCodes,
    /// Unknown-report rate above which a user's inconclusive events are
    /// resolved in the farmer's favour.
    pub unknown_threshold: f64,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            codes: ExchangeCodes::default(),
            unknown_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Outcome {
    pub success: bool,
    pub unknown: bool,
}

impl Outcome {
    pub const fn new(success: bool, unknown: bool) -> Self {
        Self { success, unknown }
    }
}

/// Which rule of the cascade decided the outcome. Carried for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionRule {
    /// The event was already recorded as a success.
    DeclaredSuccess,
    /// Client reported the success code.
    ClientSuccess,
    /// Farmer reported failure and the client filed no code.
    FarmerFailureOnly,
    /// Both sides reported the failure code.
    BothFailure,
    /// Client reported failure and the farmer filed no code.
    ClientFailureOnly,
    /// No report rule matched; user is over the unknown-report threshold.
    UnknownThresholdExceeded,
    /// No rule matched.
    Unresolved,
}

impl ResolutionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionRule::DeclaredSuccess => "declared_success",
            ResolutionRule::ClientSuccess => "client_success",
            ResolutionRule::FarmerFailureOnly => "farmer_failure_only",
            ResolutionRule::BothFailure => "both_failure",
            ResolutionRule::ClientFailureOnly => "client_failure_only",
            ResolutionRule::UnknownThresholdExceeded => "unknown_threshold_exceeded",
            ResolutionRule::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub rule: ResolutionRule,
}

impl Resolution {
    fn by(rule: ResolutionRule, success: bool, unknown: bool) -> Self {
        Self {
            outcome: Outcome::new(success, unknown),
            rule,
        }
    }
}

/// Classify a storage event as success / failure / unknown.
///
/// First match wins; the order is load-bearing. A code that is absent is a
/// third state, distinct from any code value including `0`.
///
/// `user` is `None` when the event's user reference points at no record;
/// such a user is never over the threshold.
pub fn resolve(event: &StorageEvent, user: Option<&UserRecord>, policy: &ResolvePolicy) -> Resolution {
    if event.success {
        return Resolution::by(ResolutionRule::DeclaredSuccess, true, false);
    }

    let ExchangeCodes { success, failure } = policy.codes;
    let client = event.client_code();
    let farmer = event.farmer_code();

    if client == Some(success) {
        return Resolution::by(ResolutionRule::ClientSuccess, true, false);
    }
    if farmer == Some(failure) && client.is_none() {
        return Resolution::by(ResolutionRule::FarmerFailureOnly, false, false);
    }
    if farmer == Some(failure) && client == Some(failure) {
        return Resolution::by(ResolutionRule::BothFailure, false, false);
    }
    if farmer.is_none() && client == Some(failure) {
        return Resolution::by(ResolutionRule::ClientFailureOnly, false, false);
    }

    let lenient = user
        .map(|u| u.exceeds_unknown_reports_threshold(policy.unknown_threshold))
        .unwrap_or(false);
    if lenient {
        return Resolution::by(ResolutionRule::UnknownThresholdExceeded, true, true);
    }

    Resolution::by(ResolutionRule::Unresolved, false, true)
}
