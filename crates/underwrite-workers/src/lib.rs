//! Built-in implementations of the standard underwriting capabilities.

pub mod builtin;
pub mod scoring;

use std::sync::Arc;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{
    ASSESS_INCOME_STABILITY, AUDIT_CREDIT_DECISION, ESTIMATE_CREDITWORTHINESS,
    EVALUATE_FRAUD_RISK, FETCH_MACRO_RISK, GENERATE_EXPLANATION, MAKE_CREDIT_OFFER,
    MAKE_DECISION, NORMALIZE_APPLICATION,
};
use underwrite_core::traits::Capability;
use underwrite_rpc::CapabilitySet;

use builtin::assessment::{
    AssessIncomeStability, EstimateCreditworthiness, MakeDecision, NormalizeApplication,
};
use builtin::report::{AuditCreditDecision, GenerateExplanation, MakeCreditOffer};
use builtin::stand_in::FixedScore;

/// Construct a built-in capability by name.
///
/// The fraud and market stand-ins read their score from the environment and
/// fail if it is missing.
pub fn builtin(name: &str) -> Result<Arc<dyn Capability>> {
    let capability: Arc<dyn Capability> = match name {
        NORMALIZE_APPLICATION => Arc::new(NormalizeApplication),
        ESTIMATE_CREDITWORTHINESS => Arc::new(EstimateCreditworthiness),
        EVALUATE_FRAUD_RISK => Arc::new(FixedScore::fraud_risk_from_env()?),
        ASSESS_INCOME_STABILITY => Arc::new(AssessIncomeStability),
        FETCH_MACRO_RISK => Arc::new(FixedScore::market_conditions_from_env()?),
        MAKE_DECISION => Arc::new(MakeDecision),
        GENERATE_EXPLANATION => Arc::new(GenerateExplanation),
        AUDIT_CREDIT_DECISION => Arc::new(AuditCreditDecision),
        MAKE_CREDIT_OFFER => Arc::new(MakeCreditOffer),
        other => return Err(UnderwriteError::UnknownCapability(other.to_string())),
    };
    Ok(capability)
}

/// Build the set a worker process serves.
pub fn capability_set<S: AsRef<str>>(names: &[S]) -> Result<CapabilitySet> {
    if names.is_empty() {
        return Err(UnderwriteError::Config(
            "a worker must serve at least one capability".into(),
        ));
    }
    let mut set = CapabilitySet::new();
    for name in names {
        set.register_arc(builtin(name.as_ref())?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schemas_match_standard_contracts() {
        for name in [
            NORMALIZE_APPLICATION,
            ESTIMATE_CREDITWORTHINESS,
            MAKE_DECISION,
            GENERATE_EXPLANATION,
            AUDIT_CREDIT_DECISION,
            MAKE_CREDIT_OFFER,
        ] {
            let capability = builtin(name).unwrap();
            assert_eq!(capability.name(), name);
            assert_eq!(
                Some(capability.schema()),
                underwrite_core::schema::standard_contract(name)
            );
        }
    }

    #[test]
    fn test_unknown_builtin() {
        let err = builtin("score_vibes").err().unwrap();
        assert_eq!(err.kind(), "UnknownCapability");
    }

    #[test]
    fn test_capability_set() {
        let set = capability_set(&["make_decision", "normalize_application"]).unwrap();
        assert_eq!(set.list(), vec!["make_decision", "normalize_application"]);
        assert!(capability_set::<&str>(&[]).is_err());
    }
}
