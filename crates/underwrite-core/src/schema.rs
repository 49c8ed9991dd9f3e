//! Capability contracts: which record fields a capability reads and writes,
//! and the value domain each field must fall in.

use serde::{Deserialize, Serialize};

use crate::types::{ApplicantProfile, CreditOffer, Decision, RecordField};

/// Value domain of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    /// A valid applicant profile carrying `debt_to_income_ratio`.
    Applicant,
    /// A number in (0, 100].
    Score,
    Decision,
    /// Non-empty free text.
    Text,
    Offer,
}

impl RecordField {
    pub fn domain(self) -> ValueDomain {
        match self {
            RecordField::Applicant => ValueDomain::Applicant,
            RecordField::CreditworthinessScore
            | RecordField::FraudRiskScore
            | RecordField::IncomeStabilityScore
            | RecordField::MarketConditionsScore => ValueDomain::Score,
            RecordField::Decision => ValueDomain::Decision,
            RecordField::Explanation | RecordField::AuditReview => ValueDomain::Text,
            RecordField::CreditOffer => ValueDomain::Offer,
        }
    }
}

/// Check a value a worker returned for `field` against the field's domain.
pub fn validate_field(field: RecordField, value: &serde_json::Value) -> Result<(), String> {
    match field.domain() {
        ValueDomain::Score => {
            let score = value
                .as_f64()
                .ok_or_else(|| format!("{} must be a number, got {}", field, value))?;
            if score > 0.0 && score <= 100.0 {
                Ok(())
            } else {
                Err(format!("{} must be in (0, 100], got {}", field, score))
            }
        }
        ValueDomain::Decision => serde_json::from_value::<Decision>(value.clone())
            .map(|_| ())
            .map_err(|_| format!("{} must be one of APPROVED, SUBJECT_TO_REVIEW, REJECTED, got {}", field, value)),
        ValueDomain::Text => match value.as_str() {
            Some(text) if !text.trim().is_empty() => Ok(()),
            Some(_) => Err(format!("{} must not be empty", field)),
            None => Err(format!("{} must be a string, got {}", field, value)),
        },
        ValueDomain::Offer => {
            let offer: CreditOffer = serde_json::from_value(value.clone())
                .map_err(|e| format!("{} is malformed: {}", field, e))?;
            offer.validate().map_err(|e| format!("{}: {}", field, e))
        }
        ValueDomain::Applicant => {
            let profile: ApplicantProfile = serde_json::from_value(value.clone())
                .map_err(|e| format!("{} is malformed: {}", field, e))?;
            profile.validate().map_err(|e| format!("{}: {}", field, e))?;
            if profile.debt_to_income_ratio.is_none() {
                return Err(format!("{} is missing debt_to_income_ratio", field));
            }
            Ok(())
        }
    }
}

/// What a capability reads from and writes to the evaluation record.
///
/// This is also the handshake payload a worker returns for each capability
/// it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    /// Fields that must be present before the call.
    #[serde(default)]
    pub inputs: Vec<RecordField>,
    /// Fields passed when present and omitted otherwise.
    #[serde(default)]
    pub optional_inputs: Vec<RecordField>,
    pub outputs: Vec<RecordField>,
}

impl CapabilitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: vec![],
            optional_inputs: vec![],
            outputs: vec![],
        }
    }

    pub fn with_inputs(mut self, fields: &[RecordField]) -> Self {
        self.inputs = fields.to_vec();
        self
    }

    pub fn with_optional_inputs(mut self, fields: &[RecordField]) -> Self {
        self.optional_inputs = fields.to_vec();
        self
    }

    pub fn with_outputs(mut self, fields: &[RecordField]) -> Self {
        self.outputs = fields.to_vec();
        self
    }
}

pub const NORMALIZE_APPLICATION: &str = "normalize_application";
pub const ESTIMATE_CREDITWORTHINESS: &str = "estimate_creditworthiness";
pub const EVALUATE_FRAUD_RISK: &str = "evaluate_fraud_risk";
pub const ASSESS_INCOME_STABILITY: &str = "assess_income_stability";
pub const FETCH_MACRO_RISK: &str = "fetch_macro_risk";
pub const MAKE_DECISION: &str = "make_decision";
pub const GENERATE_EXPLANATION: &str = "generate_explanation";
pub const AUDIT_CREDIT_DECISION: &str = "audit_credit_decision";
pub const MAKE_CREDIT_OFFER: &str = "make_credit_offer";

const SCORES: [RecordField; 4] = [
    RecordField::CreditworthinessScore,
    RecordField::FraudRiskScore,
    RecordField::IncomeStabilityScore,
    RecordField::MarketConditionsScore,
];

/// Contract of a standard underwriting capability, by name.
pub fn standard_contract(name: &str) -> Option<CapabilitySchema> {
    use RecordField as F;

    let schema = CapabilitySchema::new(name);
    let schema = match name {
        NORMALIZE_APPLICATION => schema.with_inputs(&[F::Applicant]).with_outputs(&[F::Applicant]),
        ESTIMATE_CREDITWORTHINESS => schema
            .with_inputs(&[F::Applicant])
            .with_outputs(&[F::CreditworthinessScore]),
        EVALUATE_FRAUD_RISK => schema.with_inputs(&[F::Applicant]).with_outputs(&[F::FraudRiskScore]),
        ASSESS_INCOME_STABILITY => schema
            .with_inputs(&[F::Applicant])
            .with_outputs(&[F::IncomeStabilityScore]),
        FETCH_MACRO_RISK => schema
            .with_inputs(&[F::Applicant])
            .with_outputs(&[F::MarketConditionsScore]),
        MAKE_DECISION => schema
            .with_inputs(&[F::CreditworthinessScore, F::FraudRiskScore, F::IncomeStabilityScore])
            .with_optional_inputs(&[F::MarketConditionsScore])
            .with_outputs(&[F::Decision]),
        GENERATE_EXPLANATION => schema
            .with_inputs(&[&[F::Applicant][..], &SCORES[..], &[F::Decision][..]].concat())
            .with_outputs(&[F::Explanation]),
        AUDIT_CREDIT_DECISION => schema
            .with_inputs(&[&[F::Applicant][..], &SCORES[..], &[F::Decision, F::Explanation][..]].concat())
            .with_outputs(&[F::AuditReview]),
        MAKE_CREDIT_OFFER => schema
            .with_inputs(&[&[F::Applicant][..], &SCORES[..], &[F::Decision][..]].concat())
            .with_outputs(&[F::CreditOffer]),
        _ => return None,
    };
    Some(schema)
}

/// Names of all standard capabilities, in graph order.
pub fn standard_capabilities() -> [&'static str; 9] {
    [
        NORMALIZE_APPLICATION,
        ESTIMATE_CREDITWORTHINESS,
        EVALUATE_FRAUD_RISK,
        ASSESS_INCOME_STABILITY,
        FETCH_MACRO_RISK,
        MAKE_DECISION,
        GENERATE_EXPLANATION,
        AUDIT_CREDIT_DECISION,
        MAKE_CREDIT_OFFER,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_domain() {
        let f = RecordField::FraudRiskScore;
        assert!(validate_field(f, &json!(0.01)).is_ok());
        assert!(validate_field(f, &json!(100)).is_ok());
        assert!(validate_field(f, &json!(0)).is_err());
        assert!(validate_field(f, &json!(100.01)).is_err());
        assert!(validate_field(f, &json!("20")).is_err());
    }

    #[test]
    fn test_decision_and_text_domains() {
        assert!(validate_field(RecordField::Decision, &json!("REJECTED")).is_ok());
        assert!(validate_field(RecordField::Decision, &json!("MAYBE")).is_err());
        assert!(validate_field(RecordField::Explanation, &json!("Strong profile.")).is_ok());
        assert!(validate_field(RecordField::Explanation, &json!("  ")).is_err());
        assert!(validate_field(RecordField::AuditReview, &json!(42)).is_err());
    }

    #[test]
    fn test_offer_domain() {
        let ok = json!({"interest_rate": 0.07, "tenure": 36, "credit_limit": 20000.0});
        assert!(validate_field(RecordField::CreditOffer, &ok).is_ok());
        let bad = json!({"interest_rate": 0.2, "tenure": 36, "credit_limit": 20000.0});
        assert!(validate_field(RecordField::CreditOffer, &bad).is_err());
        assert!(validate_field(RecordField::CreditOffer, &json!({"tenure": 12})).is_err());
    }

    #[test]
    fn test_applicant_domain_requires_ratio() {
        let mut profile = json!({
            "name": "Alice Johnson",
            "age": 32,
            "location": "Canada",
            "annual_income": 85000.0,
            "total_debt": 15000.0,
            "credit_score": 720,
            "credit_history_length": 8,
            "employment_status": "employed",
            "employment_years": 5
        });
        assert!(validate_field(RecordField::Applicant, &profile).is_err());
        profile["debt_to_income_ratio"] = json!(0.176);
        assert!(validate_field(RecordField::Applicant, &profile).is_ok());
    }

    #[test]
    fn test_standard_contracts_cover_every_capability() {
        for name in standard_capabilities() {
            let schema = standard_contract(name).expect(name);
            assert_eq!(schema.name, name);
            assert_eq!(schema.outputs.len(), 1);
        }
        assert!(standard_contract("summon_dragons").is_none());
    }

    #[test]
    fn test_decision_contract_tolerates_missing_market_score() {
        let schema = standard_contract(MAKE_DECISION).unwrap();
        assert!(!schema.inputs.contains(&RecordField::MarketConditionsScore));
        assert_eq!(schema.optional_inputs, vec![RecordField::MarketConditionsScore]);
    }

    #[test]
    fn test_schema_wire_format() {
        let schema = standard_contract(ESTIMATE_CREDITWORTHINESS).unwrap();
        let wire = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            wire,
            json!({
                "name": "estimate_creditworthiness",
                "inputs": ["applicant"],
                "optional_inputs": [],
                "outputs": ["creditworthiness_score"]
            })
        );
    }
}
