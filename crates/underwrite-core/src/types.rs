use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, UnderwriteError};

/// Unique identifier of one graph run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentStatus {
    Employed,
    SelfEmployed,
    Unemployed,
    Retired,
}

impl EmploymentStatus {
    /// Employed or self-employed.
    pub fn has_income(self) -> bool {
        matches!(self, Self::Employed | Self::SelfEmployed)
    }
}

/// The applicant as submitted, plus the intake node's derived ratio.
///
/// Unknown fields submitted with the application are kept in `extensions`
/// and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub name: String,
    pub age: u32,
    pub location: String,
    pub annual_income: f64,
    pub total_debt: f64,
    pub credit_score: u32,
    pub credit_history_length: u32,
    pub employment_status: EmploymentStatus,
    pub employment_years: u32,
    /// Set by the intake node; absent on a fresh application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt_to_income_ratio: Option<f64>,
    #[serde(flatten)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl ApplicantProfile {
    /// Parse and validate an application received at the boundary.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let profile: Self = serde_json::from_value(value)
            .map_err(|e| UnderwriteError::Validation(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(UnderwriteError::Validation(msg));

        if self.name.trim().is_empty() {
            return fail("name must not be empty".into());
        }
        if !(18..=100).contains(&self.age) {
            return fail(format!("age must be between 18 and 100, got {}", self.age));
        }
        if self.location.trim().is_empty() {
            return fail("location must not be empty".into());
        }
        if !self.annual_income.is_finite() || self.annual_income < 0.0 {
            return fail(format!("annual_income must be >= 0, got {}", self.annual_income));
        }
        if !self.total_debt.is_finite() || self.total_debt < 0.0 {
            return fail(format!("total_debt must be >= 0, got {}", self.total_debt));
        }
        if !(300..=850).contains(&self.credit_score) {
            return fail(format!(
                "credit_score must be between 300 and 850, got {}",
                self.credit_score
            ));
        }
        if let Some(ratio) = self.debt_to_income_ratio {
            if !ratio.is_finite() || ratio < 0.0 {
                return fail(format!("debt_to_income_ratio must be >= 0, got {}", ratio));
            }
        }
        Ok(())
    }
}

/// Outcome of the decision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "SUBJECT_TO_REVIEW", alias = "SUBJECT TO HUMAN REVIEW")]
    SubjectToReview,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl Decision {
    pub const APPROVAL_THRESHOLD: f64 = 70.0;
    pub const REVIEW_THRESHOLD: f64 = 50.0;

    /// Band an aggregate score. Lower bounds are inclusive.
    pub fn from_aggregate(score: f64) -> Self {
        if score >= Self::APPROVAL_THRESHOLD {
            Self::Approved
        } else if score >= Self::REVIEW_THRESHOLD {
            Self::SubjectToReview
        } else {
            Self::Rejected
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::SubjectToReview => "SUBJECT_TO_REVIEW",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditOffer {
    pub interest_rate: f64,
    /// Months.
    pub tenure: u32,
    pub credit_limit: f64,
}

impl CreditOffer {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.interest_rate > 0.0 && self.interest_rate <= 0.1) {
            return Err(format!(
                "interest_rate must be in (0, 0.1], got {}",
                self.interest_rate
            ));
        }
        if self.tenure == 0 {
            return Err("tenure must be at least one month".into());
        }
        if !(self.credit_limit.is_finite() && self.credit_limit > 0.0) {
            return Err(format!("credit_limit must be > 0, got {}", self.credit_limit));
        }
        Ok(())
    }
}

/// Fields of the evaluation record, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Applicant,
    CreditworthinessScore,
    FraudRiskScore,
    IncomeStabilityScore,
    MarketConditionsScore,
    Decision,
    Explanation,
    AuditReview,
    CreditOffer,
}

impl RecordField {
    pub const ALL: [RecordField; 9] = [
        Self::Applicant,
        Self::CreditworthinessScore,
        Self::FraudRiskScore,
        Self::IncomeStabilityScore,
        Self::MarketConditionsScore,
        Self::Decision,
        Self::Explanation,
        Self::AuditReview,
        Self::CreditOffer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::CreditworthinessScore => "creditworthiness_score",
            Self::FraudRiskScore => "fraud_risk_score",
            Self::IncomeStabilityScore => "income_stability_score",
            Self::MarketConditionsScore => "market_conditions_score",
            Self::Decision => "decision",
            Self::Explanation => "explanation",
            Self::AuditReview => "audit_review",
            Self::CreditOffer => "credit_offer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated results of one applicant's run.
///
/// Every field other than `applicant` starts absent and may be written once.
/// `applicant` starts populated and may be replaced once, by intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub applicant: ApplicantProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditworthiness_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_stability_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_conditions_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_offer: Option<CreditOffer>,
    #[serde(skip)]
    written: BTreeSet<RecordField>,
}

impl EvaluationRecord {
    pub fn new(applicant: ApplicantProfile) -> Self {
        Self {
            applicant,
            creditworthiness_score: None,
            fraud_risk_score: None,
            income_stability_score: None,
            market_conditions_score: None,
            decision: None,
            explanation: None,
            audit_review: None,
            credit_offer: None,
            written: BTreeSet::new(),
        }
    }

    /// Whether a value is available for reading.
    pub fn is_present(&self, field: RecordField) -> bool {
        match field {
            RecordField::Applicant => true,
            RecordField::CreditworthinessScore => self.creditworthiness_score.is_some(),
            RecordField::FraudRiskScore => self.fraud_risk_score.is_some(),
            RecordField::IncomeStabilityScore => self.income_stability_score.is_some(),
            RecordField::MarketConditionsScore => self.market_conditions_score.is_some(),
            RecordField::Decision => self.decision.is_some(),
            RecordField::Explanation => self.explanation.is_some(),
            RecordField::AuditReview => self.audit_review.is_some(),
            RecordField::CreditOffer => self.credit_offer.is_some(),
        }
    }

    /// Whether the field has been written during this run.
    pub fn is_written(&self, field: RecordField) -> bool {
        self.written.contains(&field)
    }

    /// Wire representation of a field, if present.
    pub fn get(&self, field: RecordField) -> Option<serde_json::Value> {
        let value: serde_json::Value = match field {
            RecordField::Applicant => serde_json::to_value(&self.applicant).ok()?,
            RecordField::CreditworthinessScore => self.creditworthiness_score?.into(),
            RecordField::FraudRiskScore => self.fraud_risk_score?.into(),
            RecordField::IncomeStabilityScore => self.income_stability_score?.into(),
            RecordField::MarketConditionsScore => self.market_conditions_score?.into(),
            RecordField::Decision => self.decision?.as_str().into(),
            RecordField::Explanation => self.explanation.clone()?.into(),
            RecordField::AuditReview => self.audit_review.clone()?.into(),
            RecordField::CreditOffer => serde_json::to_value(self.credit_offer.as_ref()?).ok()?,
        };
        Some(value)
    }

    /// Write a field exactly once.
    ///
    /// The value must already have passed schema validation; this only
    /// converts it into the typed slot and enforces the write-once rule.
    pub fn write(&mut self, field: RecordField, value: serde_json::Value) -> Result<()> {
        if self.written.contains(&field) {
            return Err(UnderwriteError::FieldAlreadyWritten(field.to_string()));
        }

        match field {
            RecordField::Applicant => self.applicant = serde_json::from_value(value)?,
            RecordField::CreditworthinessScore => {
                self.creditworthiness_score = Some(serde_json::from_value(value)?)
            }
            RecordField::FraudRiskScore => self.fraud_risk_score = Some(serde_json::from_value(value)?),
            RecordField::IncomeStabilityScore => {
                self.income_stability_score = Some(serde_json::from_value(value)?)
            }
            RecordField::MarketConditionsScore => {
                self.market_conditions_score = Some(serde_json::from_value(value)?)
            }
            RecordField::Decision => self.decision = Some(serde_json::from_value(value)?),
            RecordField::Explanation => self.explanation = Some(serde_json::from_value(value)?),
            RecordField::AuditReview => self.audit_review = Some(serde_json::from_value(value)?),
            RecordField::CreditOffer => self.credit_offer = Some(serde_json::from_value(value)?),
        }

        self.written.insert(field);
        Ok(())
    }

    /// Write a batch of fields as one unit: either every field lands or
    /// the record is left untouched.
    pub fn write_all<I>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (RecordField, serde_json::Value)>,
    {
        let mut staged = self.clone();
        for (field, value) in fields {
            staged.write(field, value)?;
        }
        *self = staged;
        Ok(())
    }
}
