pub mod assessment;
pub mod report;
pub mod stand_in;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{standard_contract, CapabilitySchema};
use underwrite_core::types::{ApplicantProfile, Decision};

use crate::scoring::RiskScores;

/// Declared contract of a built-in capability.
pub(crate) fn contract(name: &str) -> CapabilitySchema {
    standard_contract(name).unwrap_or_else(|| CapabilitySchema::new(name))
}

/// Decode call arguments, reporting bad input as a validation failure.
pub(crate) fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| UnderwriteError::Validation(e.to_string()))
}

#[derive(Deserialize)]
pub(crate) struct ApplicantArgs {
    pub applicant: ApplicantProfile,
}

#[derive(Deserialize)]
pub(crate) struct ScoreArgs {
    pub creditworthiness_score: f64,
    pub fraud_risk_score: f64,
    pub income_stability_score: f64,
    #[serde(default)]
    pub market_conditions_score: Option<f64>,
}

impl ScoreArgs {
    pub fn risk_scores(&self) -> RiskScores {
        RiskScores {
            creditworthiness: self.creditworthiness_score,
            fraud_risk: self.fraud_risk_score,
            income_stability: self.income_stability_score,
            market_conditions: self.market_conditions_score,
        }
    }
}

/// Applicant, scores and decision: what the downstream report capabilities see.
#[derive(Deserialize)]
pub(crate) struct DecidedArgs {
    pub applicant: ApplicantProfile,
    #[serde(flatten)]
    pub scores: ScoreArgs,
    pub decision: Decision,
}
