//! Fixed-score stand-ins for the external fraud and macroeconomic signals.
//!
//! Each reports one score taken from the worker's launch environment, so a
//! deployment can run the whole graph without network access.

use futures::future::BoxFuture;
use tracing::debug;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{CapabilitySchema, EVALUATE_FRAUD_RISK, FETCH_MACRO_RISK};
use underwrite_core::traits::Capability;
use underwrite_core::types::RecordField;

use super::{contract, parse_args, ApplicantArgs};

pub const FRAUD_RISK_SCORE_VAR: &str = "UNDERWRITE_FRAUD_RISK_SCORE";
pub const MARKET_CONDITIONS_SCORE_VAR: &str = "UNDERWRITE_MARKET_CONDITIONS_SCORE";

pub struct FixedScore {
    capability: &'static str,
    field: RecordField,
    score: f64,
}

impl FixedScore {
    pub fn new(capability: &'static str, field: RecordField, score: f64) -> Result<Self> {
        if !(score > 0.0 && score <= 100.0) {
            return Err(UnderwriteError::Config(format!(
                "{} score must be in (0, 100], got {}",
                capability, score
            )));
        }
        Ok(Self {
            capability,
            field,
            score,
        })
    }

    pub fn fraud_risk(score: f64) -> Result<Self> {
        Self::new(EVALUATE_FRAUD_RISK, RecordField::FraudRiskScore, score)
    }

    pub fn market_conditions(score: f64) -> Result<Self> {
        Self::new(FETCH_MACRO_RISK, RecordField::MarketConditionsScore, score)
    }

    /// Fraud stand-in configured from `UNDERWRITE_FRAUD_RISK_SCORE`.
    pub fn fraud_risk_from_env() -> Result<Self> {
        Self::fraud_risk(score_from_env(FRAUD_RISK_SCORE_VAR)?)
    }

    /// Market stand-in configured from `UNDERWRITE_MARKET_CONDITIONS_SCORE`.
    pub fn market_conditions_from_env() -> Result<Self> {
        Self::market_conditions(score_from_env(MARKET_CONDITIONS_SCORE_VAR)?)
    }
}

fn score_from_env(var: &str) -> Result<f64> {
    let raw = std::env::var(var)
        .map_err(|_| UnderwriteError::Config(format!("{} is not set", var)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| UnderwriteError::Config(format!("{} is not a number: {}", var, e)))
}

impl Capability for FixedScore {
    fn name(&self) -> &str {
        self.capability
    }
    fn schema(&self) -> CapabilitySchema {
        contract(self.capability)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let ApplicantArgs { applicant } = parse_args(args)?;
            debug!(
                capability = self.capability,
                location = %applicant.location,
                score = self.score,
                "Reporting fixed score"
            );
            let mut out = serde_json::Map::new();
            out.insert(self.field.as_str().to_string(), self.score.into());
            Ok(serde_json::Value::Object(out))
        })
    }
}
