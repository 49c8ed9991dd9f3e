//! Deterministic assessments computed from the applicant alone, plus the
//! decision that combines them.

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use underwrite_core::error::Result;
use underwrite_core::schema::{
    CapabilitySchema, ASSESS_INCOME_STABILITY, ESTIMATE_CREDITWORTHINESS, MAKE_DECISION,
    NORMALIZE_APPLICATION,
};
use underwrite_core::traits::Capability;

use super::{contract, parse_args, ApplicantArgs, ScoreArgs};
use crate::scoring;

// ── NormalizeApplication ────────────────────────────────────────

/// Intake: validates the applicant and adds the debt-to-income ratio.
pub struct NormalizeApplication;

impl Capability for NormalizeApplication {
    fn name(&self) -> &str {
        NORMALIZE_APPLICATION
    }
    fn schema(&self) -> CapabilitySchema {
        contract(NORMALIZE_APPLICATION)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let ApplicantArgs { mut applicant } = parse_args(args)?;
            applicant.validate()?;
            let dti = scoring::debt_to_income_ratio(applicant.total_debt, applicant.annual_income);
            applicant.debt_to_income_ratio = Some(dti);
            debug!(applicant = %applicant.name, dti, "Application normalized");
            Ok(json!({ "applicant": applicant }))
        })
    }
}

// ── EstimateCreditworthiness ────────────────────────────────────

pub struct EstimateCreditworthiness;

impl Capability for EstimateCreditworthiness {
    fn name(&self) -> &str {
        ESTIMATE_CREDITWORTHINESS
    }
    fn schema(&self) -> CapabilitySchema {
        contract(ESTIMATE_CREDITWORTHINESS)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let ApplicantArgs { applicant } = parse_args(args)?;
            let score = scoring::creditworthiness(&applicant);
            Ok(json!({ "creditworthiness_score": score }))
        })
    }
}

// ── AssessIncomeStability ───────────────────────────────────────

pub struct AssessIncomeStability;

impl Capability for AssessIncomeStability {
    fn name(&self) -> &str {
        ASSESS_INCOME_STABILITY
    }
    fn schema(&self) -> CapabilitySchema {
        contract(ASSESS_INCOME_STABILITY)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let ApplicantArgs { applicant } = parse_args(args)?;
            let score =
                scoring::income_stability(applicant.employment_status, applicant.employment_years);
            Ok(json!({ "income_stability_score": score }))
        })
    }
}

// ── MakeDecision ────────────────────────────────────────────────

pub struct MakeDecision;

impl Capability for MakeDecision {
    fn name(&self) -> &str {
        MAKE_DECISION
    }
    fn schema(&self) -> CapabilitySchema {
        contract(MAKE_DECISION)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let scores = parse_args::<ScoreArgs>(args)?.risk_scores();
            let aggregate = scores.aggregate();
            let decision = scores.decision();
            debug!(aggregate, %decision, "Decision made");
            Ok(json!({ "decision": decision }))
        })
    }
}
