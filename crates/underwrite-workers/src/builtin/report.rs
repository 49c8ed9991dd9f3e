//! Template-based explanation, audit and offer.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{
    CapabilitySchema, AUDIT_CREDIT_DECISION, GENERATE_EXPLANATION, MAKE_CREDIT_OFFER,
};
use underwrite_core::traits::Capability;
use underwrite_core::types::{CreditOffer, Decision};

use super::{contract, parse_args, DecidedArgs};
use crate::scoring::{self, RiskScores};

/// Fraud risk at or above this is flagged.
const HIGH_FRAUD_RISK: f64 = 60.0;
/// Debt-to-income ratio above this is flagged.
const HIGH_DTI: f64 = 0.4;

fn fmt_market(scores: &RiskScores) -> String {
    match scores.market_conditions {
        Some(score) => format!("{:.2}", score),
        None => "unavailable".to_string(),
    }
}

/// Factor names paired with how favourable each is (higher is better).
fn factors(scores: &RiskScores) -> Vec<(&'static str, f64)> {
    let mut factors = vec![
        ("creditworthiness", scores.creditworthiness),
        ("fraud risk", 100.0 - scores.fraud_risk),
        ("income stability", scores.income_stability),
    ];
    if let Some(market) = scores.market_conditions {
        factors.push(("market conditions", market));
    }
    factors
}

pub fn explain(applicant_name: &str, scores: &RiskScores, decision: Decision) -> String {
    let factors = factors(scores);
    let strongest = factors
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|f| f.0)
        .unwrap_or("none");
    let weakest = factors
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|f| f.0)
        .unwrap_or("none");

    let outcome = match decision {
        Decision::Approved => "has been approved",
        Decision::SubjectToReview => "has been referred for human review",
        Decision::Rejected => "has been rejected",
    };

    format!(
        "The application from {} {} with an aggregate score of {:.2} \
         (approval at {:.0}, review at {:.0}). Scores: creditworthiness {:.2}, \
         fraud risk {:.2}, income stability {:.2}, market conditions {}. \
         The strongest factor was {} and the weakest was {}.",
        applicant_name,
        outcome,
        scores.aggregate(),
        Decision::APPROVAL_THRESHOLD,
        Decision::REVIEW_THRESHOLD,
        scores.creditworthiness,
        scores.fraud_risk,
        scores.income_stability,
        fmt_market(scores),
        strongest,
        weakest,
    )
}

pub fn audit(args: &DecidedArgs, explanation: &str) -> String {
    let scores = args.scores.risk_scores();
    let recomputed = scores.decision();

    let mut flags = vec![];
    if recomputed != args.decision {
        flags.push(format!(
            "recorded decision {} disagrees with recomputed decision {}",
            args.decision, recomputed
        ));
    }
    if scores.fraud_risk >= HIGH_FRAUD_RISK {
        flags.push(format!("high fraud risk ({:.2})", scores.fraud_risk));
    }
    let dti = args.applicant.debt_to_income_ratio.unwrap_or_else(|| {
        scoring::debt_to_income_ratio(args.applicant.total_debt, args.applicant.annual_income)
    });
    if dti > HIGH_DTI {
        flags.push(format!("debt-to-income ratio {:.2} exceeds {:.2}", dti, HIGH_DTI));
    }
    if scores.market_conditions.is_none() {
        flags.push("market conditions unavailable, counted as zero".to_string());
    }
    if !explanation.contains(args.decision.as_str())
        && !explanation.contains(&args.applicant.name)
    {
        flags.push("explanation does not reference the applicant or decision".to_string());
    }

    let verdict = if flags.is_empty() {
        "No issues found.".to_string()
    } else {
        format!("Flags: {}.", flags.join("; "))
    };

    format!(
        "Audit of {} decision for {}: aggregate {:.2}, creditworthiness {:.2}, \
         fraud risk {:.2}, income stability {:.2}, market conditions {}. {}",
        args.decision,
        args.applicant.name,
        scores.aggregate(),
        scores.creditworthiness,
        scores.fraud_risk,
        scores.income_stability,
        fmt_market(&scores),
        verdict,
    )
}

// ── GenerateExplanation ─────────────────────────────────────────

pub struct GenerateExplanation;

impl Capability for GenerateExplanation {
    fn name(&self) -> &str {
        GENERATE_EXPLANATION
    }
    fn schema(&self) -> CapabilitySchema {
        contract(GENERATE_EXPLANATION)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let args: DecidedArgs = parse_args(args)?;
            let text = explain(&args.applicant.name, &args.scores.risk_scores(), args.decision);
            Ok(json!({ "explanation": text }))
        })
    }
}

// ── AuditCreditDecision ─────────────────────────────────────────

pub struct AuditCreditDecision;

#[derive(Deserialize)]
struct AuditArgs {
    #[serde(flatten)]
    decided: DecidedArgs,
    explanation: String,
}

impl Capability for AuditCreditDecision {
    fn name(&self) -> &str {
        AUDIT_CREDIT_DECISION
    }
    fn schema(&self) -> CapabilitySchema {
        contract(AUDIT_CREDIT_DECISION)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let args: AuditArgs = parse_args(args)?;
            let text = audit(&args.decided, &args.explanation);
            Ok(json!({ "audit_review": text }))
        })
    }
}

// ── MakeCreditOffer ─────────────────────────────────────────────

pub struct MakeCreditOffer;

impl Capability for MakeCreditOffer {
    fn name(&self) -> &str {
        MAKE_CREDIT_OFFER
    }
    fn schema(&self) -> CapabilitySchema {
        contract(MAKE_CREDIT_OFFER)
    }
    fn invoke(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let args: DecidedArgs = parse_args(args)?;
            if args.decision == Decision::Rejected {
                return Err(UnderwriteError::Validation(
                    "no offer can be made for a rejected application".into(),
                ));
            }
            let terms = scoring::offer_terms(&args.applicant, &args.scores.risk_scores());
            let offer = CreditOffer {
                interest_rate: terms.interest_rate,
                tenure: terms.tenure,
                credit_limit: terms.credit_limit,
            };
            offer.validate().map_err(UnderwriteError::Validation)?;
            Ok(json!({ "credit_offer": offer }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decided(decision: &str, fraud: f64) -> serde_json::Value {
        json!({
            "applicant": {
                "name": "Alice Johnson",
                "age": 32,
                "location": "Canada",
                "annual_income": 85000.0,
                "total_debt": 15000.0,
                "credit_score": 720,
                "credit_history_length": 8,
                "employment_status": "employed",
                "employment_years": 5,
                "debt_to_income_ratio": 0.17647
            },
            "creditworthiness_score": 73.92,
            "fraud_risk_score": fraud,
            "income_stability_score": 80.0,
            "market_conditions_score": 65.0,
            "decision": decision
        })
    }

    #[tokio::test]
    async fn test_explanation_mentions_outcome_and_factors() {
        let out = GenerateExplanation
            .invoke(decided("APPROVED", 20.0))
            .await
            .unwrap();
        let text = out["explanation"].as_str().unwrap();
        assert!(text.contains("Alice Johnson has been approved"));
        assert!(text.contains("76.07"));
        assert!(text.contains("strongest factor was"));
        assert!(text.contains("weakest was market conditions"));
    }

    #[tokio::test]
    async fn test_audit_clean_and_flagged() {
        let mut args = decided("APPROVED", 20.0);
        args["explanation"] = json!("Alice Johnson has been approved.");
        let out = AuditCreditDecision.invoke(args).await.unwrap();
        assert!(out["audit_review"].as_str().unwrap().ends_with("No issues found."));

        // A high fraud score drops the aggregate below approval.
        let mut args = decided("APPROVED", 90.0);
        args["explanation"] = json!("Alice Johnson has been approved.");
        let out = AuditCreditDecision.invoke(args).await.unwrap();
        let text = out["audit_review"].as_str().unwrap();
        assert!(text.contains("high fraud risk (90.00)"));
        assert!(text.contains("disagrees with recomputed decision SUBJECT_TO_REVIEW"));
    }

    #[tokio::test]
    async fn test_legacy_decision_spelling_is_accepted() {
        let mut args = decided("SUBJECT TO HUMAN REVIEW", 20.0);
        args["explanation"] = json!("Referred.");
        let out = AuditCreditDecision.invoke(args).await.unwrap();
        assert!(out["audit_review"]
            .as_str()
            .unwrap()
            .starts_with("Audit of SUBJECT_TO_REVIEW decision"));
    }

    #[tokio::test]
    async fn test_offer_is_within_bounds() {
        let out = MakeCreditOffer
            .invoke(decided("APPROVED", 20.0))
            .await
            .unwrap();
        let offer: CreditOffer = serde_json::from_value(out["credit_offer"].clone()).unwrap();
        assert!(offer.validate().is_ok());
        assert_eq!(offer.tenure, 60);
        assert_eq!(offer.interest_rate, 0.0556);
    }

    #[tokio::test]
    async fn test_no_offer_for_rejection() {
        let err = MakeCreditOffer
            .invoke(decided("REJECTED", 20.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }
}
