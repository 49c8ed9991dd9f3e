//! The credit underwriting workflow.

use underwrite_core::error::Result;
use underwrite_core::schema::{
    ASSESS_INCOME_STABILITY, AUDIT_CREDIT_DECISION, ESTIMATE_CREDITWORTHINESS,
    EVALUATE_FRAUD_RISK, FETCH_MACRO_RISK, GENERATE_EXPLANATION, MAKE_CREDIT_OFFER,
    MAKE_DECISION, NORMALIZE_APPLICATION,
};
use underwrite_core::types::{Decision, EvaluationRecord, RecordField};

use crate::edge::{BranchTable, ConditionalEdge};
use crate::graph::WorkflowGraph;
use crate::node::TaskNode;

pub const INTAKE: &str = "intake";
pub const CREDITWORTHINESS: &str = "creditworthiness";
pub const FRAUD: &str = "fraud";
pub const INCOME_STABILITY: &str = "income_stability";
pub const MACRO: &str = "macro";
pub const DECISION: &str = "decision";
pub const EXPLANATION: &str = "explanation";
pub const AUDIT: &str = "audit";
pub const OFFER: &str = "offer";

/// Scoring nodes fanned out after intake.
pub const SCORERS: [&str; 4] = [CREDITWORTHINESS, FRAUD, INCOME_STABILITY, MACRO];

/// An offer is only made on approval.
pub fn offer_if_approved(record: &EvaluationRecord) -> bool {
    record.decision == Some(Decision::Approved)
}

/// Build the nine-node underwriting graph.
pub fn credit_underwriting_graph() -> Result<WorkflowGraph> {
    let nodes = vec![
        TaskNode::new(INTAKE, "Credit Application Intake", NORMALIZE_APPLICATION)
            .with_writes(&[RecordField::Applicant]),
        TaskNode::new(CREDITWORTHINESS, "Creditworthiness Scoring", ESTIMATE_CREDITWORTHINESS)
            .with_dependencies(&[INTAKE])
            .with_writes(&[RecordField::CreditworthinessScore]),
        TaskNode::new(FRAUD, "Fraud Risk Evaluation", EVALUATE_FRAUD_RISK)
            .with_dependencies(&[INTAKE])
            .with_writes(&[RecordField::FraudRiskScore]),
        TaskNode::new(INCOME_STABILITY, "Income Stability Evaluation", ASSESS_INCOME_STABILITY)
            .with_dependencies(&[INTAKE])
            .with_writes(&[RecordField::IncomeStabilityScore]),
        TaskNode::new(MACRO, "Macroeconomic Risk Evaluation", FETCH_MACRO_RISK)
            .with_dependencies(&[INTAKE])
            .with_writes(&[RecordField::MarketConditionsScore]),
        TaskNode::new(DECISION, "Credit Decision Engine", MAKE_DECISION)
            .with_dependencies(&SCORERS)
            .with_writes(&[RecordField::Decision]),
        TaskNode::new(EXPLANATION, "Credit Decision Explanation", GENERATE_EXPLANATION)
            .with_dependencies(&[DECISION])
            .with_writes(&[RecordField::Explanation]),
        TaskNode::new(AUDIT, "Credit Decision Audit", AUDIT_CREDIT_DECISION)
            .with_dependencies(&[EXPLANATION])
            .with_writes(&[RecordField::AuditReview]),
        TaskNode::new(OFFER, "Credit Offer", MAKE_CREDIT_OFFER)
            .with_writes(&[RecordField::CreditOffer]),
    ];

    let branches = BranchTable::new().with_edge(ConditionalEdge::new(
        AUDIT,
        OFFER,
        "offer_if_approved",
        offer_if_approved,
    ));

    WorkflowGraph::new(nodes, branches)
}
