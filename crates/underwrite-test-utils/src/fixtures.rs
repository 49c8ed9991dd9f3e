use serde_json::json;

use underwrite_core::types::{ApplicantProfile, EvaluationRecord};

/// The reference applicant as submitted.
pub fn sample_applicant_json() -> serde_json::Value {
    json!({
        "name": "Alice Johnson",
        "age": 32,
        "location": "Canada",
        "annual_income": 85000.0,
        "total_debt": 15000.0,
        "credit_score": 720,
        "credit_history_length": 8,
        "employment_status": "employed",
        "employment_years": 5
    })
}

pub fn sample_applicant() -> ApplicantProfile {
    ApplicantProfile::from_json(sample_applicant_json()).expect("valid fixture")
}

/// The reference applicant after intake.
pub fn normalized_applicant_json() -> serde_json::Value {
    let mut applicant = sample_applicant_json();
    applicant["debt_to_income_ratio"] = json!(15000.0 / 85000.0);
    applicant
}

pub fn sample_record() -> EvaluationRecord {
    EvaluationRecord::new(sample_applicant())
}
