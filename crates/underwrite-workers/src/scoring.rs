//! Pure scoring formulas. All scores are on a 0-100 scale with two decimals.

use underwrite_core::types::{ApplicantProfile, Decision, EmploymentStatus};

/// Smallest score a built-in capability reports. Record scores live in (0, 100].
pub const MIN_SCORE: f64 = 0.01;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn clamp_score(value: f64) -> f64 {
    round2(value).clamp(MIN_SCORE, 100.0)
}

/// Debt over income, with income floored at 1.0.
pub fn debt_to_income_ratio(total_debt: f64, annual_income: f64) -> f64 {
    total_debt / annual_income.max(1.0)
}

/// Employed or self-employed for at least two years.
pub fn has_stable_employment(status: EmploymentStatus, years: u32) -> bool {
    status.has_income() && years >= 2
}

pub fn creditworthiness(applicant: &ApplicantProfile) -> f64 {
    let dti = applicant
        .debt_to_income_ratio
        .unwrap_or_else(|| debt_to_income_ratio(applicant.total_debt, applicant.annual_income));
    let stable = if has_stable_employment(applicant.employment_status, applicant.employment_years) {
        1.0
    } else {
        0.0
    };

    let mut score = (f64::from(applicant.credit_score) / 850.0 * 0.4
        + (1.0 - dti).max(0.0) * 0.3
        + f64::from(applicant.credit_history_length.min(30)) / 30.0 * 0.2
        + stable * 0.1)
        * 100.0;

    if applicant.age < 25 {
        score *= 0.95;
    } else if applicant.age > 65 {
        score *= 0.97;
    }
    clamp_score(score)
}

pub fn income_stability(status: EmploymentStatus, years: u32) -> f64 {
    let earning = if status.has_income() { 1.0 } else { 0.0 };
    clamp_score((earning * 0.6 + f64::from(years.min(10)) / 10.0 * 0.4) * 100.0)
}

/// The four scores a decision is made from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScores {
    pub creditworthiness: f64,
    pub fraud_risk: f64,
    pub income_stability: f64,
    /// Missing market data counts as zero.
    pub market_conditions: Option<f64>,
}

impl RiskScores {
    /// Weighted aggregate. Bands apply to the unrounded value.
    pub fn aggregate(&self) -> f64 {
        self.creditworthiness * 0.4
            + (100.0 - self.fraud_risk) * 0.3
            + self.income_stability * 0.2
            + self.market_conditions.unwrap_or(0.0) * 0.1
    }

    pub fn decision(&self) -> Decision {
        Decision::from_aggregate(self.aggregate())
    }
}

/// Risk-adjusted offer terms for an approved applicant.
pub struct OfferTerms {
    pub interest_rate: f64,
    pub tenure: u32,
    pub credit_limit: f64,
}

/// Rate rises from 4% toward 10% as creditworthiness falls; tenure follows
/// income stability; the limit is a quarter of income scaled by spare capacity.
pub fn offer_terms(applicant: &ApplicantProfile, scores: &RiskScores) -> OfferTerms {
    let interest_rate = (0.04 + 0.0006 * (100.0 - scores.creditworthiness)).clamp(0.01, 0.1);
    let interest_rate = (interest_rate * 10_000.0).round() / 10_000.0;

    let tenure = if scores.income_stability >= 70.0 {
        60
    } else if scores.income_stability >= 40.0 {
        36
    } else {
        24
    };

    let dti = applicant
        .debt_to_income_ratio
        .unwrap_or_else(|| debt_to_income_ratio(applicant.total_debt, applicant.annual_income));
    let capacity = (1.0 - dti).clamp(0.1, 1.0);
    let credit_limit = round2((applicant.annual_income * 0.25 * capacity).max(500.0));

    OfferTerms {
        interest_rate,
        tenure,
        credit_limit,
    }
}
