use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::json;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{standard_capabilities, standard_contract, CapabilitySchema};
use underwrite_core::traits::CapabilityClient;

use crate::fixtures::normalized_applicant_json;

/// What a stubbed capability does when called.
#[derive(Clone)]
pub enum StubBehavior {
    /// Return this object.
    Fixed(serde_json::Value),
    /// Return this object after a delay.
    Delayed(Duration, serde_json::Value),
    /// Fail with a worker-side error of this kind.
    Fail(String),
    /// Never answer; the call ends in `RpcTimeout` once the caller's timeout passes.
    Hang,
    /// Fail as if the worker process died.
    Crash,
    /// Fail with `RpcTimeout` this many times, then return the object.
    Flaky(u32, serde_json::Value),
}

/// One observed call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub capability: String,
    pub args: serde_json::Value,
    pub started: Instant,
    pub finished: Instant,
}

/// In-memory `CapabilityClient` with scripted behaviours and a call log.
#[derive(Clone, Default)]
pub struct StubClient {
    schemas: HashMap<String, CapabilitySchema>,
    behaviors: Arc<Mutex<HashMap<String, StubBehavior>>>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every standard capability, answering with the reference values
    /// (fraud 20, market 65, so the decision is APPROVED).
    pub fn underwriting() -> Self {
        let mut stub = Self::new();
        for name in standard_capabilities() {
            let Some(schema) = standard_contract(name) else {
                continue;
            };
            let output = reference_output(name);
            stub = stub.with_capability(schema, StubBehavior::Fixed(output));
        }
        stub
    }

    pub fn with_capability(mut self, schema: CapabilitySchema, behavior: StubBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(schema.name.clone(), behavior);
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    /// Remove a capability so it resolves as unknown.
    pub fn without(mut self, capability: &str) -> Self {
        self.schemas.remove(capability);
        self.behaviors.lock().unwrap().remove(capability);
        self
    }

    /// Replace the behaviour of an already registered capability.
    pub fn set_behavior(&self, capability: &str, behavior: StubBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(capability.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, capability: &str) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|c| c.capability == capability)
            .collect()
    }

    pub fn call_count(&self, capability: &str) -> usize {
        self.calls_to(capability).len()
    }
}

/// Output of each standard capability for the reference applicant.
pub fn reference_output(capability: &str) -> serde_json::Value {
    match capability {
        "normalize_application" => json!({ "applicant": normalized_applicant_json() }),
        "estimate_creditworthiness" => json!({ "creditworthiness_score": 73.92 }),
        "evaluate_fraud_risk" => json!({ "fraud_risk_score": 20.0 }),
        "assess_income_stability" => json!({ "income_stability_score": 80.0 }),
        "fetch_macro_risk" => json!({ "market_conditions_score": 65.0 }),
        "make_decision" => json!({ "decision": "APPROVED" }),
        "generate_explanation" => json!({ "explanation": "Alice Johnson has been approved." }),
        "audit_credit_decision" => json!({ "audit_review": "No issues found." }),
        "make_credit_offer" => json!({
            "credit_offer": { "interest_rate": 0.0556, "tenure": 60, "credit_limit": 17500.0 }
        }),
        _ => json!({}),
    }
}

impl CapabilityClient for StubClient {
    fn schema(&self, capability: &str) -> Option<CapabilitySchema> {
        self.schemas.get(capability).cloned()
    }

    fn call(
        &self,
        capability: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let capability = capability.to_string();
        Box::pin(async move {
            let started = Instant::now();
            let behavior = self.behaviors.lock().unwrap().get(&capability).cloned();

            let result = match behavior {
                None => Err(UnderwriteError::UnknownCapability(capability.clone())),
                Some(StubBehavior::Fixed(value)) => Ok(value),
                Some(StubBehavior::Delayed(delay, value)) => {
                    if delay > timeout {
                        tokio::time::sleep(timeout).await;
                        Err(timeout_error(&capability, timeout))
                    } else {
                        tokio::time::sleep(delay).await;
                        Ok(value)
                    }
                }
                Some(StubBehavior::Fail(kind)) => Err(UnderwriteError::RpcExecution {
                    capability: capability.clone(),
                    kind,
                    message: "stubbed failure".into(),
                }),
                Some(StubBehavior::Hang) => {
                    tokio::time::sleep(timeout).await;
                    Err(timeout_error(&capability, timeout))
                }
                Some(StubBehavior::Crash) => {
                    Err(UnderwriteError::ChannelClosed(format!("{}-worker", capability)))
                }
                Some(StubBehavior::Flaky(remaining, value)) => {
                    if remaining == 0 {
                        Ok(value)
                    } else {
                        self.set_behavior(&capability, StubBehavior::Flaky(remaining - 1, value));
                        Err(timeout_error(&capability, timeout))
                    }
                }
            };

            self.calls.lock().unwrap().push(CallRecord {
                capability,
                args,
                started,
                finished: Instant::now(),
            });
            result
        })
    }
}

fn timeout_error(capability: &str, timeout: Duration) -> UnderwriteError {
    UnderwriteError::RpcTimeout {
        capability: capability.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}
