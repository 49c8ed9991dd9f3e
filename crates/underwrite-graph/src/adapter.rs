use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::{validate_field, CapabilitySchema};
use underwrite_core::traits::CapabilityClient;
use underwrite_core::types::{ApplicantProfile, EvaluationRecord, RecordField};

use crate::node::TaskNode;
use crate::retry::{NoRetry, RetryPolicy};

/// Arguments extracted for one call, detached from the record.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub node_id: String,
    pub args: serde_json::Value,
    /// The applicant as it stood before the call, for nodes that rewrite it.
    pub applicant: Option<ApplicantProfile>,
}

/// Validated outputs of one node, ready to merge.
pub type NodeOutputs = Vec<(RecordField, serde_json::Value)>;

/// Binds a task node to its capability's declared contract.
pub struct NodeAdapter {
    node: TaskNode,
    schema: CapabilitySchema,
    timeout: Duration,
    retry: Arc<dyn RetryPolicy>,
}

impl NodeAdapter {
    /// Pair a node with the schema its capability declared.
    ///
    /// The declared outputs must be exactly the fields the node may write.
    pub fn new(node: TaskNode, schema: CapabilitySchema) -> Result<Self> {
        let declared: BTreeSet<RecordField> = schema.outputs.iter().copied().collect();
        let allowed: BTreeSet<RecordField> = node.writes.iter().copied().collect();
        if declared != allowed {
            return Err(UnderwriteError::SchemaViolation {
                node: node.id.clone(),
                message: format!(
                    "capability '{}' declares outputs {:?}, node writes {:?}",
                    schema.name, declared, allowed
                ),
            });
        }
        Ok(Self {
            node,
            schema,
            timeout: Duration::from_secs(30),
            retry: Arc::new(NoRetry),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn node(&self) -> &TaskNode {
        &self.node
    }

    /// Read the declared inputs from the record.
    pub fn prepare(&self, record: &EvaluationRecord) -> Result<PreparedCall> {
        let mut args = serde_json::Map::new();
        for field in &self.schema.inputs {
            let value = record.get(*field).ok_or_else(|| UnderwriteError::InputMissing {
                node: self.node.id.clone(),
                field: field.to_string(),
            })?;
            args.insert(field.as_str().to_string(), value);
        }
        for field in &self.schema.optional_inputs {
            if let Some(value) = record.get(*field) {
                args.insert(field.as_str().to_string(), value);
            }
        }
        let applicant = self
            .node
            .writes
            .contains(&RecordField::Applicant)
            .then(|| record.applicant.clone());
        Ok(PreparedCall {
            node_id: self.node.id.clone(),
            args: serde_json::Value::Object(args),
            applicant,
        })
    }

    /// Call the capability and validate its response.
    pub async fn invoke(
        &self,
        call: PreparedCall,
        client: &dyn CapabilityClient,
    ) -> Result<NodeOutputs> {
        let capability = self.node.capability.as_str();
        let mut attempt = 0;
        let response = loop {
            match client.call(capability, call.args.clone(), self.timeout).await {
                Ok(value) => break value,
                Err(e) => match self.retry.next_backoff(capability, attempt, &e) {
                    Some(backoff) => {
                        warn!(
                            node_id = %self.node.id,
                            capability,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying capability call"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        };
        self.validate(&call, response)
    }

    /// `prepare` followed by `invoke`.
    pub async fn run(
        &self,
        record: &EvaluationRecord,
        client: &dyn CapabilityClient,
    ) -> Result<NodeOutputs> {
        let call = self.prepare(record)?;
        self.invoke(call, client).await
    }

    fn validate(&self, call: &PreparedCall, response: serde_json::Value) -> Result<NodeOutputs> {
        let violation = |message: String| UnderwriteError::SchemaViolation {
            node: self.node.id.clone(),
            message,
        };

        let map = match response {
            serde_json::Value::Object(map) => map,
            other => return Err(violation(format!("expected an object, got {}", other))),
        };

        let mut outputs = Vec::with_capacity(map.len());
        for (key, value) in map {
            let field = RecordField::from_name(&key)
                .filter(|f| self.node.writes.contains(f))
                .ok_or_else(|| violation(format!("field '{}' is not writable by this node", key)))?;
            validate_field(field, &value).map_err(violation)?;
            if let (RecordField::Applicant, Some(before)) = (field, &call.applicant) {
                check_applicant_unchanged(before, &value).map_err(violation)?;
            }
            outputs.push((field, value));
        }

        for field in &self.node.writes {
            if !outputs.iter().any(|(f, _)| f == field) {
                return Err(violation(format!("missing output field '{}'", field)));
            }
        }

        debug!(node_id = %self.node.id, fields = outputs.len(), "Outputs validated");
        Ok(outputs)
    }
}

/// A rewritten applicant may only add `debt_to_income_ratio`.
fn check_applicant_unchanged(
    before: &ApplicantProfile,
    after: &serde_json::Value,
) -> std::result::Result<(), String> {
    let mut after: ApplicantProfile = serde_json::from_value(after.clone())
        .map_err(|e| format!("applicant is malformed: {e}"))?;
    after.debt_to_income_ratio = before.debt_to_income_ratio;
    if after != *before {
        return Err("applicant fields other than debt_to_income_ratio were modified".into());
    }
    Ok(())
}
