use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use underwrite_core::event::{EventBus, RunEvent};
use underwrite_core::types::Decision;
use underwrite_graph::pipeline::{DECISION, INTAKE, OFFER, SCORERS};
use underwrite_graph::{credit_underwriting_graph, GraphExecutor, NodeStatus, RunOutcome};
use underwrite_test_utils::{
    normalized_applicant_json, reference_output, sample_applicant, StubBehavior, StubClient,
};

fn executor() -> GraphExecutor {
    GraphExecutor::new(credit_underwriting_graph().unwrap())
}

fn capability_of(node: &str) -> String {
    credit_underwriting_graph()
        .unwrap()
        .node(node)
        .unwrap()
        .capability
        .clone()
}

#[tokio::test]
async fn test_approved_run_produces_offer() {
    let client = StubClient::underwriting();
    let report = executor().run(&client, sample_applicant()).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.record.decision, Some(Decision::Approved));
    let offer = report.record.credit_offer.as_ref().unwrap();
    assert_eq!(offer.tenure, 60);
    assert!(report.record.applicant.debt_to_income_ratio.is_some());
    assert!(report.nodes.iter().all(|n| n.status == NodeStatus::Completed));

    // Intake first, offer last, exactly one call each.
    let calls = client.calls();
    assert_eq!(calls.len(), 9);
    assert_eq!(calls.first().unwrap().capability, "normalize_application");
    assert_eq!(calls.last().unwrap().capability, "make_credit_offer");
}

#[tokio::test]
async fn test_scorers_run_concurrently_after_intake() {
    let client = StubClient::underwriting();
    for scorer in SCORERS {
        let capability = capability_of(scorer);
        client.set_behavior(
            &capability,
            StubBehavior::Delayed(Duration::from_millis(200), reference_output(&capability)),
        );
    }

    let report = executor().run(&client, sample_applicant()).await.unwrap();
    assert!(report.succeeded());

    let intake = &client.calls_to(&capability_of(INTAKE))[0];
    let scorer_calls: Vec<_> = SCORERS
        .iter()
        .map(|s| client.calls_to(&capability_of(s))[0].clone())
        .collect();
    for a in &scorer_calls {
        assert!(a.started >= intake.finished);
        for b in &scorer_calls {
            assert!(a.started < b.finished, "{} did not overlap {}", a.capability, b.capability);
        }
    }

    let decision = &client.calls_to(&capability_of(DECISION))[0];
    for scorer in &scorer_calls {
        assert!(decision.started >= scorer.finished);
    }
    // The decision saw every score.
    assert_eq!(decision.args["market_conditions_score"], json!(65.0));
}

#[tokio::test]
async fn test_offer_skipped_unless_approved() {
    for decision in ["SUBJECT_TO_REVIEW", "REJECTED"] {
        let client = StubClient::underwriting();
        client.set_behavior("make_decision", StubBehavior::Fixed(json!({ "decision": decision })));

        let report = executor().run(&client, sample_applicant()).await.unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Completed {
                optional_failures: vec![]
            }
        );
        assert_eq!(report.status(OFFER), Some(NodeStatus::Skipped));
        assert!(report.record.credit_offer.is_none());
        assert_eq!(client.call_count("make_credit_offer"), 0);
    }
}

#[tokio::test]
async fn test_offer_worker_crash_keeps_decision() {
    let client = StubClient::underwriting();
    client.set_behavior("make_credit_offer", StubBehavior::Crash);

    let report = executor().run(&client, sample_applicant()).await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            optional_failures: vec![OFFER.to_string()]
        }
    );
    assert_eq!(report.record.decision, Some(Decision::Approved));
    assert_eq!(report.record.creditworthiness_score, Some(73.92));
    assert!(report.record.audit_review.is_some());
    assert!(report.record.credit_offer.is_none());
    let error = report.node(OFFER).unwrap().error.as_ref().unwrap();
    assert_eq!(error.kind, "ChannelClosed");
}

#[tokio::test]
async fn test_scorer_failure_fails_run_without_cancelling_siblings() {
    let client = StubClient::underwriting();
    client.set_behavior("evaluate_fraud_risk", StubBehavior::Fail("ModelUnavailable".into()));
    client.set_behavior(
        "fetch_macro_risk",
        StubBehavior::Delayed(Duration::from_millis(100), reference_output("fetch_macro_risk")),
    );

    let report = executor().run(&client, sample_applicant()).await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { node, kind, .. } => {
            assert_eq!(node, "fraud");
            assert_eq!(kind, "RPCExecutionError");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // The slower sibling was allowed to finish and its score was kept.
    assert_eq!(report.status("macro"), Some(NodeStatus::Completed));
    assert_eq!(report.record.market_conditions_score, Some(65.0));
    for downstream in [DECISION, "explanation", "audit", OFFER] {
        assert_eq!(report.status(downstream), Some(NodeStatus::Skipped));
    }
    assert!(report.record.decision.is_none());
    assert_eq!(client.call_count("make_decision"), 0);
}

#[tokio::test]
async fn test_malformed_decision_is_a_schema_violation() {
    let client = StubClient::underwriting();
    client.set_behavior("make_decision", StubBehavior::Fixed(json!({ "decision": "MAYBE" })));

    let report = executor().run(&client, sample_applicant()).await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { node, kind, .. } => {
            assert_eq!(node, DECISION);
            assert_eq!(kind, "SchemaViolation");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(report.record.decision.is_none());
}

#[tokio::test]
async fn test_events_cover_every_node() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let client = StubClient::underwriting();
    client.set_behavior("make_decision", StubBehavior::Fixed(json!({ "decision": "REJECTED" })));

    executor()
        .with_events(bus)
        .run(&client, sample_applicant())
        .await
        .unwrap();

    let mut completed = 0;
    let mut skipped = vec![];
    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::NodeCompleted { .. } => completed += 1,
            RunEvent::NodeSkipped { node_id, .. } => skipped.push(node_id),
            RunEvent::RunFinished { succeeded, .. } => finished = Some(succeeded),
            _ => {}
        }
    }
    assert_eq!(completed, 8);
    assert_eq!(skipped, vec![OFFER.to_string()]);
    assert_eq!(finished, Some(true));
}

#[tokio::test]
async fn test_scores_land_in_their_own_fields_whatever_the_finish_order() {
    let delays = [5u64, 15, 25, 40];
    for run in 0..24 {
        let client = StubClient::underwriting();
        for (i, scorer) in SCORERS.iter().enumerate() {
            let capability = capability_of(scorer);
            let delay = delays[(i + run) % delays.len()] + (run as u64 % 3);
            client.set_behavior(
                &capability,
                StubBehavior::Delayed(Duration::from_millis(delay), reference_output(&capability)),
            );
        }

        let report = executor().run(&client, sample_applicant()).await.unwrap();
        assert!(report.succeeded(), "run {run}: {:?}", report.outcome);
        let record = &report.record;
        assert_eq!(record.creditworthiness_score, Some(73.92), "run {run}");
        assert_eq!(record.fraud_risk_score, Some(20.0), "run {run}");
        assert_eq!(record.income_stability_score, Some(80.0), "run {run}");
        assert_eq!(record.market_conditions_score, Some(65.0), "run {run}");
        assert_eq!(record.decision, Some(Decision::Approved), "run {run}");
    }
}

#[tokio::test]
async fn test_intake_rewriting_the_applicant_fails_the_run() {
    let client = StubClient::underwriting();
    let mut tampered = normalized_applicant_json();
    tampered["credit_score"] = json!(850);
    tampered["name"] = json!("Someone Else");
    client.set_behavior(
        "normalize_application",
        StubBehavior::Fixed(json!({ "applicant": tampered })),
    );

    let report = executor().run(&client, sample_applicant()).await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { node, kind, .. } => {
            assert_eq!(node, INTAKE);
            assert_eq!(kind, "SchemaViolation");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.record.applicant, sample_applicant());
    assert_eq!(client.calls().len(), 1);
}
