use jolt_common::protocol::{SubmissionEvent, SubmissionKind};
use jolt_engine::classifier::SubmissionClassifier;
use serde_json::json;

fn final_event(success: bool) -> Option<SubmissionEvent> {
    Some(SubmissionEvent {
        kind: SubmissionKind::Final,
        success,
    })
}

#[test]
fn test_pending_state_never_yields_event() {
    let mut classifier = SubmissionClassifier::new();
    let body = json!({
        "state": "PENDING",
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Accepted",
        "submission_id": "1",
    });

    assert_eq!(classifier.classify(&body), None);
    assert_eq!(classifier.classify(&json!({"state": "STARTED"})), None);
    assert_eq!(classifier.seen_count(), 0);
}

#[test]
fn test_empty_state_counts_as_absent() {
    let mut classifier = SubmissionClassifier::new();
    for (id, state) in [json!(null), json!(""), json!(false), json!(0)].into_iter().enumerate() {
        let body = json!({
            "state": state,
            "task_name": "judger.judgetask.Judge",
            "status_msg": "Accepted",
            "submission_id": id,
        });
        assert_eq!(classifier.classify(&body), final_event(true), "state {}", state);
    }

    let body = json!({
        "state": true,
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Accepted",
        "submission_id": "other",
    });
    assert_eq!(classifier.classify(&body), None);
}

#[test]
fn test_accepted_final_twice_yields_one_event() {
    let mut classifier = SubmissionClassifier::new();
    let body = json!({
        "state": "SUCCESS",
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Accepted",
        "run_success": true,
        "submission_id": "1529384",
    });

    assert_eq!(classifier.classify(&body), final_event(true));
    assert_eq!(classifier.classify(&body), None);
}

#[test]
fn test_final_success_requires_accepted_status() {
    let mut classifier = SubmissionClassifier::new();
    let body = json!({
        "state": "SUCCESS",
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Wrong Answer",
        "run_success": true,
        "submission_id": "2",
    });

    assert_eq!(classifier.classify(&body), final_event(false));
}

#[test]
fn test_test_run_uses_run_success() {
    let mut classifier = SubmissionClassifier::new();

    let passed = classifier.classify(&json!({
        "task_name": "judger.runcodetask.RunCode",
        "run_success": true,
        "submission_id": "runcode_a",
    }));
    let missing_flag = classifier.classify(&json!({
        "task_name": "judger.runcodetask.RunCode",
        "submission_id": "runcode_b",
    }));

    assert_eq!(
        passed,
        Some(SubmissionEvent {
            kind: SubmissionKind::Test,
            success: true
        })
    );
    assert_eq!(
        missing_flag,
        Some(SubmissionEvent {
            kind: SubmissionKind::Test,
            success: false
        })
    );
}

#[test]
fn test_unknown_task_and_non_objects_are_ignored() {
    let mut classifier = SubmissionClassifier::new();

    assert_eq!(classifier.classify(&json!({"task_name": "judger.other"})), None);
    assert_eq!(classifier.classify(&json!({"state": "SUCCESS"})), None);
    assert_eq!(classifier.classify(&json!([1, 2, 3])), None);
    assert_eq!(classifier.classify(&json!("SUCCESS")), None);
}

#[test]
fn test_id_fallbacks() {
    let mut classifier = SubmissionClassifier::new();

    // Empty submission_id falls through to submissionId.
    let body = json!({
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Accepted",
        "submission_id": "",
        "submissionId": 77,
    });
    assert_eq!(classifier.classify(&body), final_event(true));
    let same_id = json!({
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Runtime Error",
        "submissionId": "77",
    });
    assert_eq!(classifier.classify(&same_id), None);

    let finished = json!({
        "task_name": "judger.judgetask.Judge",
        "status_msg": "Accepted",
        "task_finish_time": 1700000000000u64,
    });
    assert_eq!(classifier.classify_at(&finished, 1), final_event(true));
    assert_eq!(classifier.classify_at(&finished, 2), None);
}

#[test]
fn test_missing_finish_time_uses_clock() {
    let mut classifier = SubmissionClassifier::new();
    let body = json!({
        "task_name": "judger.runcodetask.RunCode",
        "run_success": false,
    });

    assert!(classifier.classify_at(&body, 1000).is_some());
    assert!(classifier.classify_at(&body, 1000).is_none());
    assert!(classifier.classify_at(&body, 1001).is_some());
}

#[test]
fn test_classify_text_ignores_malformed_bodies() {
    let mut classifier = SubmissionClassifier::new();

    assert_eq!(classifier.classify_text(""), None);
    assert_eq!(classifier.classify_text("   \n"), None);
    assert_eq!(classifier.classify_text("{\"state\":"), None);
    assert_eq!(
        classifier.classify_text(
            r#"{"state":"SUCCESS","task_name":"judger.judgetask.Judge","status_msg":"Accepted","submission_id":"9"}"#
        ),
        final_event(true)
    );
}
