//! Integration tests driving submissions through the pipeline against the
//! in-memory store, backend and registry.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use seqflow_backend::{
  BackendError, BackendOp, CollectionElement, CollectionKind, ExecutionBackend, RunStatus,
};
use seqflow_config::{CleanupPolicy, EngineConfig, SampleUpdaterConfig};
use seqflow_model::{
  AnalysisSubmission, AnalysisType, AuthContext, CleanupState, NamedParameterSet,
  ParameterSource, ReferenceFile, SubmissionState,
};
use seqflow_pipeline::{
  PipelineEvent, SampleUpdaterRegistry, StageError, TabularMetadataUpdater, ValidationError,
};
use seqflow_store::Store;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{ASSEMBLY, ASSEMBLY_REMOTE, Harness, PHYLO, PHYLO_REMOTE, ad_hoc, assembly_workflow};

fn alice() -> AuthContext {
  AuthContext::new("alice")
}

#[tokio::test]
async fn test_end_to_end_single_end_batch() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let b = h.single_end("sample-b").await;
  let id = h
    .submit(AnalysisSubmission::new("two samples", ASSEMBLY, "alice").with_single_end([&a, &b]))
    .await;

  let dispatched = h.scheduler().tick().await;
  assert!(dispatched >= 4);

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Completed);
  assert_eq!(submission.cleanup_state, CleanupState::Cleaned);

  let analysis = h
    .store
    .get_analysis(submission.analysis_id.as_deref().unwrap())
    .await
    .unwrap();
  assert_eq!(analysis.outputs.len(), assembly_workflow().outputs.len());
  assert_eq!(analysis.analysis_type, AnalysisType::new("assembly"));

  let contigs = analysis.output("contigs").unwrap();
  assert_eq!(contigs.file_name, "contigs.fasta");
  assert!(contigs.path.starts_with(h.work_dir.path().join("analyses").join(&id)));
  assert_eq!(std::fs::read_to_string(&contigs.path).unwrap(), ">c1\nACGT\n");

  // Output -> tool -> upload, and both outputs share the upload node.
  let lineage = analysis.provenance.lineage(&contigs.tool_execution_id);
  assert_eq!(lineage.len(), 2);
  assert!(lineage[1].input_tool);
  assert_eq!(analysis.provenance.len(), 3);

  let collections = h.backend.collections().await;
  assert_eq!(collections.len(), 1);
  let (kind, elements) = &collections[0];
  assert_eq!(*kind, CollectionKind::List);
  let names: BTreeSet<_> = elements.iter().map(|e| e.name().to_string()).collect();
  assert_eq!(names, BTreeSet::from(["sample-a".to_string(), "sample-b".to_string()]));

  let invocation = &h.backend.invocations().await[0];
  assert_eq!(invocation.parameters.get("kmer"), Some(&json!(21)));
  assert!(invocation.inputs.contains_key("sequence_reads_single"));

  assert!(h.backend.live_workspaces().await.is_empty());
  assert_eq!(h.backend.deleted_workspaces().await.len(), 1);
}

#[tokio::test]
async fn test_observed_states_follow_the_lifecycle() {
  let mut h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("one", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.scheduler().tick().await;

  let transitions = h.transitions(&id);
  assert_eq!(
    transitions,
    vec![
      (SubmissionState::New, SubmissionState::Preparing),
      (SubmissionState::Preparing, SubmissionState::Submitted),
      (SubmissionState::Submitted, SubmissionState::Running),
      (SubmissionState::Running, SubmissionState::FinishedRunning),
      (SubmissionState::FinishedRunning, SubmissionState::Completing),
      (SubmissionState::Completing, SubmissionState::Completed),
    ]
  );
  for (from, to) in &transitions {
    assert!(from.can_transition_to(*to), "{from} -> {to}");
  }
}

#[tokio::test]
async fn test_waiting_spans_ticks() {
  let h = Harness::new().await;
  h.backend
    .script_status(
      ASSEMBLY_REMOTE,
      vec![
        RunStatus::new("queued").with_items("queued", &["j1", "j2"]),
        RunStatus::new("running")
          .with_items("ok", &["j1"])
          .with_items("running", &["j2"]),
        RunStatus::new("ok").with_items("ok", &["j1", "j2"]),
      ],
    )
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("slow", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let scheduler = h.scheduler();

  scheduler.tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Running);
  scheduler.tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Running);
  scheduler.tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Completed);
  assert_eq!(h.backend.calls(BackendOp::Status).await, 3);
}

#[tokio::test]
async fn test_progress_is_reported() {
  let mut h = Harness::new().await;
  h.backend
    .script_status(
      ASSEMBLY_REMOTE,
      vec![
        RunStatus::new("running")
          .with_items("ok", &["j1"])
          .with_items("running", &["j2", "j3", "j4"]),
      ],
    )
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("p", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.scheduler().tick().await;

  let progress: Vec<f64> = h
    .drain_events()
    .into_iter()
    .filter_map(|e| match e {
      PipelineEvent::Progress {
        submission_id,
        progress,
      } if submission_id == id => Some(progress),
      _ => None,
    })
    .collect();
  assert_eq!(progress, vec![0.25]);
}

#[tokio::test]
async fn test_missing_reference_stays_new() {
  let mut h = Harness::new().await;
  let a = h.paired_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("no ref", PHYLO, "alice").with_paired_end([&a]))
    .await;

  let err = h.pipeline.prepare(&alice(), &id).await.unwrap_err();
  assert!(matches!(
    err,
    StageError::Validation(ValidationError::MissingReference { .. })
  ));

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::New);
  assert!(submission.last_error.unwrap().contains(PHYLO));
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 0);
  assert!(
    h.drain_events()
      .iter()
      .any(|e| matches!(e, PipelineEvent::ValidationFailed { .. }))
  );

  // Held submissions are not picked up again.
  assert_eq!(h.scheduler().tick().await, 0);
}

#[tokio::test]
async fn test_held_submissions_do_not_block_new_ones() {
  let h = Harness::with_config(EngineConfig {
    batch_size: 1,
    ..EngineConfig::default()
  })
  .await;
  let p = h.paired_end("sample-p").await;
  let held = h
    .submit(AnalysisSubmission::new("no ref", PHYLO, "alice").with_paired_end([&p]))
    .await;
  let scheduler = h.scheduler();
  scheduler.tick().await;
  assert!(h.submission(&held).await.last_error.is_some());

  let a = h.single_end("sample-a").await;
  let good = h
    .submit(AnalysisSubmission::new("good", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  scheduler.tick().await;

  assert_eq!(h.state(&good).await, SubmissionState::Completed);
  assert_eq!(h.state(&held).await, SubmissionState::New);
}

#[tokio::test]
async fn test_cancelled_submissions_do_not_block_new_ones() {
  let h = Harness::with_config(EngineConfig {
    batch_size: 1,
    ..EngineConfig::default()
  })
  .await;
  let c = h.single_end("sample-c").await;
  let cancelled = h
    .submit(AnalysisSubmission::new("cancelled", ASSEMBLY, "alice").with_single_end([&c]))
    .await;
  h.store.request_cancellation(&cancelled).await.unwrap();

  let a = h.single_end("sample-a").await;
  let good = h
    .submit(AnalysisSubmission::new("good", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  h.scheduler().tick().await;

  assert_eq!(h.state(&good).await, SubmissionState::Completed);
  assert_eq!(h.state(&cancelled).await, SubmissionState::New);
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 1);
}

#[tokio::test]
async fn test_duplicate_sample_rejected_before_workspace() {
  let h = Harness::new().await;
  let a1 = h.single_end("sample-a").await;
  let a2 = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("dup", ASSEMBLY, "alice").with_single_end([&a1, &a2]))
    .await;

  let err = h.pipeline.prepare(&alice(), &id).await.unwrap_err();
  assert!(matches!(
    err,
    StageError::Validation(ValidationError::DuplicateSample { ref sample_id }) if sample_id == "sample-a"
  ));
  assert_eq!(h.state(&id).await, SubmissionState::New);
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 0);
}

#[tokio::test]
async fn test_unsupported_input_kind_rejected() {
  let h = Harness::new().await;
  let a = h.paired_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("paired", ASSEMBLY, "alice").with_paired_end([&a]))
    .await;

  let err = h.pipeline.prepare(&alice(), &id).await.unwrap_err();
  assert!(matches!(
    err,
    StageError::Validation(ValidationError::UnsupportedInput { .. })
  ));
}

#[tokio::test]
async fn test_unknown_parameter_rejected() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(
      AnalysisSubmission::new("params", ASSEMBLY, "alice")
        .with_single_end([&a])
        .with_parameters(ParameterSource::AdHoc {
          values: ad_hoc(&[("kmer", json!(33)), ("colour", json!("red"))]),
        }),
    )
    .await;

  let err = h.pipeline.prepare(&alice(), &id).await.unwrap_err();
  assert!(matches!(
    err,
    StageError::Validation(ValidationError::UnknownParameter { ref name, .. }) if name == "colour"
  ));
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 0);
}

#[tokio::test]
async fn test_ad_hoc_parameters_overlay_defaults() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(
      AnalysisSubmission::new("params", ASSEMBLY, "alice")
        .with_single_end([&a])
        .with_parameters(ParameterSource::AdHoc {
          values: ad_hoc(&[("kmer", json!(33))]),
        }),
    )
    .await;

  h.pipeline.prepare(&alice(), &id).await.unwrap();

  let invocation = &h.backend.invocations().await[0];
  assert_eq!(invocation.parameters.get("kmer"), Some(&json!(33)));
  assert_eq!(invocation.parameters.get("min_contig_length"), Some(&json!(1000)));
}

#[tokio::test]
async fn test_named_parameter_set_used_verbatim() {
  let h = Harness::new().await;
  let set = NamedParameterSet::new("strict", ASSEMBLY, ad_hoc(&[("kmer", json!(55))]));
  h.store.create_parameter_set(&set).await.unwrap();
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(
      AnalysisSubmission::new("named", ASSEMBLY, "alice")
        .with_single_end([&a])
        .with_parameters(ParameterSource::Named {
          parameter_set_id: set.parameter_set_id.clone(),
        }),
    )
    .await;

  h.pipeline.prepare(&alice(), &id).await.unwrap();

  let invocation = &h.backend.invocations().await[0];
  assert_eq!(invocation.parameters, set.values);
  assert_eq!(h.state(&id).await, SubmissionState::Submitted);
}

#[tokio::test]
async fn test_paired_end_with_reference() {
  let h = Harness::new().await;
  let a = h.paired_end("sample-a").await;
  let b = h.paired_end("sample-b").await;
  let reference = ReferenceFile::new("/data/ref.fasta");
  h.store.create_reference_file(&reference).await.unwrap();
  let id = h
    .submit(
      AnalysisSubmission::new("phylo", PHYLO, "alice")
        .with_paired_end([&a, &b])
        .with_reference(&reference.reference_id),
    )
    .await;

  h.scheduler().tick().await;

  assert_eq!(h.state(&id).await, SubmissionState::Completed);
  let collections = h.backend.collections().await;
  assert_eq!(collections.len(), 1);
  assert_eq!(collections[0].0, CollectionKind::ListPaired);
  assert!(
    collections[0]
      .1
      .iter()
      .all(|e| matches!(e, CollectionElement::Pair { .. }))
  );

  // Four reads plus the reference.
  assert_eq!(h.backend.calls(BackendOp::Upload).await, 5);
  let invocation = &h.backend.invocations().await[0];
  assert_eq!(invocation.remote_workflow_id, PHYLO_REMOTE);
  assert!(invocation.inputs.contains_key("reference"));
  assert!(invocation.inputs.contains_key("sequence_reads_paired"));
}

#[tokio::test]
async fn test_backend_error_while_running_fails_verbatim() {
  let h = Harness::new().await;
  h.backend
    .script_status(
      ASSEMBLY_REMOTE,
      vec![
        RunStatus::new("running"),
        RunStatus::new("error").with_message("spades: out of memory on job 42"),
      ],
    )
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("oom", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let scheduler = h.scheduler();

  scheduler.tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Running);

  scheduler.tick().await;
  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Error);
  assert_eq!(
    submission.last_error.as_deref(),
    Some("spades: out of memory on job 42")
  );
  assert_eq!(submission.cleanup_state, CleanupState::Cleaned);
  assert!(h.backend.live_workspaces().await.is_empty());
}

#[tokio::test]
async fn test_transient_upload_failure_leaves_new_and_compensates() {
  let h = Harness::new().await;
  h.backend
    .fail_next(BackendOp::Upload, BackendError::transient("503 Service Unavailable"))
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("flaky", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  let err = h.pipeline.prepare(&alice(), &id).await.unwrap_err();
  assert!(matches!(err, StageError::TransientBackend { .. }));

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::New);
  assert!(submission.last_error.is_none());
  assert!(submission.remote_workspace_id.is_none());
  assert!(h.backend.live_workspaces().await.is_empty());
  assert_eq!(h.backend.deleted_workspaces().await.len(), 1);

  // The next tick retries from scratch.
  h.scheduler().tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Completed);
}

#[tokio::test]
async fn test_rejected_workspace_fails_submission() {
  let h = Harness::new().await;
  h.backend
    .fail_next(BackendOp::CreateWorkspace, BackendError::rejected("quota exceeded"))
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("quota", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  assert!(h.pipeline.prepare(&alice(), &id).await.is_err());

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Error);
  assert_eq!(
    submission.last_error.as_deref(),
    Some("backend rejected request: quota exceeded")
  );
}

#[tokio::test]
async fn test_transient_invoke_retried_from_preparing() {
  let h = Harness::new().await;
  h.backend
    .fail_next(BackendOp::Invoke, BackendError::transient("timeout"))
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("retry", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  assert!(h.pipeline.prepare(&alice(), &id).await.is_err());
  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Preparing);
  assert!(submission.remote_workspace_id.is_some());
  assert_eq!(submission.compensations.len(), 1);

  h.scheduler().tick().await;
  assert_eq!(h.state(&id).await, SubmissionState::Completed);
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 1);
  assert_eq!(h.backend.calls(BackendOp::Invoke).await, 2);
}

#[tokio::test]
async fn test_unrecorded_run_is_not_invoked_again() {
  let h = Harness::new().await;
  h.store.fail_next_transition(SubmissionState::Submitted).await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("lost run", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let scheduler = h.scheduler();

  scheduler.tick().await;
  scheduler.tick().await;

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Error);
  assert!(submission.remote_run_id.is_none());
  assert!(
    submission
      .last_error
      .unwrap()
      .contains("started but not recorded")
  );
  assert_eq!(h.backend.calls(BackendOp::Invoke).await, 1);
  assert_eq!(submission.cleanup_state, CleanupState::Cleaned);
  assert!(h.backend.live_workspaces().await.is_empty());
}

#[tokio::test]
async fn test_monitor_batch_spans_submitted_and_running() {
  let h = Harness::with_config(EngineConfig {
    batch_size: 1,
    ..EngineConfig::default()
  })
  .await;
  h.backend
    .script_status(ASSEMBLY_REMOTE, vec![RunStatus::new("running")])
    .await;
  let a = h.single_end("sample-a").await;
  let b = h.single_end("sample-b").await;
  let first = h
    .submit(AnalysisSubmission::new("first", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let second = h
    .submit(AnalysisSubmission::new("second", ASSEMBLY, "alice").with_single_end([&b]))
    .await;
  let auth = alice();
  h.pipeline.prepare(&auth, &first).await.unwrap();
  h.pipeline.prepare(&auth, &second).await.unwrap();
  h.pipeline.monitor(&auth, &first).await.unwrap();
  assert_eq!(h.state(&first).await, SubmissionState::Running);
  assert_eq!(h.state(&second).await, SubmissionState::Submitted);

  assert_eq!(h.scheduler().tick().await, 1);
  assert_eq!(h.backend.calls(BackendOp::Status).await, 2);
}

#[tokio::test]
async fn test_cleanup_is_idempotent_with_absent_workspace() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("cleanup", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let auth = alice();

  h.pipeline.prepare(&auth, &id).await.unwrap();
  h.pipeline.monitor(&auth, &id).await.unwrap();
  h.pipeline.transfer(&auth, &id).await.unwrap();
  assert_eq!(h.state(&id).await, SubmissionState::Completed);

  // Someone removed the workspace out of band.
  let workspace_id = h.submission(&id).await.remote_workspace_id.unwrap();
  h.backend.delete_workspace(&workspace_id).await.unwrap();

  h.pipeline.cleanup(&auth, &id).await.unwrap();
  h.pipeline.cleanup(&auth, &id).await.unwrap();

  let submission = h.submission(&id).await;
  assert_eq!(submission.cleanup_state, CleanupState::Cleaned);
  assert_eq!(submission.state, SubmissionState::Completed);
  assert_eq!(h.backend.calls(BackendOp::DeleteWorkspace).await, 2);
}

#[tokio::test]
async fn test_failed_compensation_marks_cleaning_error() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("stuck", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let auth = alice();
  h.pipeline.prepare(&auth, &id).await.unwrap();
  h.pipeline.monitor(&auth, &id).await.unwrap();
  h.pipeline.transfer(&auth, &id).await.unwrap();

  h.backend
    .fail_next(BackendOp::DeleteWorkspace, BackendError::rejected("locked"))
    .await;
  h.pipeline.cleanup(&auth, &id).await.unwrap();

  let submission = h.submission(&id).await;
  assert_eq!(submission.cleanup_state, CleanupState::CleaningError);
  assert_eq!(submission.state, SubmissionState::Completed);
}

/// A submission left in `Cleaning` by a crashed process.
async fn abandoned_cleanup(h: &Harness) -> String {
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("abandoned", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  h.pipeline.prepare(&alice(), &id).await.unwrap();
  h.pipeline.fail_submission(&id, "operator abort").await.unwrap();
  assert!(
    h.store
      .compare_and_set_cleanup_state(&id, CleanupState::NotCleaned, CleanupState::Cleaning)
      .await
      .unwrap()
  );
  id
}

#[tokio::test]
async fn test_stale_cleanup_claim_is_taken_over() {
  let h = Harness::with_config(EngineConfig {
    cleanup_claim_timeout_seconds: 0,
    ..EngineConfig::default()
  })
  .await;
  let id = abandoned_cleanup(&h).await;
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;

  h.scheduler().tick().await;

  assert_eq!(h.submission(&id).await.cleanup_state, CleanupState::Cleaned);
  assert!(h.backend.live_workspaces().await.is_empty());
}

#[tokio::test]
async fn test_live_cleanup_claim_is_left_alone() {
  let h = Harness::new().await;
  let id = abandoned_cleanup(&h).await;

  assert_eq!(h.scheduler().tick().await, 0);

  assert_eq!(h.submission(&id).await.cleanup_state, CleanupState::Cleaning);
  assert_eq!(h.backend.live_workspaces().await.len(), 1);
}

#[tokio::test]
async fn test_cancelled_submission_is_cleaned_not_advanced() {
  let h = Harness::new().await;
  h.backend
    .script_status(ASSEMBLY_REMOTE, vec![RunStatus::new("running")])
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("cancel", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.pipeline.prepare(&alice(), &id).await.unwrap();
  h.store.request_cancellation(&id).await.unwrap();

  h.scheduler().tick().await;

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Submitted);
  assert_eq!(submission.cleanup_state, CleanupState::Cleaned);
  assert_eq!(h.backend.calls(BackendOp::Status).await, 0);
  assert!(h.backend.live_workspaces().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_new_submission_allocates_nothing() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("cancel", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  h.store.request_cancellation(&id).await.unwrap();

  h.pipeline.prepare(&alice(), &id).await.unwrap();

  assert_eq!(h.state(&id).await, SubmissionState::New);
  assert_eq!(h.backend.calls(BackendOp::CreateWorkspace).await, 0);
}

#[tokio::test]
async fn test_output_mismatch_fails_submission() {
  let h = Harness::new().await;
  h.registry
    .set_expected_roles(
      AnalysisType::new("assembly"),
      BTreeSet::from([
        "contigs".to_string(),
        "report".to_string(),
        "annotations".to_string(),
      ]),
    )
    .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("mismatch", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.scheduler().tick().await;

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Error);
  assert!(submission.last_error.unwrap().starts_with("output mismatch"));
  assert!(submission.analysis_id.is_none());
}

#[tokio::test]
async fn test_never_cleanup_policy_keeps_workspace() {
  let config = EngineConfig {
    cleanup_policy: CleanupPolicy::Never,
    ..EngineConfig::default()
  };
  let h = Harness::with_config(config).await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("keep", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.scheduler().tick().await;

  let submission = h.submission(&id).await;
  assert_eq!(submission.state, SubmissionState::Completed);
  assert_eq!(submission.cleanup_state, CleanupState::NotCleaned);
  assert_eq!(h.backend.live_workspaces().await.len(), 1);
}

#[tokio::test]
async fn test_sample_updater_writes_metadata() {
  let h = Harness::new().await;
  let mut updaters = SampleUpdaterRegistry::new();
  updaters.register(Arc::new(TabularMetadataUpdater::new(
    h.store.clone(),
    AnalysisType::new("assembly"),
    "report",
    "assembly/",
  )));
  let pipeline = seqflow_pipeline::Pipeline::new(
    h.store.clone(),
    h.backend.clone(),
    h.registry.clone(),
    &h.config,
  )
  .with_updaters(updaters);

  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("meta", ASSEMBLY, "alice").with_single_end([&a]))
    .await;
  let auth = alice();
  pipeline.prepare(&auth, &id).await.unwrap();
  pipeline.monitor(&auth, &id).await.unwrap();
  pipeline.transfer(&auth, &id).await.unwrap();

  let metadata = h.store.get_sample_metadata("sample-a").await.unwrap();
  assert_eq!(metadata.get("assembly/n50").map(String::as_str), Some("5000"));
  assert_eq!(metadata.get("assembly/contigs").map(String::as_str), Some("12"));
}

#[tokio::test]
async fn test_configured_sample_updater_runs_from_scheduler() {
  let h = Harness::with_config(EngineConfig {
    sample_updaters: vec![SampleUpdaterConfig {
      analysis_type: "assembly".to_string(),
      output_role: "report".to_string(),
      prefix: "assembly/".to_string(),
    }],
    ..EngineConfig::default()
  })
  .await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("meta", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  h.scheduler().tick().await;

  assert_eq!(h.state(&id).await, SubmissionState::Completed);
  let metadata = h.store.get_sample_metadata("sample-a").await.unwrap();
  assert_eq!(metadata.get("assembly/n50").map(String::as_str), Some("5000"));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancellation() {
  let h = Harness::new().await;
  let a = h.single_end("sample-a").await;
  let id = h
    .submit(AnalysisSubmission::new("loop", ASSEMBLY, "alice").with_single_end([&a]))
    .await;

  let scheduler = Arc::new(h.scheduler());
  let cancel = CancellationToken::new();
  let handle = tokio::spawn({
    let scheduler = scheduler.clone();
    let cancel = cancel.clone();
    async move { scheduler.run(cancel).await }
  });

  // The first tick fires immediately.
  tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  cancel.cancel();
  handle.await.unwrap();

  assert_eq!(h.state(&id).await, SubmissionState::Completed);
}
