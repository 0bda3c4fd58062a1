//! Task scenarios driven through a whole worker
#![cfg(unix)]

use verity_backend::traits::Backend;
use serde_json::{json, Value};
use verity_core::JobKind;
use verity_tests::common::{
    finished_line, is_terminal, progress_line, run_worker_until, script_sandbox, status,
    task_payload, Scenario,
};
use verity_tests::fixtures::{ALGORITHM, GROUND_TRUTH_ALGORITHM};
use verity_worker::WorkerRole;

#[tokio::test]
async fn test_upload_task_succeeds() {
    let scenario = Scenario::new();
    let (dataset, model) = scenario.upload_files();
    let script = format!(
        "cat > /dev/null; {}; {}; {}",
        progress_line(30),
        progress_line(60),
        finished_line(true, &json!({"accuracy": 0.9, "rows": 2}))
    );
    let worker = scenario.worker(WorkerRole::Task, script_sandbox(&script));

    run_worker_until(&worker, async {
        scenario
            .submit_task(&task_payload("t1", &dataset, &model, ALGORITHM))
            .await;
        scenario
            .wait_for_update(JobKind::Task, "t1", is_terminal)
            .await;
    })
    .await
    .unwrap();

    let update = scenario.backend.get_update(JobKind::Task, "t1").await.unwrap().unwrap();
    assert_eq!(status(&update), "Success");
    assert_eq!(update["type"], "TaskResponse");
    assert_eq!(update["taskProgress"], "100");
    assert!(!update.contains_key("errorMessages"));
    let output: Value = serde_json::from_str(&update["output"]).unwrap();
    assert_eq!(output, json!({"accuracy": 0.9, "rows": 2}));
    assert!(std::path::Path::new(&update["logFile"]).exists());
    assert!(scenario.pending(WorkerRole::Task).is_empty());

    // progress only moves forward
    let progress: Vec<u8> = scenario
        .history(JobKind::Task, "t1")
        .iter()
        .map(|u| u["taskProgress"].parse().unwrap())
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.contains(&60));
}

#[tokio::test]
async fn test_missing_model_file_fails() {
    let scenario = Scenario::new();
    let (dataset, _) = scenario.upload_files();
    let missing = scenario.dir.path().join("absent.sav");
    let worker = scenario.worker(WorkerRole::Task, script_sandbox("exit 1"));

    run_worker_until(&worker, async {
        scenario
            .submit_task(&task_payload("t2", &dataset, &missing, ALGORITHM))
            .await;
        scenario
            .wait_for_update(JobKind::Task, "t2", is_terminal)
            .await;
    })
    .await
    .unwrap();

    let update = scenario.backend.get_update(JobKind::Task, "t2").await.unwrap().unwrap();
    assert_eq!(status(&update), "Error");
    assert_eq!(update["taskProgress"], "100");
    assert_eq!(update["output"], "");
    assert!(update["errorMessages"].contains("Model file not found"));
    assert!(scenario.dir.path().join("errors/t2.json").exists());
}

#[tokio::test]
async fn test_failed_and_silent_computations() {
    let scenario = Scenario::new();
    let (dataset, model) = scenario.upload_files();

    let script = format!("cat > /dev/null; {}", finished_line(true, &json!([1, 2])));
    let worker = scenario.worker(WorkerRole::Task, script_sandbox(&script));
    run_worker_until(&worker, async {
        scenario
            .submit_task(&task_payload("t3", &dataset, &model, ALGORITHM))
            .await;
        scenario
            .wait_for_update(JobKind::Task, "t3", is_terminal)
            .await;
    })
    .await
    .unwrap();
    let update = scenario.backend.get_update(JobKind::Task, "t3").await.unwrap().unwrap();
    assert_eq!(status(&update), "Error");
    assert!(update["errorMessages"].contains("Algorithm output is not a JSON object"));

    let worker = scenario.worker(WorkerRole::Task, script_sandbox("cat > /dev/null; exit 3"));
    run_worker_until(&worker, async {
        scenario
            .submit_task(&task_payload("t4", &dataset, &model, ALGORITHM))
            .await;
        scenario
            .wait_for_update(JobKind::Task, "t4", is_terminal)
            .await;
    })
    .await
    .unwrap();
    let update = scenario.backend.get_update(JobKind::Task, "t4").await.unwrap().unwrap();
    assert_eq!(status(&update), "Error");
    assert!(update["errorMessages"].contains("No results produced by the algorithm"));
}

#[tokio::test]
async fn test_ground_truth_arguments_required() {
    let scenario = Scenario::new();
    let (dataset, model) = scenario.upload_files();
    let worker = scenario.worker(WorkerRole::Task, script_sandbox("exit 1"));

    run_worker_until(&worker, async {
        scenario
            .submit_task(&task_payload("t5", &dataset, &model, GROUND_TRUTH_ALGORITHM))
            .await;
        scenario
            .wait_for_update(JobKind::Task, "t5", is_terminal)
            .await;
    })
    .await
    .unwrap();

    let update = scenario.backend.get_update(JobKind::Task, "t5").await.unwrap().unwrap();
    assert_eq!(status(&update), "Error");
    assert!(update["errorMessages"].contains("Ground truth dataset is required"));
}

#[tokio::test]
async fn test_dataset_and_model_services() {
    let scenario = Scenario::new();
    let (dataset, model) = scenario.upload_files();
    let worker = scenario.worker(WorkerRole::Service, script_sandbox("exit 1"));

    run_worker_until(&worker, async {
        scenario
            .submit_service(
                JobKind::ValidateDataset,
                &json!({"serviceId": "s1", "filePath": dataset.display().to_string()}),
            )
            .await;
        scenario
            .submit_service(
                JobKind::ValidateModel,
                &json!({"serviceId": "s2", "filePath": model.display().to_string(), "mode": "upload"}),
            )
            .await;
        scenario
            .wait_for_update(JobKind::ValidateModel, "s2", is_terminal)
            .await;
    })
    .await
    .unwrap();

    let update = scenario
        .backend
        .get_update(JobKind::ValidateDataset, "s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status(&update), "done");
    assert_eq!(update["validationResult"], "valid");
    assert_eq!(update["serializedBy"], "json");
    let columns: Value = serde_json::from_str(&update["columns"]).unwrap();
    assert_eq!(columns[2]["name"], "label");

    let update = scenario
        .backend
        .get_update(JobKind::ValidateModel, "s2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status(&update), "done");
    assert_eq!(update["validationResult"], "valid");
    assert_eq!(update["modelFormat"], "fixture");
    assert!(scenario.pending(WorkerRole::Service).is_empty());
}
