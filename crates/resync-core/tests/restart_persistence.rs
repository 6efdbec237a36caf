use std::sync::Arc;
use std::time::Duration;

use resync_core::app::{
    ConnectivityMonitor, DEFAULT_RECOVERY_WINDOW, GenerationClient, OperationPoller,
    RequestExecutor, RetryPolicy, SubmitOutcome, Submitter, SyncEngine, SyncOutcome,
};
use resync_core::domain::{
    ArtifactStatus, AspectRatio, GenerationRequest, ImageParams, ScriptParams, ScriptPlatform,
};
use resync_core::impls::{FileBackend, ScriptedService};
use resync_core::ports::{StaticCredentials, SystemClock, UlidGenerator};
use resync_core::store::{Store, StoreHandle};

struct Session {
    store: Arc<Store>,
    submitter: Submitter,
    engine: SyncEngine,
}

/// One process lifetime: open the store from disk and wire the engine.
async fn session(path: &std::path::Path, service: Arc<ScriptedService>, online: bool) -> Session {
    let store = StoreHandle::new(Arc::new(FileBackend::new(path)))
        .store()
        .await
        .unwrap();
    let client = Arc::new(GenerationClient::new(
        service,
        Arc::new(StaticCredentials::new().with("gemini", "test-key")),
        RetryPolicy::default().without_jitter(),
    ));
    let poller = Arc::new(OperationPoller::new(Arc::clone(&client), Duration::from_secs(10)));
    let monitor = Arc::new(ConnectivityMonitor::new(online, DEFAULT_RECOVERY_WINDOW));
    let executor = Arc::new(RequestExecutor::new(client, poller, monitor));
    let ids = Arc::new(UlidGenerator::new(SystemClock));

    Session {
        submitter: Submitter::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::new(SystemClock),
            ids.clone(),
        ),
        engine: SyncEngine::new(Arc::clone(&store), executor, ids),
        store,
    }
}

fn image(prompt: &str) -> GenerationRequest {
    GenerationRequest::GenerateImage(ImageParams {
        prompt: prompt.into(),
        aspect_ratio: AspectRatio::Landscape,
    })
}

#[tokio::test]
async fn queued_requests_survive_restart_and_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let service = Arc::new(ScriptedService::new());

    let mut queued_ids = Vec::new();
    {
        let offline = session(&path, service.clone(), false).await;
        for request in [
            image("lighthouse at dusk"),
            GenerationRequest::GenerateScript(ScriptParams {
                topic: "sourdough".into(),
                platform: ScriptPlatform::YouTube,
            }),
        ] {
            match offline.submitter.submit(request).await.unwrap() {
                SubmitOutcome::Queued(record) => queued_ids.push(record.id),
                SubmitOutcome::Completed(_) => panic!("submitted while offline"),
            }
        }
    }
    assert!(service.submitted().is_empty());

    let online = session(&path, service.clone(), true).await;
    assert_eq!(online.store.requests_by_time().await.unwrap().len(), 2);

    let SyncOutcome::Completed(report) = online.engine.process_sync_queue().await.unwrap() else {
        panic!("pass was skipped");
    };
    assert_eq!(report.delivered, 2);
    assert_eq!(service.submitted(), vec!["lighthouse at dusk", "sourdough"]);

    // the next process sees the delivered results
    let after = session(&path, service, true).await;
    assert!(after.store.requests_by_time().await.unwrap().is_empty());
    for id in queued_ids {
        let artifact = after.store.get_artifact(id).await.unwrap().unwrap();
        assert_eq!(artifact.status, ArtifactStatus::Completed);
        assert!(artifact.payload.is_some());
    }
    let counts = after.store.counts().await.unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.pending_requests, 0);
}

#[tokio::test]
async fn retry_count_and_dead_letters_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let service = Arc::new(ScriptedService::new());
    service.fail_prompt(
        "rejected",
        resync_core::domain::ServiceError::fatal("invalid argument"),
    );

    let id = {
        let offline = session(&path, service.clone(), false).await;
        offline.submitter.submit(image("rejected")).await.unwrap().artifact().id
    };

    // one pass per restart
    for expected in 1..=3 {
        let s = session(&path, service.clone(), true).await;
        s.engine.process_sync_queue().await.unwrap();
        let request = s.store.get_request(id).await.unwrap().unwrap();
        assert_eq!(request.retry_count, expected);
    }
    {
        let s = session(&path, service.clone(), true).await;
        s.engine.process_sync_queue().await.unwrap();
    }

    let last = session(&path, service.clone(), true).await;
    let artifact = last.store.get_artifact(id).await.unwrap().unwrap();
    assert_eq!(artifact.status, ArtifactStatus::Failed);
    assert_eq!(last.store.dead_letters().await.unwrap().len(), 1);

    // resurrected work is delivered once the prompt is accepted
    service.clear_prompt("rejected");
    last.engine.resurrect(id).await.unwrap();
    last.engine.process_sync_queue().await.unwrap();

    let reopened = session(&path, service, true).await;
    assert_eq!(
        reopened.store.get_artifact(id).await.unwrap().unwrap().status,
        ArtifactStatus::Completed
    );
    assert!(reopened.store.dead_letters().await.unwrap().is_empty());
}
