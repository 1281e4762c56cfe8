use cutout_core::{BackgroundRemover, RemoverError, RequestId, ServiceState};
use cutout_testing::{init_tracing, tag_of, tagged_image, test_config, MockSegmentationBackend};
use std::time::Duration;
use tempfile::TempDir;

fn remover(backend: &MockSegmentationBackend, dir: &TempDir) -> BackgroundRemover {
    BackgroundRemover::new(test_config(dir.path()), backend.clone().into_backend()).unwrap()
}

#[tokio::test]
async fn test_oversized_batch_does_no_work() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new();
    let svc = remover(&backend, &dir);

    let images = (0..6).map(tagged_image).collect();
    let err = svc
        .remove_background_batch(images, Some(RequestId::new("big")))
        .await
        .unwrap_err();

    assert_eq!(err, RemoverError::BatchSizeExceeded { size: 6, max: 5 });
    assert_eq!(backend.load_count(), 0);
    assert_eq!(backend.inference_count(), 0);
    assert_eq!(svc.state(), ServiceState::Unloaded);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new();
    let svc = remover(&backend, &dir);

    let err = svc.remove_background_batch(Vec::new(), None).await.unwrap_err();
    assert_eq!(err, RemoverError::EmptyBatch);
    assert_eq!(backend.load_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_item_fails_whole_batch() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new();
    backend.add_failing_image(3);
    let svc = remover(&backend, &dir);

    let images = (1..=5).map(tagged_image).collect();
    let err = svc
        .remove_background_batch(images, Some(RequestId::new("B1")))
        .await
        .unwrap_err();

    match err {
        RemoverError::Processing { request_id, .. } => assert_eq!(request_id, "B1-3"),
        other => panic!("unexpected error: {other:?}"),
    }
    // Every item was attempted even though the batch failed
    assert_eq!(backend.inference_count(), 5);
    assert_eq!(backend.load_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_results_keep_input_order() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new();
    backend.add_slow_image(1, Duration::from_millis(150));
    let svc = remover(&backend, &dir);

    let out = svc
        .remove_background_batch(vec![tagged_image(1), tagged_image(2)], Some(RequestId::new("B2")))
        .await
        .unwrap();

    assert_eq!(out.iter().map(tag_of).collect::<Vec<_>>(), vec![1, 2]);
    assert!(out.iter().all(|img| img.format().has_alpha()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_share_single_load() {
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new().with_load_delay(Duration::from_millis(80));
    let svc = remover(&backend, &dir);

    let batches: Vec<_> = (0..3u8)
        .map(|b| {
            let svc = svc.clone();
            tokio::spawn(async move {
                let images = (0..5).map(|i| tagged_image(b * 10 + i)).collect();
                svc.remove_background_batch(images, None).await
            })
        })
        .collect();

    for (b, batch) in futures::future::join_all(batches).await.into_iter().enumerate() {
        let out = batch.unwrap().unwrap();
        let tags: Vec<u8> = out.iter().map(tag_of).collect();
        let expected: Vec<u8> = (0..5).map(|i| b as u8 * 10 + i).collect();
        assert_eq!(tags, expected);
    }
    assert_eq!(backend.load_count(), 1);
    assert_eq!(backend.inference_count(), 15);
    svc.cleanup().await;
}

#[tokio::test]
async fn test_batch_after_cleanup_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new();
    let svc = remover(&backend, &dir);
    svc.cleanup().await;

    let err = svc
        .remove_background_batch(vec![tagged_image(1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoverError::NotReady(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleanup_mid_batch_finishes_queued_items() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = MockSegmentationBackend::new().with_infer_delay(Duration::from_millis(200));
    let config = test_config(dir.path()).with_max_concurrency(1).unwrap();
    let svc = BackgroundRemover::new(config, backend.clone().into_backend()).unwrap();

    let batch = {
        let svc = svc.clone();
        tokio::spawn(async move {
            let images = (1..=3).map(tagged_image).collect();
            svc.remove_background_batch(images, Some(RequestId::new("B4"))).await
        })
    };
    while svc.health_check().active_workers == 0 || svc.state() != ServiceState::Loaded {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Items 2 and 3 are now waiting for the single worker
    tokio::time::sleep(Duration::from_millis(20)).await;

    svc.cleanup().await;

    let out = batch.await.unwrap().unwrap();
    assert_eq!(out.iter().map(tag_of).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(backend.inference_count(), 3);
    assert!(!svc.is_ready());
}
