//! Tokio adapter

mod common;

use common::*;
use ferrum_executor::backends::EchoModelConfig;
use ferrum_executor::{AsyncExecutor, ExecutorState};
use ferrum_types::{FerrumError, RequestId};
use std::time::Duration;

#[tokio::test]
async fn test_async_round_trip() {
    let executor = AsyncExecutor::new(echo_executor(EchoModelConfig::default()));

    let id = executor.enqueue_request(greedy_request(&[3, 1, 4], 5)).unwrap();
    let responses = executor.wait_for_completion(id, Some(WAIT)).await.unwrap();

    assert_eq!(responses.len(), 1);
    assert!(responses[0].is_final());
    assert_eq!(output_tokens(&responses), vec![3, 1, 4, 3, 1]);
    assert_eq!(executor.get_num_responses_ready(Some(id)), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_async_waiters() {
    let executor = AsyncExecutor::new(echo_executor(EchoModelConfig::default()));

    let tasks: Vec<_> = (1..=4u32)
        .map(|t| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let prompt = [t, t + 100];
                let id = executor
                    .enqueue_request(greedy_request(&prompt, 6).with_streaming(true))
                    .unwrap();
                let responses = executor.wait_for_completion(id, Some(WAIT)).await.unwrap();
                (prompt, output_tokens(&responses))
            })
        })
        .collect();

    for task in tasks {
        let (prompt, tokens) = task.await.unwrap();
        let expected: Vec<u32> = prompt.iter().copied().cycle().take(6).collect();
        assert_eq!(tokens, expected);
    }
}

#[tokio::test]
async fn test_async_timeout_and_unknown_id() {
    let (executor, _backend) = manual_executor(test_config());
    let executor = AsyncExecutor::new(executor);

    let id = executor
        .enqueue_request(ferrum_executor::ExecutorRequest::from_tokens(&[1], 1))
        .unwrap();
    let responses = executor
        .await_request_responses(id, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert!(responses.is_empty());

    let partial = executor
        .wait_for_completion(id, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert!(partial.is_empty());

    let err = executor
        .await_responses_for(vec![RequestId(424242)], Some(Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, FerrumError::UnknownRequest { .. }));
}

#[tokio::test]
async fn test_async_shutdown() {
    let executor = AsyncExecutor::new(echo_executor(EchoModelConfig::default()));
    let id = executor.enqueue_request(greedy_request(&[1], 2)).unwrap();
    executor.wait_for_completion(id, Some(WAIT)).await.unwrap();

    executor.shutdown().await.unwrap();
    assert_eq!(executor.state(), ExecutorState::Closed);
    assert!(!executor.can_enqueue_requests());

    let err = executor.await_responses(Some(WAIT)).await.unwrap_err();
    assert!(err.is_closed());
    assert!(!executor.get_latest_iteration_stats().is_empty());
}
