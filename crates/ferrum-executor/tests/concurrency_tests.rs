//! Concurrent callers sharing one executor

mod common;

use common::*;
use ferrum_executor::backends::EchoModelConfig;
use ferrum_executor::Executor;
use ferrum_types::{RequestId, Response};
use std::sync::{Arc, Barrier};
use std::thread;

fn expected_echo(prompt: &[u32], len: usize) -> Vec<u32> {
    prompt.iter().copied().cycle().take(len).collect()
}

#[test]
fn test_two_threads_receive_only_their_own_responses() {
    let executor = Arc::new(echo_executor(EchoModelConfig::default()));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [[100u32, 101], [200u32, 201]]
        .into_iter()
        .map(|prompt| {
            let executor = executor.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let id = executor.enqueue_request(greedy_request(&prompt, 4)).unwrap();
                let responses = collect_until_final(&executor, id);
                assert!(responses.iter().all(|r| r.request_id == id));
                (prompt, output_tokens(&responses))
            })
        })
        .collect();

    for handle in handles {
        let (prompt, tokens) = handle.join().unwrap();
        assert_eq!(tokens, expected_echo(&prompt, 4));
    }
}

#[test]
fn test_streaming_fifo_under_concurrent_callers() {
    const THREADS: u32 = 8;
    const TOKENS: usize = 16;

    let executor = Arc::new(echo_executor(EchoModelConfig {
        max_active_requests: 4,
        ..EchoModelConfig::default()
    }));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let executor = executor.clone();
            thread::spawn(move || {
                let prompt = [t * 10 + 1, t * 10 + 2, t * 10 + 3];
                let id = executor
                    .enqueue_request(greedy_request(&prompt, TOKENS).with_streaming(true))
                    .unwrap();
                let responses = collect_until_final(&executor, id);
                assert_eq!(responses.len(), TOKENS);
                assert_eq!(output_tokens(&responses), expected_echo(&prompt, TOKENS));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(executor.num_pending_requests(), 0);
}

#[test]
fn test_exactly_one_terminal_under_concurrent_cancel() {
    const REQUESTS: usize = 32;

    let executor: Arc<Executor> = Arc::new(echo_executor(EchoModelConfig {
        max_active_requests: 4,
        step_delay_ms: 1,
        ..EchoModelConfig::default()
    }));

    let ids: Vec<RequestId> = (0..REQUESTS)
        .map(|i| {
            executor
                .enqueue_request(greedy_request(&[i as u32 + 1], 8))
                .unwrap()
        })
        .collect();

    let canceller = {
        let executor = executor.clone();
        let ids = ids.clone();
        thread::spawn(move || {
            for id in ids.iter().step_by(2) {
                executor.cancel_request(*id);
            }
        })
    };

    let mut per_request: Vec<Vec<Response>> = Vec::new();
    for id in &ids {
        per_request.push(collect_until_final(&executor, *id));
    }
    canceller.join().unwrap();

    for (id, responses) in ids.iter().zip(&per_request) {
        let finals = responses.iter().filter(|r| r.is_final()).count();
        assert_eq!(finals, 1, "request {} had {} terminal responses", id, finals);
        assert!(responses.last().unwrap().is_final());
    }
    for (i, responses) in per_request.iter().enumerate() {
        if i % 2 == 1 {
            assert!(!responses.last().unwrap().has_error());
        }
    }
}

#[test]
fn test_await_any_collects_everything_once() {
    const REQUESTS: usize = 20;

    let executor = echo_executor(EchoModelConfig::default());
    let results = executor.enqueue_requests(
        (0..REQUESTS)
            .map(|i| greedy_request(&[i as u32 + 1], 3).with_streaming(true))
            .collect(),
    );
    assert!(results.iter().all(|r| r.is_ok()));

    let mut finals = 0;
    let mut total = 0;
    while finals < REQUESTS {
        let batch = executor.await_responses(Some(WAIT)).unwrap();
        assert!(!batch.is_empty());
        total += batch.len();
        finals += batch.iter().filter(|r| r.is_final()).count();
    }

    assert_eq!(total, REQUESTS * 3);
    assert_eq!(executor.get_num_responses_ready(None), 0);
    assert_eq!(executor.num_pending_requests(), 0);
}
