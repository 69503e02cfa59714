use ferrum_interfaces::*;
use std::path::Path;

#[test]
fn backend_step_constructors() {
    let idle = BackendStep::idle();
    assert!(!idle.has_responses());
    assert_eq!(idle.num_queued_requests, 0);

    let step = BackendStep::with_responses(vec![Response::error(
        RequestId(1),
        FerrumError::backend("boom"),
    )]);
    assert!(step.has_responses());
    assert!(step.request_stats.is_empty());
}

#[test]
fn capabilities_serde_roundtrip() {
    let caps = BackendCapabilities::default();
    let s = serde_json::to_string(&caps).unwrap();
    let back: BackendCapabilities = serde_json::from_str(&s).unwrap();
    assert!(back.supports_cancellation);
    assert_eq!(back.max_beam_width, 1);
}

#[test]
fn engine_source_model_path() {
    let source = EngineSource::ModelPath("/models/tiny".into());
    assert_eq!(source.model_path(), Some(Path::new("/models/tiny")));

    let source = EngineSource::Buffer {
        engine: vec![1, 2, 3],
        model_config: serde_json::json!({}),
    };
    assert!(source.model_path().is_none());
}

struct NullBackend;

impl ExecutionBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn submit(&mut self, _request_id: RequestId, _request: &ExecutorRequest) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self) -> Result<BackendStep> {
        Ok(BackendStep::idle())
    }

    fn cancel(&mut self, _request_id: RequestId) -> bool {
        false
    }

    fn num_active_requests(&self) -> usize {
        0
    }
}

#[test]
fn backend_trait_defaults() {
    let mut backend: Box<dyn ExecutionBackend> = Box::new(NullBackend);
    assert!(backend.can_accept_requests());
    assert!(backend.release().is_ok());
    assert!(backend.capabilities().supports_streaming);
    assert_eq!(backend.name(), "null");
}
