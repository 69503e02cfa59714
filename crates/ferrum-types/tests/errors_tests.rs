use ferrum_types::*;

#[test]
fn error_constructors_and_classes() {
    let e = FerrumError::config("bad");
    // Config is not classified as client/server specifically; must be non-retryable
    assert!(!e.is_client_error());
    assert!(!e.is_retryable());

    let e = FerrumError::resource_exhausted("queue full");
    assert!(e.is_server_error());
    assert!(e.is_retryable());

    let e = FerrumError::invalid_request("empty prompt");
    assert!(e.is_client_error());
    assert!(matches!(e, FerrumError::RequestValidation { .. }));

    let e = FerrumError::unknown_request(RequestId(3));
    assert!(e.is_client_error());
    assert!(e.to_string().contains('3'));

    assert!(FerrumError::cancelled("stop").is_cancelled());
    assert!(FerrumError::executor_closed("done").is_closed());
    assert!(FerrumError::initialization("no model").is_server_error());
}

#[test]
fn error_conversions() {
    let io_err: FerrumError = std::io::Error::new(std::io::ErrorKind::Other, "io").into();
    match io_err {
        FerrumError::IO { .. } => {}
        _ => panic!("wrong kind"),
    }

    let ser_err: FerrumError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    match ser_err {
        FerrumError::Serialization { .. } => {}
        _ => panic!("wrong kind"),
    }

    let toml_err: FerrumError = toml::from_str::<ExecutorConfig>("max_beam_width = \"x\"")
        .unwrap_err()
        .into();
    assert!(matches!(toml_err, FerrumError::Config { .. }));
}

#[test]
fn errors_survive_serde() {
    let e = FerrumError::backend("kernel failed");
    let s = serde_json::to_string(&e).unwrap();
    let back: FerrumError = serde_json::from_str(&s).unwrap();
    assert_eq!(back.to_string(), e.to_string());
}
