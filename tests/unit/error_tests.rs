use companion_bridge::AppError;

#[test]
fn display_prefixes_variant() {
    let cases = [
        (AppError::Unreachable("x".into()), "unreachable: x"),
        (AppError::InvalidResponse("x".into()), "invalid response: x"),
        (AppError::NoneInScope("x".into()), "none in scope: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::LaunchFailed("x".into()), "launch failed: x"),
        (AppError::Config("x".into()), "config: x"),
        (AppError::Decode("x".into()), "decode: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn discovery_errors_are_classified() {
    assert!(AppError::NoneInScope(String::new()).is_discovery());
    assert!(AppError::NotFound(String::new()).is_discovery());
    assert!(AppError::LaunchFailed(String::new()).is_discovery());
    assert!(!AppError::Unreachable(String::new()).is_discovery());
    assert!(!AppError::Decode(String::new()).is_discovery());
}

#[test]
fn io_error_converts() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert_eq!(err, AppError::Io("gone".into()));
}

#[test]
fn toml_error_converts_to_config() {
    let toml_err = toml::from_str::<toml::Value>("= broken").expect_err("invalid toml");
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}
