//! Platform lifecycle. Platform state is process-wide, so this binary holds a
//! single test that walks through every phase in order.

use std::sync::mpsc;
use std::time::Duration;

use napa_runtime::{Container, ResponseCode};

#[test]
fn test_platform_lifecycle() {
    // Before initialization.
    assert!(!napa_runtime::is_initialized());
    assert!(napa_runtime::platform_settings().is_none());
    let err = Container::new("").unwrap_err();
    assert_eq!(err.code(), ResponseCode::NotInitialized);
    assert_eq!(napa_runtime::shutdown(), ResponseCode::NotInitialized);

    // Rejected arguments leave the platform uninitialized.
    assert_eq!(
        napa_runtime::initialize_from_console(["host", "--completion-threads", "0"]),
        ResponseCode::ProcessArgsError
    );
    assert_eq!(
        napa_runtime::initialize("--bogus-setting 1"),
        ResponseCode::SettingsParserError
    );
    assert_eq!(
        napa_runtime::initialize("--logging-provider none --v8-flags --no-such-v8-flag"),
        ResponseCode::V8InitError
    );
    assert!(!napa_runtime::is_initialized());

    // Initialization.
    assert_eq!(
        napa_runtime::initialize_from_console([
            "host",
            "--logging-provider",
            "none",
            "--completion-threads",
            "1",
        ]),
        ResponseCode::Success
    );
    assert!(napa_runtime::is_initialized());
    assert_eq!(
        napa_runtime::platform_settings().map(|s| s.completion_threads),
        Some(1)
    );
    assert_eq!(napa_runtime::initialize(""), ResponseCode::AlreadyInitialized);

    let container = Container::new("--cores 2").unwrap();
    assert_eq!(
        container.load_sync(
            "function hello(who) { return `hello ${who}`; }\nfunction spin() { while (true) {} }"
        ),
        ResponseCode::Success
    );
    let response = container.run_sync("hello", &["\"world\""], 0);
    assert_eq!(response.code, ResponseCode::Success);
    assert_eq!(response.return_value, "\"hello world\"");

    // Shutdown with a run still in flight. Its callback must still fire.
    let (pending_tx, pending_rx) = mpsc::channel();
    let no_args: [&str; 0] = [];
    container.run(
        "spin",
        &no_args,
        move |response| {
            let _ = pending_tx.send(response);
        },
        0,
    );
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(napa_runtime::shutdown(), ResponseCode::Success);
    assert!(!napa_runtime::is_initialized());

    let pending = pending_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_ne!(pending.code, ResponseCode::Success);
    assert!(!pending.error.is_empty());

    let (tx, rx) = mpsc::channel();
    container.run(
        "hello",
        &["\"again\""],
        move |response| {
            let _ = tx.send(response.code);
        },
        0,
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ResponseCode::NotInitialized
    );

    let response = container.run_sync("hello", &["\"again\""], 0);
    assert!(!response.is_success());
    assert_eq!(response.code, ResponseCode::InternalError);

    let err = Container::new("").unwrap_err();
    assert_eq!(err.code(), ResponseCode::NotInitialized);

    assert_eq!(napa_runtime::initialize(""), ResponseCode::V8InitError);
    assert_eq!(napa_runtime::shutdown(), ResponseCode::NotInitialized);
}
