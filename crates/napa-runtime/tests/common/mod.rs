use std::sync::Once;

use napa_runtime::ResponseCode;

/// Initialize the platform once per test binary.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let code = napa_runtime::initialize("--logging-provider none --completion-threads 2");
        assert!(
            matches!(code, ResponseCode::Success | ResponseCode::AlreadyInitialized),
            "initialize returned {:?}",
            code
        );
    });
}
