//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and in-memory stdio fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to trace output for this crate. Logs go
    /// through the test writer so they stay attached to the test that emitted
    /// them.
    ///
    /// ```bash
    /// RUST_LOG=stdio_proxy=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stdio_proxy=trace"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true) // Bindings are keyed by thread, so show it
                .compact()
                .try_init()
                .ok(); // Ignore errors if already initialized by another test
        });
    }
}

/// Global test logging setup
///
/// Add this to any test module where you want automatic logging initialization.
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// In-memory standard streams for exercising the stdio table
#[cfg(test)]
pub mod fixtures {
    use std::sync::Arc;

    use crate::stdio::{MemoryStream, StdioTable, StreamHandle};

    /// A table whose three slots are backed by observable memory streams
    pub struct MemoryStdio {
        pub stdin: Arc<MemoryStream>,
        pub stdout: Arc<MemoryStream>,
        pub stderr: Arc<MemoryStream>,
        pub table: Arc<StdioTable>,
    }

    impl MemoryStdio {
        /// Plain slots; `input` is what the stdin slot will yield
        pub fn plain(input: &str) -> Self {
            let stdin = Arc::new(MemoryStream::with_contents(input));
            let stdout = Arc::new(MemoryStream::new());
            let stderr = Arc::new(MemoryStream::new());
            let table = Arc::new(StdioTable::with_streams(
                StreamHandle::from(stdin.clone()),
                StreamHandle::from(stdout.clone()),
                StreamHandle::from(stderr.clone()),
            ));
            Self {
                stdin,
                stdout,
                stderr,
                table,
            }
        }

        /// Proxied slots seeded for the calling thread
        pub fn proxied(input: &str) -> Self {
            let stdio = Self::plain(input);
            stdio.table.install_proxies();
            stdio
        }
    }
}
