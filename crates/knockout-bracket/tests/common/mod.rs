/// Common test utilities and synthetic result sheets.
///
/// These builders lay out tokens the way the result sheets print them:
/// entrant lines in the left column, each later round one label column further
/// right with its score blobs beside it. They are not part of the library.
pub mod synthetic;

/// Initialise `env_logger` once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
