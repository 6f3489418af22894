use std::{
    fs,
    path::{Path, PathBuf},
    sync::Once,
};

use polyfold_shared::log::LevelFilter;

/// Folder (relative to the crate that runs the test) in which tests write their debug output.
pub const TEST_RESULTS_FOLDER: &str = "test_results";

/// Installs a logger once per test binary so that log output shows up in failing tests.
pub fn setup_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another test harness might have installed a logger already
        let _ = simple_logger::SimpleLogger::new().with_level(LevelFilter::Trace).init();
    });
}

/// Creates a folder named after the given function in which the test can store files for debugging.
///
/// Use it together with [`polyfold_shared::function_name!`].
pub fn create_test_result_folder_for_function(function_name: &str) -> PathBuf {
    let folder_name = function_name.replace("::", ".");
    let path = Path::new(TEST_RESULTS_FOLDER).join(folder_name);
    fs::create_dir_all(&path).unwrap_or_else(|err| panic!("Failed to create the test result folder {}: {err}", path.display()));
    path
}
