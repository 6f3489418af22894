//! Types and re-exported crates that are shared by all `polyfold` crates.

pub mod aabb;
pub mod color;
pub mod indexing_container;

pub use ahash;
pub use byteorder;
pub use chrono;
pub use float_cmp;
pub use log;
pub use nalgebra;
pub use num_cpus;
pub use rayon;
pub use serde_json;
pub use serde_yaml;
pub use thiserror;

pub use color::{ByteColor4, ColorSpace};
pub use indexing_container::{Handle, IndexingContainer};

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

/// Controls whether the intermediate results of the pipeline stages are logged.
///
/// The value is handed to every stage explicitly so that no stage depends on process-wide state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    #[default]
    Quiet,
    Verbose,
}

impl Verbosity {
    /// Returns `true` if intermediate stage output should be surfaced.
    pub fn is_verbose(self) -> bool {
        self == Verbosity::Verbose
    }
}

impl From<bool> for Verbosity {
    fn from(value: bool) -> Self {
        if value {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }
}

/// Logs with `debug!` only when the given [`Verbosity`] is verbose.
#[macro_export]
macro_rules! detail {
    ($verbosity:expr, $($arg:tt)+) => {
        if $crate::Verbosity::is_verbose($verbosity) {
            $crate::log::debug!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_bool() {
        assert_eq!(Verbosity::from(true), Verbosity::Verbose);
        assert_eq!(Verbosity::from(false), Verbosity::Quiet);
        assert!(!Verbosity::default().is_verbose());
    }

    #[test]
    fn function_name_contains_test_name() {
        let name = function_name!();
        assert!(name.ends_with("function_name_contains_test_name"));
    }
}
