// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging setup shared by binaries and integration tests.

use env_logger::{Builder, Env};
use log::LevelFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Builds the logger: `RUST_LOG` (or `default_filter`) for everything, errors only
/// for the chatty wgpu internals.
pub fn logger(default_filter: &str) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder
        .filter_module("wgpu_hal", LevelFilter::Error)
        .filter_module("wgpu_core", LevelFilter::Warn)
        .filter_module("naga", LevelFilter::Warn);
    builder
}

/// Installs the global logger. Returns `false` if one was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    logger(default_filter).try_init().is_ok()
}

/// Installs a logger whose output is captured by the test harness.
pub fn init_test_logging() {
    let _ = logger("debug").is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        init_test_logging();
        assert!(!init_logging(DEFAULT_FILTER));
        log::debug!("logger already installed");
    }
}
