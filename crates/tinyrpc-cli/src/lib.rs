// Copyright 2026 tinyrpc Authors
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

//! # tinyrpc CLI
//!
//! Command-line interface for running and exercising tinyrpc servers.
//!
//! ## Key Commands
//!
//! - `tinyrpc serve`: start a server exposing the demo [`arith`] service
//! - `tinyrpc call`: make one call and print the JSON reply
//! - `tinyrpc broadcast`: call every listed server and print one reply

pub mod arith;

use std::time::Duration;
use tinyrpc_common::protocol::Options;
use tinyrpc_common::transport::CodecType;

/// Environment variable holding the default target of `tinyrpc call`.
pub const ADDR_ENV: &str = "TINYRPC_ADDR";

/// Options used by the CLI's outgoing connections.
///
/// Always JSON: the CLI passes arbitrary JSON values through without knowing
/// their Rust types.
pub fn cli_options(handle_timeout_ms: u64) -> Options {
    Options::default()
        .with_codec(CodecType::Json)
        .with_handle_timeout(Duration::from_millis(handle_timeout_ms))
}

/// Resolves the call target: explicit flag first, then [`ADDR_ENV`].
pub fn resolve_addr(flag: Option<String>) -> anyhow::Result<String> {
    flag.or_else(|| std::env::var(ADDR_ENV).ok())
        .ok_or_else(|| anyhow::anyhow!("no target address: pass -d or set {}", ADDR_ENV))
}
