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

//! Demo `Arith` service served by `tinyrpc serve`.
//!
//! | method | args | reply |
//! |---|---|---|
//! | `Arith.Sum` | `{"num1": a, "num2": b}` | `a + b` |
//! | `Arith.Mul` | `{"num1": a, "num2": b}` | `a * b` |
//! | `Arith.Div` | `{"num1": a, "num2": b}` | `a / b`, error on `b == 0` |
//! | `Arith.Sleep` | milliseconds | the same number, after sleeping |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tinyrpc_common::protocol::error::Result;
use tinyrpc_server::Service;

pub struct Arith;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

impl Arith {
    fn sum(&self, args: Args, reply: &mut i64) -> anyhow::Result<()> {
        *reply = args
            .num1
            .checked_add(args.num2)
            .ok_or_else(|| anyhow::anyhow!("integer overflow"))?;
        Ok(())
    }

    fn mul(&self, args: Args, reply: &mut i64) -> anyhow::Result<()> {
        *reply = args
            .num1
            .checked_mul(args.num2)
            .ok_or_else(|| anyhow::anyhow!("integer overflow"))?;
        Ok(())
    }

    fn div(&self, args: Args, reply: &mut i64) -> anyhow::Result<()> {
        if args.num2 == 0 {
            anyhow::bail!("divide by zero");
        }
        *reply = args
            .num1
            .checked_div(args.num2)
            .ok_or_else(|| anyhow::anyhow!("integer overflow"))?;
        Ok(())
    }

    fn sleep(&self, millis: u64, reply: &mut u64) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(millis));
        *reply = millis;
        Ok(())
    }
}

/// Builds the `Arith` service.
pub fn service() -> Result<Service> {
    Ok(Service::builder(Arith)
        .method("Sum", Arith::sum)?
        .method("Mul", Arith::mul)?
        .method("Div", Arith::div)?
        .method("Sleep", Arith::sleep)?
        .build())
}
