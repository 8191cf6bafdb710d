// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::time::Duration;

/// Doubling backoff with an upper bound.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// and doubles it for the next caller, up to the configured maximum. A
/// successful operation calls [`reset`](Self::reset) to start over from the
/// initial delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    init: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffPolicy {
    /// Creates a policy starting at `init` and capped at `max`.
    pub fn new(init: Duration, max: Duration) -> Self {
        Self {
            init,
            max,
            current: init,
        }
    }

    /// Returns the delay to sleep before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Restores the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.init;
    }
}
