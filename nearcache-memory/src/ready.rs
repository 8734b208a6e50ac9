// Copyright 2025 foyer Project Authors
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

use nearcache_common::error::{Error, ErrorKind, Result};
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum GateState {
    Pending,
    Ready,
    Failed(Error),
}

/// One-shot readiness signal.
///
/// The gate starts pending and is resolved exactly once, either ready or failed. Every waiter, including the ones
/// arriving after resolution, observes the same outcome.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<GateState>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    /// Create a pending gate.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// Resolve the gate. Returns `false` if it was already resolved, the outcome is left untouched then.
    pub fn resolve(&self, outcome: Result<()>) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|state| {
            if !matches!(state, GateState::Pending) {
                return false;
            }
            *state = match outcome.take() {
                Some(Ok(())) => GateState::Ready,
                Some(Err(e)) => GateState::Failed(e),
                None => return false,
            };
            true
        })
    }

    /// Whether the gate has been resolved.
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.tx.borrow(), GateState::Pending)
    }

    /// Wait until the gate is resolved and return its outcome.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, GateState::Pending))
            .await
            .map_err(|e| Error::new(ErrorKind::Closed, "readiness gate dropped").with_source(e))?;
        match &*state {
            GateState::Ready => Ok(()),
            GateState::Failed(e) => Err(e.clone()),
            GateState::Pending => Err(Error::new(ErrorKind::NotReady, "near cache is not ready")),
        }
    }
}
