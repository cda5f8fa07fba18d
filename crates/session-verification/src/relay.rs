// Copyright 2024 The Matrix.org Foundation C.I.C.
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
// See the License for that specific language governing permissions and
// limitations under the License.

//! Plumbing shared by the flow controllers: forwarding the service's
//! progress into a flow's event queue, and tearing the flow's tasks down.

use futures_util::{stream::BoxStream, StreamExt as _};
use tokio::{
    sync::mpsc::UnboundedSender,
    task::{spawn, JoinHandle},
};
use tracing::{debug, trace};

use crate::service::VerificationFlowState;

/// Spawn a task forwarding the verification flow states reported by the
/// service into a flow's event queue.
///
/// `map` decides which event, if any, a flow state turns into. The task stops
/// when the service stream ends or when the queue is closed.
pub(crate) fn spawn_flow_state_relay<E, F>(
    mut flow_states: BoxStream<'static, VerificationFlowState>,
    queue: UnboundedSender<E>,
    map: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn(VerificationFlowState) -> Option<E> + Send + 'static,
{
    spawn(async move {
        while let Some(flow_state) = flow_states.next().await {
            debug!(?flow_state, "Verification flow state");

            let Some(event) = map(flow_state) else {
                continue;
            };

            if queue.send(event).is_err() {
                trace!("Event queue closed, stopping the flow state relay");
                break;
            }
        }
    })
}

/// Aborts the tasks of a flow when dropped.
#[derive(Debug)]
pub(crate) struct DropHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DropHandle {
    pub(crate) fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }
}

impl Drop for DropHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
