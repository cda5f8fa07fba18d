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

//! Bounded waits.

use std::{future::Future, time::Duration};

use thiserror::Error;

/// Error type notifying that a timeout has elapsed.
#[derive(Debug, Error)]
#[error("timeout elapsed")]
pub struct ElapsedError(());

/// Wait for `future` to be completed, for at most `duration`.
///
/// If `future` doesn't complete before `duration` has elapsed, the future is
/// dropped and an [`ElapsedError`] is returned.
pub async fn timeout<F, T>(future: F, duration: Duration) -> Result<T, ElapsedError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future).await.map_err(|_| ElapsedError(()))
}
