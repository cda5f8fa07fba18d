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
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, time::Duration};

use eyeball::Subscriber;
use tracing_subscriber::{fmt, EnvFilter};

mod incoming;

/// Log to the test output, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

/// Wait until `subscriber` observes `expected`.
///
/// Intermediate values may be skipped, since observables only keep the latest
/// value.
async fn wait_for<T>(subscriber: &mut Subscriber<T>, expected: T)
where
    T: Clone + Debug + PartialEq,
{
    let mut current = subscriber.next_now();

    let found = tokio::time::timeout(Duration::from_secs(60), async {
        while current != expected {
            match subscriber.next().await {
                Some(value) => current = value,
                None => return false,
            }
        }
        true
    })
    .await;

    assert_eq!(found, Ok(true), "never observed {expected:?}, last value: {:?}", subscriber.get());
}
