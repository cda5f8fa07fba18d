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

use std::time::Duration;

/// How long a completed verification waits for the key backup to be restored
/// before reporting completion anyway.
pub const DEFAULT_BACKUP_RESTORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings of an outgoing verification flow.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use session_verification::VerificationSettings;
///
/// let settings = VerificationSettings::new()
///     .show_device_verified_screen(true)
///     .backup_restore_timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerificationSettings {
    pub(crate) backup_restore_timeout: Duration,
    pub(crate) show_device_verified_screen: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            backup_restore_timeout: DEFAULT_BACKUP_RESTORE_TIMEOUT,
            show_device_verified_screen: false,
        }
    }
}

impl VerificationSettings {
    /// Create a new default `VerificationSettings`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Set how long to wait for the recovery state to become enabled once
    /// the other side confirmed the verification, if a key backup exists on
    /// the server.
    ///
    /// The wait is best effort: when it elapses, the verification is
    /// reported as completed all the same.
    #[must_use]
    pub fn backup_restore_timeout(mut self, timeout: Duration) -> Self {
        self.backup_restore_timeout = timeout;
        self
    }

    /// Whether the completed step should be shown when the session is
    /// already verified before any verification was requested.
    ///
    /// When unset, a session verified out of band (for instance on a freshly
    /// created account) skips the flow entirely.
    #[must_use]
    pub fn show_device_verified_screen(mut self, show: bool) -> Self {
        self.show_device_verified_screen = show;
        self
    }
}
