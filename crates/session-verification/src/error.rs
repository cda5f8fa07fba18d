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

use ruma::OwnedUserId;
use thiserror::Error;

/// Result type alias for the verification flows.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors for the verification flow controllers.
#[derive(Debug, Error)]
pub enum Error {
    /// The flow has been torn down, its event queue doesn't accept actions
    /// anymore.
    #[error("the verification flow has been torn down")]
    FlowClosed,
}

/// Errors reported by a [`VerificationService`] or a [`RecoveryService`]
/// implementation.
///
/// The flows never propagate these to their callers: a failing service call
/// is logged and handled as if the service had reported a failure of the
/// verification.
///
/// [`VerificationService`]: crate::service::VerificationService
/// [`RecoveryService`]: crate::service::RecoveryService
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service isn't ready yet, usually because the first sync didn't
    /// complete.
    #[error("the verification service isn't ready yet")]
    NotReady,

    /// A verification request is already in progress and isn't done nor
    /// cancelled.
    #[error("there is another verification flow ongoing")]
    FlowOngoing,

    /// The cryptographic identity of the user couldn't be found.
    #[error("unknown user identity for {0}")]
    UnknownUserIdentity(OwnedUserId),

    /// The user to verify is already verified.
    #[error("user {0} is already verified")]
    AlreadyVerified(OwnedUserId),

    /// An action required an ongoing verification request, but there's none.
    #[error("verification request missing")]
    MissingVerificationRequest,

    /// An action required an ongoing SAS verification, but there's none.
    #[error("SAS verification missing")]
    MissingSasVerification,

    /// Any other error from the underlying implementation.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ServiceError {
    /// Wrap an arbitrary error from a service implementation.
    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(error))
    }
}
