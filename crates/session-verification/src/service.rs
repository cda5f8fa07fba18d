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

//! The collaborators the verification flows are built upon.
//!
//! The flows don't perform any cryptography nor any network request
//! themselves: a [`VerificationService`] runs the verification protocol and
//! reports its progress through [`VerificationService::verification_flow_state`],
//! while a [`RecoveryService`] tells whether a server-side key backup exists
//! and whether it has been restored.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use eyeball::Subscriber;
use futures_util::stream::BoxStream;
use ruma::{MilliSecondsSinceUnixEpoch, OwnedDeviceId, OwnedUserId, UserId};

use crate::error::ServiceError;

/// What an outgoing verification flow wants to verify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationRequest {
    /// Verify the current session using another session of the same user.
    CurrentSession,

    /// Verify the identity of another user.
    User(OwnedUserId),
}

/// An emoji of the short authentication string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationEmoji {
    /// Index of the emoji in the SAS emoji table, between 0 and 63.
    pub number: u8,
    /// The emoji itself.
    pub symbol: String,
    /// An English description of the emoji.
    pub description: String,
}

/// The challenge both sides of a SAS verification must compare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionVerificationData {
    /// Seven emojis.
    Emojis(Vec<VerificationEmoji>),

    /// Three numbers between 1000 and 9191.
    Decimals(Vec<u16>),
}

impl fmt::Display for SessionVerificationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emojis(emojis) => {
                for (index, emoji) in emojis.iter().enumerate() {
                    if index > 0 {
                        f.write_str("  ")?;
                    }
                    write!(f, "{} ({})", emoji.symbol, emoji.description)?;
                }
                Ok(())
            }
            Self::Decimals(values) => {
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Whether the current session is verified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionVerifiedStatus {
    /// The service doesn't know yet.
    #[default]
    Unknown,
    /// The session isn't verified.
    NotVerified,
    /// The session is verified.
    Verified,
}

/// The progress of the verification protocol, as reported by the
/// [`VerificationService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationFlowState {
    /// No verification is running, or the service has been reset.
    Initial,
    /// The other side accepted the verification request.
    DidAcceptVerificationRequest,
    /// A SAS verification has started.
    DidStartSasVerification,
    /// The keys have been exchanged, the challenge can be compared.
    DidReceiveVerificationData(SessionVerificationData),
    /// Both sides confirmed the challenge, the verification is done.
    DidFinish,
    /// The verification has been cancelled.
    DidCancel,
    /// The verification failed.
    DidFail,
}

/// The states the recovery subsystem can be in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryState {
    /// We didn't yet inform ourselves about the state of things.
    #[default]
    Unknown,
    /// Secret storage is set up and we have all the secrets locally.
    Enabled,
    /// No default secret storage key exists or it is disabled explicitly.
    Disabled,
    /// Secret storage is set up but we're missing some secrets.
    Incomplete,
}

/// Details about an incoming verification request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionVerificationRequestDetails {
    /// The user requesting verification.
    pub sender_id: OwnedUserId,
    /// The ID that uniquely identifies the verification flow.
    pub flow_id: String,
    /// The device requesting verification.
    pub device_id: OwnedDeviceId,
    /// The display name of the device, if any.
    pub display_name: Option<String>,
    /// First time this device was seen.
    pub first_seen_timestamp: MilliSecondsSinceUnixEpoch,
}

/// The service running the verification protocol.
///
/// Every method only *initiates* the corresponding step: its outcome is
/// reported asynchronously through [`Self::verification_flow_state`].
#[async_trait]
pub trait VerificationService: Debug + Send + Sync {
    /// Request verification for the current session.
    async fn request_current_session_verification(&self) -> Result<(), ServiceError>;

    /// Request verification for the given user.
    async fn request_user_verification(&self, user_id: &UserId) -> Result<(), ServiceError>;

    /// Set the given incoming request as the active one, so that its progress
    /// gets reported.
    async fn acknowledge_verification_request(
        &self,
        details: &SessionVerificationRequestDetails,
    ) -> Result<(), ServiceError>;

    /// Accept the previously acknowledged incoming request.
    async fn accept_verification_request(&self) -> Result<(), ServiceError>;

    /// Transition the current verification request into a SAS verification.
    async fn start_verification(&self) -> Result<(), ServiceError>;

    /// Confirm that the short authentication strings match.
    async fn approve_verification(&self) -> Result<(), ServiceError>;

    /// Reject the short authentication string.
    async fn decline_verification(&self) -> Result<(), ServiceError>;

    /// Cancel the current verification request.
    async fn cancel_verification(&self) -> Result<(), ServiceError>;

    /// Get back to [`VerificationFlowState::Initial`], optionally cancelling
    /// the verification attempt that's in progress.
    async fn reset(&self, cancel_any_pending_verification_attempt: bool)
        -> Result<(), ServiceError>;

    /// Get a subscriber to the verified status of the current session.
    fn session_verified_status(&self) -> Subscriber<SessionVerifiedStatus>;

    /// Get a stream of the protocol progress, starting with the next update.
    fn verification_flow_state(&self) -> BoxStream<'static, VerificationFlowState>;
}

/// The service managing the server-side key backup and secret storage.
#[async_trait]
pub trait RecoveryService: Debug + Send + Sync {
    /// Does a key backup exist on the homeserver?
    async fn does_backup_exist_on_server(&self) -> Result<bool, ServiceError>;

    /// Get a subscriber to the state of the recovery subsystem.
    fn recovery_state(&self) -> Subscriber<RecoveryState>;
}
