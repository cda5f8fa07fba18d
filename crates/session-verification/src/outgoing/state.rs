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

//! States and events of the outgoing verification state machine.

use crate::service::{SessionVerificationData, VerificationRequest};

/// The state of the [`super::OutgoingVerification`]'s state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Let the user know that they need to get ready on their other session.
    Initial,

    /// Waiting for the verification request to be accepted.
    RequestingVerification(VerificationRequest),

    /// Verification request accepted. Waiting for start.
    VerificationRequestAccepted,

    /// Waiting for the SAS verification to start.
    StartingSasVerification,

    /// A SAS verification flow has been started.
    SasVerificationStarted,

    /// The challenge has been received.
    Verifying(VerifyingState),

    /// The verification has been cancelled, remotely or locally.
    Canceled,

    /// Verification successful.
    Completed,

    /// The flow is over and should be dismissed.
    Exit,
}

/// Sub-states of [`State::Verifying`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyingState {
    /// Verification accepted and challenge received.
    ChallengeReceived(SessionVerificationData),

    /// Replying to a verification challenge.
    Replying {
        /// The challenge being replied to.
        data: SessionVerificationData,
        /// Whether the challenge matched.
        accept: bool,
    },
}

impl VerifyingState {
    /// The challenge that's being verified.
    pub fn data(&self) -> &SessionVerificationData {
        match self {
            Self::ChallengeReceived(data) | Self::Replying { data, .. } => data,
        }
    }
}

/// Events of the state machine, either local user intents or progress
/// reported by the verification service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    /// Request verification.
    RequestVerification(VerificationRequest),

    /// The current verification request has been accepted.
    DidAcceptVerificationRequest,

    /// Start a SAS verification flow.
    StartSasVerification,

    /// A SAS verification flow has started.
    DidStartSasVerification,

    /// The challenge has been received.
    DidReceiveChallenge(SessionVerificationData),

    /// The challenge matches.
    AcceptChallenge,

    /// The challenge doesn't match.
    DeclineChallenge,

    /// The other side accepted the challenge too.
    DidAcceptChallenge,

    /// Request cancellation.
    Cancel,

    /// The verification has been cancelled.
    DidCancel,

    /// The verification failed.
    DidFail,

    /// Reset the verification flow to the initial state.
    Reset,
}

/// What must be done for a transition to happen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Action {
    RequestVerification(VerificationRequest),
    StartSasVerification,
    ReplyToChallenge { accept: bool },
    CancelVerification,
    Reset,
    WaitForBackupRestore,
}

/// A transition of the state machine.
///
/// The action, if any, runs before the next state is published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Transition {
    pub next: State,
    pub action: Option<Action>,
}

impl Transition {
    fn to(next: State) -> Self {
        Self { next, action: None }
    }

    fn with(next: State, action: Action) -> Self {
        Self { next, action: Some(action) }
    }
}

impl State {
    /// Compute the transition triggered by `event`.
    ///
    /// Returns `None` if `event` isn't expected in this state.
    pub(super) fn next(&self, event: &Event) -> Option<Transition> {
        use State::*;

        let transition = match (self, event) {
            (Initial, Event::RequestVerification(request)) => Transition::with(
                RequestingVerification(request.clone()),
                Action::RequestVerification(request.clone()),
            ),

            (RequestingVerification(_), Event::DidAcceptVerificationRequest) => {
                Transition::to(VerificationRequestAccepted)
            }

            (VerificationRequestAccepted, Event::StartSasVerification) => {
                Transition::with(StartingSasVerification, Action::StartSasVerification)
            }

            (SasVerificationStarted, Event::DidReceiveChallenge(data)) => {
                Transition::to(Verifying(VerifyingState::ChallengeReceived(data.clone())))
            }

            (Verifying(VerifyingState::ChallengeReceived(data)), Event::AcceptChallenge) => {
                Transition::with(
                    Verifying(VerifyingState::Replying { data: data.clone(), accept: true }),
                    Action::ReplyToChallenge { accept: true },
                )
            }

            (Verifying(VerifyingState::ChallengeReceived(data)), Event::DeclineChallenge) => {
                Transition::with(
                    Verifying(VerifyingState::Replying { data: data.clone(), accept: false }),
                    Action::ReplyToChallenge { accept: false },
                )
            }

            // If a key backup exists, wait until it's restored or a timeout happens.
            (Verifying(VerifyingState::Replying { .. }), Event::DidAcceptChallenge) => {
                Transition::with(Completed, Action::WaitForBackupRestore)
            }

            (Canceled, Event::Reset) => Transition::with(Initial, Action::Reset),

            (_, Event::DidStartSasVerification) => Transition::to(SasVerificationStarted),

            // Nothing to cancel.
            (Initial | Completed | Canceled, Event::Cancel) => Transition::to(Exit),
            (Exit, Event::Cancel) => return None,
            (_, Event::Cancel) => Transition::with(Canceled, Action::CancelVerification),

            (_, Event::DidCancel | Event::DidFail) => Transition::to(Canceled),

            _ => return None,
        };

        Some(transition)
    }
}
