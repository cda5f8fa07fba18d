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

//! States and events of the incoming verification state machine.

use crate::service::SessionVerificationData;

/// The state of the [`super::IncomingVerification`]'s state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// The request has been received and not answered yet.
    Initial {
        /// The request has been cancelled before being accepted, maybe
        /// because another session accepted it.
        is_cancelled: bool,
    },

    /// Accepting the request.
    AcceptingIncomingVerification,

    /// The challenge has been received.
    ChallengeReceived(SessionVerificationData),

    /// The user confirmed the challenge, waiting for the other side.
    AcceptingChallenge(SessionVerificationData),

    /// The user rejected the challenge, waiting for the other side.
    RejectingChallenge(SessionVerificationData),

    /// Cancelling the verification.
    Canceling,

    /// The verification has been cancelled.
    Canceled,

    /// The verification is done.
    Completed,

    /// The verification failed.
    Failure,
}

impl State {
    /// Whether the state machine won't move anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::Failure)
    }
}

/// Events of the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    /// The user accepted the request.
    AcceptIncomingRequest,

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
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Action {
    AcceptVerificationRequest,
    ApproveVerification,
    DeclineVerification,
    CancelVerification,
}

impl State {
    /// Compute the next state for `event`, and the action to run before
    /// entering it.
    ///
    /// Returns `None` if `event` isn't expected in this state.
    pub(super) fn next(&self, event: &Event) -> Option<(State, Option<Action>)> {
        use State::*;

        if self.is_terminal() {
            return None;
        }

        let next = match (self, event) {
            (Initial { .. }, Event::AcceptIncomingRequest) => {
                (AcceptingIncomingVerification, Some(Action::AcceptVerificationRequest))
            }

            (AcceptingIncomingVerification, Event::DidReceiveChallenge(data)) => {
                (ChallengeReceived(data.clone()), None)
            }

            (ChallengeReceived(data), Event::AcceptChallenge) => {
                (AcceptingChallenge(data.clone()), Some(Action::ApproveVerification))
            }

            (ChallengeReceived(data), Event::DeclineChallenge) => {
                (RejectingChallenge(data.clone()), Some(Action::DeclineVerification))
            }

            (AcceptingChallenge(_), Event::DidAcceptChallenge) => (Completed, None),

            (Canceling, Event::Cancel) => return None,
            (_, Event::Cancel) => (Canceling, Some(Action::CancelVerification)),

            (Initial { is_cancelled: true }, Event::DidCancel) => return None,
            (Initial { is_cancelled: false }, Event::DidCancel) => {
                (Initial { is_cancelled: true }, None)
            }
            // Rejecting the challenge ends up cancelling the verification.
            (RejectingChallenge(_), Event::DidCancel) => (Failure, None),
            (_, Event::DidCancel) => (Canceled, None),

            (_, Event::DidFail) => (Failure, None),

            _ => return None,
        };

        Some(next)
    }
}
