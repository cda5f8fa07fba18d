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

//! Answering a verification request sent by another session or user.
//!
//! The request is acknowledged as soon as the [`IncomingVerification`] is
//! built. Nothing else happens until the user accepts it; when the flow is
//! over, or when the user ignores the request, the
//! [`IncomingVerificationNavigator`] is told to leave the flow.

use std::{fmt, sync::Arc};

use eyeball::{SharedObservable, Subscriber};
use ruma::{MilliSecondsSinceUnixEpoch, OwnedDeviceId};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::spawn,
};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    error::{Error, Result},
    relay::{spawn_flow_state_relay, DropHandle},
    service::{
        SessionVerificationData, SessionVerificationRequestDetails, VerificationFlowState,
        VerificationService,
    },
};

mod state;

use self::state::{Action, Event};
pub use self::state::State;

/// Called when an incoming verification flow should be left.
pub trait IncomingVerificationNavigator: Send + Sync {
    /// The flow is over, or the user doesn't want to answer the request.
    fn on_finish(&self);
}

impl<F> IncomingVerificationNavigator for F
where
    F: Fn() + Send + Sync,
{
    fn on_finish(&self) {
        self()
    }
}

/// The step of an incoming verification, as presented to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The request can be accepted or ignored.
    Initial {
        /// The display name of the requesting device, or its ID if it has
        /// none.
        device_display_name: String,
        /// The requesting device.
        device_id: OwnedDeviceId,
        /// When the requesting device was first seen.
        first_seen_timestamp: MilliSecondsSinceUnixEpoch,
        /// Whether an answer to the request is in flight.
        is_waiting: bool,
    },

    /// The challenge must be compared.
    Verifying {
        /// The challenge.
        data: SessionVerificationData,
        /// Whether a reply to the challenge is in flight.
        is_waiting: bool,
    },

    /// The verification has been cancelled.
    Canceled,

    /// The verification is done.
    Completed,

    /// The verification failed.
    Failure,
}

/// The intents of the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    /// Accept the request.
    StartVerification,
    /// Leave the request unanswered.
    IgnoreVerification,
    /// The challenge matches.
    ConfirmVerification,
    /// The challenge doesn't match.
    DeclineVerification,
    /// Leave the current step.
    GoBack,
}

/// A verification flow initiated by another session or user.
///
/// It is driven by [`IncomingVerification::handle_action()`] and by the
/// progress of the service only:
///
/// ```compile_fail
/// # fn example(flow: session_verification::IncomingVerification) {
/// use session_verification::incoming::Event;
///
/// flow.dispatch(Event::DidAcceptChallenge).unwrap();
/// # }
/// ```
pub struct IncomingVerification {
    details: SessionVerificationRequestDetails,
    state: SharedObservable<State>,
    step: SharedObservable<Step>,
    queue: UnboundedSender<Event>,
    navigator: Arc<dyn IncomingVerificationNavigator>,
    _drop_handle: DropHandle,
}

impl fmt::Debug for IncomingVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingVerification")
            .field("details", &self.details)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl IncomingVerification {
    /// Start answering the request described by `details`.
    ///
    /// The service is reset, without cancelling anything, and the request is
    /// acknowledged so that its progress gets reported.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        service: Arc<dyn VerificationService>,
        details: SessionVerificationRequestDetails,
        navigator: Arc<dyn IncomingVerificationNavigator>,
    ) -> Self {
        let initial = State::Initial { is_cancelled: false };
        let state = SharedObservable::new(initial.clone());
        let step = SharedObservable::new(compute_step(&initial, &details));

        let (queue, receiver) = unbounded_channel();

        let relay_task = spawn_flow_state_relay(
            service.verification_flow_state(),
            queue.clone(),
            event_for_flow_state,
        );

        let event_loop = EventLoop {
            service,
            details: details.clone(),
            navigator: navigator.clone(),
            state: state.clone(),
            step: step.clone(),
            receiver,
        };
        let event_loop_task = spawn(event_loop.run());

        Self {
            details,
            state,
            step,
            queue,
            navigator,
            _drop_handle: DropHandle::new(vec![relay_task, event_loop_task]),
        }
    }

    /// The request being answered.
    pub fn details(&self) -> &SessionVerificationRequestDetails {
        &self.details
    }

    /// Get a subscriber to the step to present.
    pub fn step(&self) -> Subscriber<Step> {
        self.step.subscribe()
    }

    /// Get the step to present right now.
    pub fn current_step(&self) -> Step {
        self.step.get()
    }

    /// Get a subscriber to the state of the state machine.
    pub fn state(&self) -> Subscriber<State> {
        self.state.subscribe()
    }

    /// Handle an intent of the user.
    pub fn handle_action(&self, action: UserAction) -> Result<()> {
        debug!(?action, "Verification user action");

        match action {
            UserAction::StartVerification => self.dispatch(Event::AcceptIncomingRequest),
            UserAction::IgnoreVerification => {
                self.navigator.on_finish();
                Ok(())
            }
            UserAction::ConfirmVerification => self.dispatch(Event::AcceptChallenge),
            UserAction::DeclineVerification => self.dispatch(Event::DeclineChallenge),
            UserAction::GoBack => match self.step.get() {
                Step::Initial { is_waiting: true, .. } => self.dispatch(Event::Cancel),
                Step::Verifying { is_waiting: true, .. } => {
                    trace!("Going back while waiting for the other side, ignoring");
                    Ok(())
                }
                Step::Verifying { is_waiting: false, .. } => {
                    self.dispatch(Event::DeclineChallenge)
                }
                Step::Initial { is_waiting: false, .. }
                | Step::Canceled
                | Step::Completed
                | Step::Failure => {
                    self.navigator.on_finish();
                    Ok(())
                }
            },
        }
    }

    fn dispatch(&self, event: Event) -> Result<()> {
        self.queue.send(event).map_err(|_| Error::FlowClosed)
    }
}

fn event_for_flow_state(flow_state: VerificationFlowState) -> Option<Event> {
    match flow_state {
        VerificationFlowState::Initial
        | VerificationFlowState::DidAcceptVerificationRequest
        | VerificationFlowState::DidStartSasVerification => None,
        VerificationFlowState::DidReceiveVerificationData(data) => {
            Some(Event::DidReceiveChallenge(data))
        }
        VerificationFlowState::DidFinish => Some(Event::DidAcceptChallenge),
        // Can happen when the other side cancels the request, when another session
        // accepted the request, or after the user rejected the challenge.
        VerificationFlowState::DidCancel => Some(Event::DidCancel),
        VerificationFlowState::DidFail => Some(Event::DidFail),
    }
}

fn compute_step(state: &State, details: &SessionVerificationRequestDetails) -> Step {
    match state {
        State::Initial { .. } | State::AcceptingIncomingVerification => Step::Initial {
            device_display_name: details
                .display_name
                .clone()
                .unwrap_or_else(|| details.device_id.to_string()),
            device_id: details.device_id.clone(),
            first_seen_timestamp: details.first_seen_timestamp,
            is_waiting: *state == State::AcceptingIncomingVerification,
        },
        State::ChallengeReceived(data) => Step::Verifying { data: data.clone(), is_waiting: false },
        State::AcceptingChallenge(data) | State::RejectingChallenge(data) => {
            Step::Verifying { data: data.clone(), is_waiting: true }
        }
        State::Canceling | State::Failure => Step::Failure,
        State::Canceled => Step::Canceled,
        State::Completed => Step::Completed,
    }
}

struct EventLoop {
    service: Arc<dyn VerificationService>,
    details: SessionVerificationRequestDetails,
    navigator: Arc<dyn IncomingVerificationNavigator>,
    state: SharedObservable<State>,
    step: SharedObservable<Step>,
    receiver: UnboundedReceiver<Event>,
}

impl EventLoop {
    #[instrument(skip_all, fields(flow_id = %self.details.flow_id))]
    async fn run(mut self) {
        // Force reset, just in case the service was left in a broken state.
        if let Err(error) = self.service.reset(false).await {
            warn!("Failed to reset the verification service: {error}");
        }

        // Acknowledge the request right now.
        let mut next_event = match self.service.acknowledge_verification_request(&self.details).await
        {
            Ok(()) => None,
            Err(error) => {
                error!("Failed to acknowledge the verification request: {error}");
                Some(Event::DidFail)
            }
        };

        loop {
            let event = match next_event.take() {
                Some(event) => event,
                None => match self.receiver.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            next_event = self.process(event).await;
        }

        trace!("Event queue closed, stopping the verification flow");
    }

    async fn process(&mut self, event: Event) -> Option<Event> {
        let current = self.state.get();

        let Some((next, action)) = current.next(&event) else {
            warn!(state = ?current, ?event, "Ignoring an event that isn't expected in this state");
            return None;
        };

        let follow_up = match action {
            Some(action) => self.run_action(action).await,
            None => None,
        };

        debug!(from = ?current, to = ?next, "Verification state changed");
        self.step.set_if_not_eq(compute_step(&next, &self.details));
        let changed = self.state.set_if_not_eq(next.clone()).is_some();

        if changed && next == (State::Initial { is_cancelled: true }) {
            // Cancelled before being accepted, maybe because another session accepted it.
            self.navigator.on_finish();
        }

        follow_up
    }

    async fn run_action(&self, action: Action) -> Option<Event> {
        trace!(?action, "Running action");

        let result = match action {
            Action::AcceptVerificationRequest => self.service.accept_verification_request().await,
            Action::ApproveVerification => self.service.approve_verification().await,
            Action::DeclineVerification => self.service.decline_verification().await,
            Action::CancelVerification => self.service.cancel_verification().await,
        };

        match result {
            Ok(()) => None,
            Err(error) => {
                error!("Failed to verify session: {error}");
                Some(Event::DidFail)
            }
        }
    }
}
