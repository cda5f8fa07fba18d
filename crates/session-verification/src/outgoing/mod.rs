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

//! Verification of the current session, or of another user, initiated by
//! this client.
//!
//! An [`OutgoingVerification`] runs a state machine which is fed with two
//! kinds of events, queued in a single event queue and processed one at a
//! time:
//!
//! - the intents of the user, sent with
//!   [`OutgoingVerification::handle_action()`],
//! - the progress reported by the [`VerificationService`].
//!
//! The state of the machine, combined with the verified status of the
//! session, gives the [`Step`] that should be presented to the user.
//!
//! Dropping the [`OutgoingVerification`] tears the flow down: the service
//! isn't observed anymore and a pending wait for the key backup is abandoned.

use std::{sync::Arc, time::Duration};

use eyeball::{SharedObservable, Subscriber};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::spawn,
};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    config::VerificationSettings,
    error::{Error, Result},
    relay::{spawn_flow_state_relay, DropHandle},
    service::{
        RecoveryService, RecoveryState, SessionVerificationData, SessionVerifiedStatus,
        VerificationFlowState, VerificationRequest, VerificationService,
    },
    timeout::timeout,
};

mod state;

pub(crate) use self::state::Event;
use self::state::{Action, Transition};
pub use self::state::{State, VerifyingState};

/// The step of an outgoing verification, as presented to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The verified status of the session isn't known yet.
    Loading,

    /// Nothing happened yet.
    Initial,

    /// Waiting for the other session or user to answer.
    AwaitingOtherDeviceResponse,

    /// The request has been accepted, the SAS verification can be started.
    Ready,

    /// The challenge must be compared.
    Verifying {
        /// The challenge.
        data: SessionVerificationData,
        /// Whether a reply to the challenge is in flight.
        state: ReplyState,
    },

    /// The verification has been cancelled.
    Canceled,

    /// The verification is done.
    Completed,

    /// The flow should be dismissed.
    Exit,
}

/// Whether a reply to the challenge is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyState {
    /// The user didn't reply yet.
    Uninitialized,
    /// The reply has been sent, waiting for the other side.
    Loading,
}

/// The intents of the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    /// Send the verification request.
    RequestVerification,
    /// Start the SAS verification once the request has been accepted.
    StartSasVerification,
    /// The challenge matches.
    ConfirmVerification,
    /// The challenge doesn't match.
    DeclineVerification,
    /// Cancel the verification, or leave the flow if there's nothing to
    /// cancel.
    Cancel,
    /// Get back to the initial step after a cancellation.
    Reset,
}

/// A verification flow initiated by this client.
///
/// [`OutgoingVerification::handle_action()`] is the only way to act on the
/// flow, the state machine's events can't be sent directly:
///
/// ```compile_fail
/// # async fn example(flow: session_verification::OutgoingVerification) {
/// use session_verification::outgoing::Event;
///
/// flow.dispatch(Event::DidStartSasVerification).unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct OutgoingVerification {
    /// What's being verified.
    request: VerificationRequest,

    /// The state of the state machine. Only written by the event loop.
    state: SharedObservable<State>,

    /// The step derived from the state. Only written by the step task.
    step: SharedObservable<Step>,

    /// The event queue of the state machine.
    queue: UnboundedSender<Event>,

    /// Handle on the tasks of the flow.
    _drop_handle: DropHandle,
}

impl OutgoingVerification {
    /// Create a new builder for an `OutgoingVerification`.
    pub fn builder(
        service: Arc<dyn VerificationService>,
        recovery: Arc<dyn RecoveryService>,
        request: VerificationRequest,
    ) -> OutgoingVerificationBuilder {
        OutgoingVerificationBuilder::new(service, recovery, request)
    }

    /// What this flow verifies.
    pub fn request(&self) -> &VerificationRequest {
        &self.request
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

        let event = match action {
            UserAction::RequestVerification => Event::RequestVerification(self.request.clone()),
            UserAction::StartSasVerification => Event::StartSasVerification,
            UserAction::ConfirmVerification => Event::AcceptChallenge,
            UserAction::DeclineVerification => Event::DeclineChallenge,
            UserAction::Cancel => Event::Cancel,
            UserAction::Reset => Event::Reset,
        };

        self.dispatch(event)
    }

    /// Queue an event for the state machine.
    ///
    /// Only user actions and the progress of the service feed the state
    /// machine, so this stays private to the crate.
    pub(crate) fn dispatch(&self, event: Event) -> Result<()> {
        self.queue.send(event).map_err(|_| Error::FlowClosed)
    }
}

/// Builder for an [`OutgoingVerification`].
#[derive(Clone, Debug)]
pub struct OutgoingVerificationBuilder {
    service: Arc<dyn VerificationService>,
    recovery: Arc<dyn RecoveryService>,
    request: VerificationRequest,
    settings: VerificationSettings,
}

impl OutgoingVerificationBuilder {
    fn new(
        service: Arc<dyn VerificationService>,
        recovery: Arc<dyn RecoveryService>,
        request: VerificationRequest,
    ) -> Self {
        Self { service, recovery, request, settings: VerificationSettings::default() }
    }

    /// Replace all the settings at once.
    #[must_use]
    pub fn settings(mut self, settings: VerificationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// See [`VerificationSettings::show_device_verified_screen`].
    #[must_use]
    pub fn show_device_verified_screen(mut self, show: bool) -> Self {
        self.settings = self.settings.show_device_verified_screen(show);
        self
    }

    /// See [`VerificationSettings::backup_restore_timeout`].
    #[must_use]
    pub fn backup_restore_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.backup_restore_timeout(timeout);
        self
    }

    /// Finish setting up the `OutgoingVerification` and start its tasks.
    ///
    /// The service is reset first, cancelling any pending verification
    /// attempt, in case it was left in a broken state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> OutgoingVerification {
        let Self { service, recovery, request, settings } = self;

        let state = SharedObservable::new(State::Initial);

        let session_verified_status = service.session_verified_status();
        let step = SharedObservable::new(compute_step(
            &request,
            session_verified_status.get(),
            &State::Initial,
            settings.show_device_verified_screen,
        ));

        let (queue, receiver) = unbounded_channel();

        // Subscribe right away, so that no update is missed while the tasks are
        // being scheduled.
        let relay_task = spawn_flow_state_relay(
            service.verification_flow_state(),
            queue.clone(),
            event_for_flow_state,
        );

        let step_task = spawn(run_step_task(
            request.clone(),
            settings.show_device_verified_screen,
            state.subscribe(),
            session_verified_status,
            step.clone(),
        ));

        let event_loop =
            EventLoop { service, recovery, settings, state: state.clone(), receiver };
        let event_loop_task = spawn(event_loop.run());

        OutgoingVerification {
            request,
            state,
            step,
            queue,
            _drop_handle: DropHandle::new(vec![relay_task, step_task, event_loop_task]),
        }
    }
}

/// Relay the progress of the service to the state machine.
fn event_for_flow_state(flow_state: VerificationFlowState) -> Option<Event> {
    Some(match flow_state {
        VerificationFlowState::Initial => Event::Reset,
        VerificationFlowState::DidAcceptVerificationRequest => Event::DidAcceptVerificationRequest,
        VerificationFlowState::DidStartSasVerification => Event::DidStartSasVerification,
        VerificationFlowState::DidReceiveVerificationData(data) => Event::DidReceiveChallenge(data),
        VerificationFlowState::DidFinish => Event::DidAcceptChallenge,
        VerificationFlowState::DidCancel => Event::DidCancel,
        VerificationFlowState::DidFail => Event::DidFail,
    })
}

/// Derive the step to present.
fn compute_step(
    request: &VerificationRequest,
    session_verified_status: SessionVerifiedStatus,
    state: &State,
    show_device_verified_screen: bool,
) -> Step {
    // The verified status only says something about the current session.
    if *request != VerificationRequest::CurrentSession {
        return step_for_state(state);
    }

    match session_verified_status {
        SessionVerifiedStatus::Unknown => Step::Loading,
        SessionVerifiedStatus::NotVerified => step_for_state(state),
        SessionVerifiedStatus::Verified => {
            if *state != State::Initial || show_device_verified_screen {
                Step::Completed
            } else {
                // Verified automatically, for instance on a freshly created account: skip the
                // flow.
                Step::Exit
            }
        }
    }
}

fn step_for_state(state: &State) -> Step {
    match state {
        State::Initial => Step::Initial,
        State::RequestingVerification(_)
        | State::StartingSasVerification
        | State::SasVerificationStarted => Step::AwaitingOtherDeviceResponse,
        State::VerificationRequestAccepted => Step::Ready,
        State::Verifying(verifying) => {
            let state = match verifying {
                VerifyingState::ChallengeReceived(_) => ReplyState::Uninitialized,
                VerifyingState::Replying { .. } => ReplyState::Loading,
            };
            Step::Verifying { data: verifying.data().clone(), state }
        }
        State::Canceled => Step::Canceled,
        State::Completed => Step::Completed,
        State::Exit => Step::Exit,
    }
}

/// Keep the step up to date with the state and the verified status.
#[instrument(skip_all)]
async fn run_step_task(
    request: VerificationRequest,
    show_device_verified_screen: bool,
    mut states: Subscriber<State>,
    mut session_verified_status: Subscriber<SessionVerifiedStatus>,
    step: SharedObservable<Step>,
) {
    let mut state = states.next_now();
    let mut status = session_verified_status.next_now();

    loop {
        let new_step = compute_step(&request, status, &state, show_device_verified_screen);
        if let Some(previous) = step.set_if_not_eq(new_step) {
            trace!(?previous, step = ?step.get(), "Verification step changed");
        }

        tokio::select! {
            Some(new_state) = states.next() => state = new_state,
            Some(new_status) = session_verified_status.next() => status = new_status,
            else => break,
        }
    }
}

/// The single consumer of the event queue, and the only writer of the state.
struct EventLoop {
    service: Arc<dyn VerificationService>,
    recovery: Arc<dyn RecoveryService>,
    settings: VerificationSettings,
    state: SharedObservable<State>,
    receiver: UnboundedReceiver<Event>,
}

impl EventLoop {
    #[instrument(skip_all)]
    async fn run(mut self) {
        // Force reset, just in case the service was left in a broken state.
        if let Err(error) = self.service.reset(true).await {
            warn!("Failed to reset the verification service: {error}");
        }

        while let Some(event) = self.receiver.recv().await {
            let mut next_event = Some(event);

            while let Some(event) = next_event.take() {
                next_event = self.process(event).await;
            }
        }

        trace!("Event queue closed, stopping the verification flow");
    }

    /// Apply `event` to the state machine.
    ///
    /// Returns the event to process right after, if the action of the
    /// transition failed.
    async fn process(&mut self, event: Event) -> Option<Event> {
        let current = self.state.get();

        let Some(Transition { next, action }) = current.next(&event) else {
            warn!(state = ?current, ?event, "Ignoring an event that isn't expected in this state");
            return None;
        };

        let follow_up = match action {
            Some(action) => self.run_action(action).await,
            None => None,
        };

        debug!(from = ?current, to = ?next, "Verification state changed");
        self.state.set_if_not_eq(next);

        follow_up
    }

    async fn run_action(&self, action: Action) -> Option<Event> {
        trace!(?action, "Running action");

        let result = match action {
            Action::RequestVerification(VerificationRequest::CurrentSession) => {
                self.service.request_current_session_verification().await
            }
            Action::RequestVerification(VerificationRequest::User(user_id)) => {
                self.service.request_user_verification(&user_id).await
            }
            Action::StartSasVerification => self.service.start_verification().await,
            Action::ReplyToChallenge { accept: true } => self.service.approve_verification().await,
            Action::ReplyToChallenge { accept: false } => {
                self.service.decline_verification().await
            }
            Action::CancelVerification => self.service.cancel_verification().await,
            Action::Reset => {
                if let Err(error) = self.service.reset(false).await {
                    warn!("Failed to reset the verification service: {error}");
                }
                return None;
            }
            Action::WaitForBackupRestore => {
                wait_for_backup_restore(
                    self.recovery.as_ref(),
                    self.settings.backup_restore_timeout,
                )
                .await;
                return None;
            }
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

/// If a key backup exists on the server, wait until the recovery is enabled,
/// for at most `duration`.
///
/// This is best effort: any error, including the timeout, is only logged.
async fn wait_for_backup_restore(recovery: &dyn RecoveryService, duration: Duration) {
    let has_backup = match recovery.does_backup_exist_on_server().await {
        Ok(exists) => exists,
        Err(error) => {
            warn!("Couldn't check whether a key backup exists on the server: {error}");
            false
        }
    };

    if !has_backup {
        return;
    }

    let mut recovery_state = recovery.recovery_state();
    let enabled = async move {
        let mut current = recovery_state.next_now();

        while current != RecoveryState::Enabled {
            match recovery_state.next().await {
                Some(state) => current = state,
                None => return false,
            }
        }

        true
    };

    match timeout(enabled, duration).await {
        Ok(true) => debug!("Key backup restored"),
        Ok(false) => warn!("The recovery state stopped being reported before being enabled"),
        Err(_) => warn!(?duration, "Timed out waiting for the key backup to be restored"),
    }
}
