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

//! In-memory implementations of the services, to drive the flows in tests.

use std::{future::ready, sync::Mutex};

use async_trait::async_trait;
use eyeball::{SharedObservable, Subscriber};
use futures_util::{stream::BoxStream, StreamExt as _};
use ruma::{OwnedUserId, UserId};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::{
    error::ServiceError,
    service::{
        RecoveryService, RecoveryState, SessionVerificationData, SessionVerificationRequestDetails,
        SessionVerifiedStatus, VerificationEmoji, VerificationFlowState, VerificationService,
    },
};

/// A call made to the [`FakeVerificationService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceCall {
    /// [`VerificationService::request_current_session_verification`].
    RequestCurrentSessionVerification,
    /// [`VerificationService::request_user_verification`].
    RequestUserVerification(OwnedUserId),
    /// [`VerificationService::acknowledge_verification_request`], with the
    /// flow ID of the request.
    AcknowledgeVerificationRequest(String),
    /// [`VerificationService::accept_verification_request`].
    AcceptVerificationRequest,
    /// [`VerificationService::start_verification`].
    StartVerification,
    /// [`VerificationService::approve_verification`].
    ApproveVerification,
    /// [`VerificationService::decline_verification`].
    DeclineVerification,
    /// [`VerificationService::cancel_verification`].
    CancelVerification,
    /// [`VerificationService::reset`].
    Reset {
        /// The argument of the call.
        cancel_any_pending_verification_attempt: bool,
    },
}

/// A [`VerificationService`] recording the calls it receives, whose progress
/// is emitted by hand.
#[derive(Debug)]
pub struct FakeVerificationService {
    session_verified_status: SharedObservable<SessionVerifiedStatus>,
    flow_states: broadcast::Sender<VerificationFlowState>,
    last_flow_state: Mutex<VerificationFlowState>,
    calls: Mutex<Vec<ServiceCall>>,
    failing_calls: Mutex<Vec<(ServiceCall, fn() -> ServiceError)>>,
}

impl Default for FakeVerificationService {
    fn default() -> Self {
        Self::new(SessionVerifiedStatus::NotVerified)
    }
}

impl FakeVerificationService {
    /// Create a new service reporting the given verified status.
    pub fn new(session_verified_status: SessionVerifiedStatus) -> Self {
        let (flow_states, _) = broadcast::channel(16);

        Self {
            session_verified_status: SharedObservable::new(session_verified_status),
            flow_states,
            last_flow_state: Mutex::new(VerificationFlowState::Initial),
            calls: Mutex::new(Vec::new()),
            failing_calls: Mutex::new(Vec::new()),
        }
    }

    /// Report a new verified status for the session.
    pub fn set_session_verified_status(&self, status: SessionVerifiedStatus) {
        self.session_verified_status.set(status);
    }

    /// Report progress of the verification.
    pub fn emit_verification_flow_state(&self, flow_state: VerificationFlowState) {
        trace!(?flow_state, "Emitting verification flow state");
        *self.last_flow_state.lock().unwrap() = flow_state.clone();
        // Nobody listening is fine.
        let _ = self.flow_states.send(flow_state);
    }

    /// Make every future call equal to `call` fail with
    /// [`ServiceError::NotReady`].
    pub fn fail_on(&self, call: ServiceCall) {
        self.fail_on_with(call, || ServiceError::NotReady);
    }

    /// Make every future call equal to `call` fail with the error built by
    /// `error`.
    pub fn fail_on_with(&self, call: ServiceCall, error: fn() -> ServiceError) {
        self.failing_calls.lock().unwrap().push((call, error));
    }

    /// All the calls received so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times `call` has been received.
    pub fn call_count(&self, call: &ServiceCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|received| *received == call).count()
    }

    fn record(&self, call: ServiceCall) -> Result<(), ServiceError> {
        let error = self
            .failing_calls
            .lock()
            .unwrap()
            .iter()
            .find_map(|(failing, error)| (*failing == call).then_some(*error));
        self.calls.lock().unwrap().push(call);

        match error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VerificationService for FakeVerificationService {
    async fn request_current_session_verification(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::RequestCurrentSessionVerification)
    }

    async fn request_user_verification(&self, user_id: &UserId) -> Result<(), ServiceError> {
        self.record(ServiceCall::RequestUserVerification(user_id.to_owned()))
    }

    async fn acknowledge_verification_request(
        &self,
        details: &SessionVerificationRequestDetails,
    ) -> Result<(), ServiceError> {
        self.record(ServiceCall::AcknowledgeVerificationRequest(details.flow_id.clone()))
    }

    async fn accept_verification_request(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::AcceptVerificationRequest)
    }

    async fn start_verification(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::StartVerification)
    }

    async fn approve_verification(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::ApproveVerification)
    }

    async fn decline_verification(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::DeclineVerification)
    }

    async fn cancel_verification(&self) -> Result<(), ServiceError> {
        self.record(ServiceCall::CancelVerification)
    }

    async fn reset(
        &self,
        cancel_any_pending_verification_attempt: bool,
    ) -> Result<(), ServiceError> {
        self.record(ServiceCall::Reset { cancel_any_pending_verification_attempt })?;

        // Like a state, the initial flow state is only reported when it changes.
        let already_initial =
            *self.last_flow_state.lock().unwrap() == VerificationFlowState::Initial;
        if !already_initial {
            self.emit_verification_flow_state(VerificationFlowState::Initial);
        }

        Ok(())
    }

    fn session_verified_status(&self) -> Subscriber<SessionVerifiedStatus> {
        self.session_verified_status.subscribe()
    }

    fn verification_flow_state(&self) -> BoxStream<'static, VerificationFlowState> {
        BroadcastStream::new(self.flow_states.subscribe())
            .filter_map(|flow_state| ready(flow_state.ok()))
            .boxed()
    }
}

/// A [`RecoveryService`] whose answers are set by hand.
#[derive(Debug)]
pub struct FakeRecoveryService {
    /// `None` makes the check fail.
    backup_exists_on_server: Mutex<Option<bool>>,
    recovery_state: SharedObservable<RecoveryState>,
    backup_checks: Mutex<usize>,
}

impl Default for FakeRecoveryService {
    fn default() -> Self {
        Self {
            backup_exists_on_server: Mutex::new(Some(false)),
            recovery_state: SharedObservable::new(RecoveryState::Unknown),
            backup_checks: Mutex::new(0),
        }
    }
}

impl FakeRecoveryService {
    /// Create a service reporting that no backup exists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether a key backup exists on the server.
    pub fn set_backup_exists_on_server(&self, exists: bool) {
        *self.backup_exists_on_server.lock().unwrap() = Some(exists);
    }

    /// Make the check for a key backup fail.
    pub fn fail_backup_check(&self) {
        *self.backup_exists_on_server.lock().unwrap() = None;
    }

    /// Report a new recovery state.
    pub fn set_recovery_state(&self, state: RecoveryState) {
        self.recovery_state.set(state);
    }

    /// How many times the existence of a backup has been checked.
    pub fn backup_checks(&self) -> usize {
        *self.backup_checks.lock().unwrap()
    }
}

#[async_trait]
impl RecoveryService for FakeRecoveryService {
    async fn does_backup_exist_on_server(&self) -> Result<bool, ServiceError> {
        *self.backup_checks.lock().unwrap() += 1;

        let exists = *self.backup_exists_on_server.lock().unwrap();
        exists.ok_or(ServiceError::NotReady)
    }

    fn recovery_state(&self) -> Subscriber<RecoveryState> {
        self.recovery_state.subscribe()
    }
}

/// Seven emojis, as a SAS verification would produce.
pub fn emojis_verification_data() -> SessionVerificationData {
    let emojis = [
        (0, "🐶", "Dog"),
        (1, "🐱", "Cat"),
        (2, "🦁", "Lion"),
        (3, "🐎", "Horse"),
        (4, "🦄", "Unicorn"),
        (5, "🐷", "Pig"),
        (6, "🐘", "Elephant"),
    ];

    SessionVerificationData::Emojis(
        emojis
            .into_iter()
            .map(|(number, symbol, description)| VerificationEmoji {
                number,
                symbol: symbol.to_owned(),
                description: description.to_owned(),
            })
            .collect(),
    )
}

/// Three decimals, as a SAS verification would produce.
pub fn decimals_verification_data() -> SessionVerificationData {
    SessionVerificationData::Decimals(vec![1234, 5678, 9012])
}
