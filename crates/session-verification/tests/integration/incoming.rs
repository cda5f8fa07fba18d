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

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use assert_matches2::assert_matches;
use ruma::{user_id, MilliSecondsSinceUnixEpoch, UInt};
use session_verification::{
    incoming::{State, Step, UserAction},
    service::{SessionVerificationRequestDetails, SessionVerifiedStatus, VerificationFlowState},
    testing::{emojis_verification_data, FakeVerificationService, ServiceCall},
    IncomingVerification, ServiceError,
};

use crate::{init_tracing, wait_for};

struct Fixture {
    service: Arc<FakeVerificationService>,
    finished: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();

        Self {
            service: Arc::new(FakeVerificationService::new(SessionVerifiedStatus::Verified)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn details() -> SessionVerificationRequestDetails {
        SessionVerificationRequestDetails {
            sender_id: user_id!("@alice:example.com").to_owned(),
            flow_id: "$flow_id".to_owned(),
            device_id: "ALICEDEVICE".into(),
            display_name: Some("Alice's laptop".to_owned()),
            first_seen_timestamp: MilliSecondsSinceUnixEpoch(UInt::new_saturating(1_700_000_000_000)),
        }
    }

    fn flow(&self) -> IncomingVerification {
        let finished = self.finished.clone();

        IncomingVerification::new(
            self.service.clone(),
            Self::details(),
            Arc::new(move || {
                finished.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    fn initial_step(is_waiting: bool) -> Step {
        let details = Self::details();

        Step::Initial {
            device_display_name: "Alice's laptop".to_owned(),
            device_id: details.device_id,
            first_seen_timestamp: details.first_seen_timestamp,
            is_waiting,
        }
    }

    /// Accept the request and receive the challenge.
    async fn flow_in_verifying_step(&self) -> anyhow::Result<IncomingVerification> {
        let flow = self.flow();
        let mut steps = flow.step();

        flow.handle_action(UserAction::StartVerification)?;
        wait_for(&mut steps, Self::initial_step(true)).await;

        self.service.emit_verification_flow_state(VerificationFlowState::DidReceiveVerificationData(
            emojis_verification_data(),
        ));
        wait_for(&mut steps, Step::Verifying { data: emojis_verification_data(), is_waiting: false })
            .await;

        Ok(flow)
    }
}

#[tokio::test]
async fn test_request_is_acknowledged_right_away() {
    let fixture = Fixture::new();
    let flow = fixture.flow();

    assert_eq!(flow.current_step(), Fixture::initial_step(false));
    assert_eq!(flow.details().flow_id, "$flow_id");

    // The acknowledgement happens before any event is processed.
    flow.handle_action(UserAction::StartVerification).unwrap();
    wait_for(&mut flow.state(), State::AcceptingIncomingVerification).await;

    assert_eq!(
        fixture.service.calls(),
        vec![
            ServiceCall::Reset { cancel_any_pending_verification_attempt: false },
            ServiceCall::AcknowledgeVerificationRequest("$flow_id".to_owned()),
            ServiceCall::AcceptVerificationRequest,
        ]
    );
}

#[tokio::test]
async fn test_nominal_verification() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow_in_verifying_step().await?;
    let mut steps = flow.step();

    flow.handle_action(UserAction::ConfirmVerification)?;
    wait_for(&mut steps, Step::Verifying { data: emojis_verification_data(), is_waiting: true })
        .await;
    assert_eq!(fixture.service.call_count(&ServiceCall::ApproveVerification), 1);

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidFinish);
    wait_for(&mut steps, Step::Completed).await;

    // Leaving the completed flow.
    assert_eq!(fixture.finished(), 0);
    flow.handle_action(UserAction::GoBack)?;
    assert_eq!(fixture.finished(), 1);

    Ok(())
}

#[tokio::test]
async fn test_challenge_mismatch_is_a_failure() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow_in_verifying_step().await?;
    let mut states = flow.state();

    flow.handle_action(UserAction::DeclineVerification)?;
    wait_for(&mut states, State::RejectingChallenge(emojis_verification_data())).await;
    assert_eq!(fixture.service.call_count(&ServiceCall::DeclineVerification), 1);

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidFail);
    wait_for(&mut flow.step(), Step::Failure).await;

    Ok(())
}

#[tokio::test]
async fn test_cancellation_after_rejection_is_a_failure() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow_in_verifying_step().await?;
    let mut states = flow.state();

    flow.handle_action(UserAction::DeclineVerification)?;
    wait_for(&mut states, State::RejectingChallenge(emojis_verification_data())).await;

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    wait_for(&mut states, State::Failure).await;

    Ok(())
}

#[tokio::test]
async fn test_remote_cancellation_before_acceptance_leaves_the_flow() {
    let fixture = Fixture::new();
    let flow = fixture.flow();

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    wait_for(&mut flow.state(), State::Initial { is_cancelled: true }).await;

    assert_eq!(fixture.finished(), 1);
    assert_eq!(flow.current_step(), Fixture::initial_step(false));
}

#[tokio::test]
async fn test_repeated_remote_cancellation_leaves_the_flow_once() {
    let fixture = Fixture::new();
    let flow = fixture.flow();
    let mut states = flow.state();

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    wait_for(&mut states, State::Initial { is_cancelled: true }).await;
    assert_eq!(fixture.finished(), 1);

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    // Flow states are relayed in order, the failure comes after both cancellations.
    fixture.service.emit_verification_flow_state(VerificationFlowState::DidFail);
    wait_for(&mut states, State::Failure).await;

    assert_eq!(fixture.finished(), 1);
}

#[tokio::test]
async fn test_remote_cancellation_while_verifying() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow_in_verifying_step().await?;

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    wait_for(&mut flow.step(), Step::Canceled).await;
    assert_eq!(fixture.finished(), 0);

    Ok(())
}

#[tokio::test]
async fn test_ignore_leaves_the_request_unanswered() {
    let fixture = Fixture::new();
    let flow = fixture.flow();

    flow.handle_action(UserAction::IgnoreVerification).unwrap();
    assert_eq!(fixture.finished(), 1);

    // Going back from the initial step leaves too.
    flow.handle_action(UserAction::GoBack).unwrap();
    assert_eq!(fixture.finished(), 2);

    assert_eq!(fixture.service.call_count(&ServiceCall::AcceptVerificationRequest), 0);
    assert_eq!(fixture.service.call_count(&ServiceCall::CancelVerification), 0);
}

#[tokio::test]
async fn test_go_back_while_accepting_cancels() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow();
    let mut steps = flow.step();

    flow.handle_action(UserAction::StartVerification)?;
    wait_for(&mut steps, Fixture::initial_step(true)).await;

    flow.handle_action(UserAction::GoBack)?;
    wait_for(&mut flow.state(), State::Canceling).await;
    assert_eq!(fixture.service.call_count(&ServiceCall::CancelVerification), 1);
    assert_eq!(flow.current_step(), Step::Failure);

    fixture.service.emit_verification_flow_state(VerificationFlowState::DidCancel);
    wait_for(&mut steps, Step::Canceled).await;

    Ok(())
}

#[tokio::test]
async fn test_go_back_while_verifying_declines() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    let flow = fixture.flow_in_verifying_step().await?;
    let mut steps = flow.step();

    flow.handle_action(UserAction::GoBack)?;
    wait_for(&mut steps, Step::Verifying { data: emojis_verification_data(), is_waiting: true })
        .await;
    assert_eq!(fixture.service.call_count(&ServiceCall::DeclineVerification), 1);

    // Waiting for the other side, going back does nothing.
    flow.handle_action(UserAction::GoBack)?;
    assert_eq!(fixture.service.call_count(&ServiceCall::DeclineVerification), 1);
    assert_eq!(fixture.finished(), 0);

    Ok(())
}

#[tokio::test]
async fn test_failing_acknowledgement_is_a_failure() {
    let fixture = Fixture::new();
    fixture
        .service
        .fail_on(ServiceCall::AcknowledgeVerificationRequest("$flow_id".to_owned()));
    let flow = fixture.flow();

    wait_for(&mut flow.step(), Step::Failure).await;
}

#[tokio::test]
async fn test_failing_acceptance_is_a_failure() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    fixture.service.fail_on_with(ServiceCall::AcceptVerificationRequest, || {
        ServiceError::other(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
    });
    let flow = fixture.flow();

    flow.handle_action(UserAction::StartVerification)?;
    wait_for(&mut flow.step(), Step::Failure).await;

    Ok(())
}

#[tokio::test]
async fn test_failing_approval_is_a_failure() -> anyhow::Result<()> {
    let fixture = Fixture::new();
    fixture.service.fail_on(ServiceCall::ApproveVerification);
    let flow = fixture.flow_in_verifying_step().await?;

    flow.handle_action(UserAction::ConfirmVerification)?;
    wait_for(&mut flow.step(), Step::Failure).await;

    // Nothing happens anymore.
    fixture.service.emit_verification_flow_state(VerificationFlowState::DidFinish);
    flow.handle_action(UserAction::ConfirmVerification)?;
    tokio::task::yield_now().await;
    assert_matches!(flow.current_step(), Step::Failure);

    Ok(())
}
