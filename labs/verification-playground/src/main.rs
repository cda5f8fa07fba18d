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

//! Walk through a verification flow in the terminal, against a simulated
//! peer answering on the other side.

use std::{
    io::{self, Write as _},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use eyeball::Subscriber;
use futures_util::stream::BoxStream;
use ruma::{MilliSecondsSinceUnixEpoch, OwnedUserId, UserId};
use session_verification::{
    incoming::{self, IncomingVerification},
    outgoing::{self, OutgoingVerification, ReplyState},
    service::{
        RecoveryState, SessionVerificationRequestDetails, SessionVerifiedStatus,
        VerificationFlowState, VerificationRequest, VerificationService,
    },
    testing::{emojis_verification_data, FakeRecoveryService, FakeVerificationService},
    ServiceError,
};
use tokio::{sync::Notify, task::spawn_blocking, time::sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Cli {
    /// Verify another user instead of the current session.
    #[clap(long)]
    user: Option<OwnedUserId>,

    /// Answer a request sent by the simulated peer instead of sending one.
    #[clap(long, conflicts_with = "user")]
    incoming: bool,

    /// Pretend that a key backup exists on the server.
    #[clap(long)]
    backup: bool,

    /// How long restoring the key backup takes, in seconds.
    #[clap(long, default_value_t = 3)]
    backup_restore_secs: u64,

    /// How long to wait for the key backup to be restored, in seconds.
    #[clap(long, default_value_t = 10)]
    backup_timeout_secs: u64,

    /// Show the completed step when the session is already verified.
    #[clap(long)]
    show_completed: bool,

    /// How long the simulated peer takes to answer, in milliseconds.
    #[clap(long, default_value_t = 800, env = "PEER_DELAY_MS")]
    peer_delay_ms: u64,
}

/// A verification service whose other side answers on its own, after a
/// delay.
#[derive(Debug)]
struct SimulatedPeer {
    inner: Arc<FakeVerificationService>,
    delay: Duration,
}

impl SimulatedPeer {
    fn answer(&self, flow_states: Vec<VerificationFlowState>, then_verified: bool) {
        let inner = self.inner.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            for flow_state in flow_states {
                sleep(delay).await;
                inner.emit_verification_flow_state(flow_state);
            }

            if then_verified {
                inner.set_session_verified_status(SessionVerifiedStatus::Verified);
            }
        });
    }
}

#[async_trait]
impl VerificationService for SimulatedPeer {
    async fn request_current_session_verification(&self) -> Result<(), ServiceError> {
        self.inner.request_current_session_verification().await?;
        self.answer(vec![VerificationFlowState::DidAcceptVerificationRequest], false);
        Ok(())
    }

    async fn request_user_verification(&self, user_id: &UserId) -> Result<(), ServiceError> {
        self.inner.request_user_verification(user_id).await?;
        self.answer(vec![VerificationFlowState::DidAcceptVerificationRequest], false);
        Ok(())
    }

    async fn acknowledge_verification_request(
        &self,
        details: &SessionVerificationRequestDetails,
    ) -> Result<(), ServiceError> {
        self.inner.acknowledge_verification_request(details).await
    }

    async fn accept_verification_request(&self) -> Result<(), ServiceError> {
        self.inner.accept_verification_request().await?;
        self.answer(
            vec![
                VerificationFlowState::DidStartSasVerification,
                VerificationFlowState::DidReceiveVerificationData(emojis_verification_data()),
            ],
            false,
        );
        Ok(())
    }

    async fn start_verification(&self) -> Result<(), ServiceError> {
        self.inner.start_verification().await?;
        self.answer(
            vec![
                VerificationFlowState::DidStartSasVerification,
                VerificationFlowState::DidReceiveVerificationData(emojis_verification_data()),
            ],
            false,
        );
        Ok(())
    }

    async fn approve_verification(&self) -> Result<(), ServiceError> {
        self.inner.approve_verification().await?;
        self.answer(vec![VerificationFlowState::DidFinish], true);
        Ok(())
    }

    async fn decline_verification(&self) -> Result<(), ServiceError> {
        self.inner.decline_verification().await?;
        self.answer(vec![VerificationFlowState::DidCancel], false);
        Ok(())
    }

    async fn cancel_verification(&self) -> Result<(), ServiceError> {
        self.inner.cancel_verification().await?;
        self.answer(vec![VerificationFlowState::DidCancel], false);
        Ok(())
    }

    async fn reset(
        &self,
        cancel_any_pending_verification_attempt: bool,
    ) -> Result<(), ServiceError> {
        self.inner.reset(cancel_any_pending_verification_attempt).await
    }

    fn session_verified_status(&self) -> Subscriber<SessionVerifiedStatus> {
        self.inner.session_verified_status()
    }

    fn verification_flow_state(&self) -> BoxStream<'static, VerificationFlowState> {
        self.inner.verification_flow_state()
    }
}

/// Ask a yes/no question on the terminal.
async fn confirm(question: &str) -> Result<bool> {
    let question = question.to_owned();

    let answer = spawn_blocking(move || -> io::Result<String> {
        print!("{question} [yes/no]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input)
    })
    .await??;

    Ok(matches!(answer.trim().to_lowercase().as_ref(), "yes" | "y" | "ok"))
}

async fn run_outgoing(
    service: Arc<dyn VerificationService>,
    recovery: Arc<FakeRecoveryService>,
    cli: &Cli,
) -> Result<()> {
    let request = match &cli.user {
        Some(user_id) => VerificationRequest::User(user_id.clone()),
        None => VerificationRequest::CurrentSession,
    };

    let flow = OutgoingVerification::builder(service, recovery, request)
        .show_device_verified_screen(cli.show_completed)
        .backup_restore_timeout(Duration::from_secs(cli.backup_timeout_secs))
        .build();

    let mut steps = flow.step();
    let mut step = steps.next_now();

    loop {
        info!(?step, "Outgoing verification step");

        match &step {
            outgoing::Step::Loading => {}
            outgoing::Step::Initial => {
                if confirm("Get your other session ready. Request verification?").await? {
                    flow.handle_action(outgoing::UserAction::RequestVerification)?;
                } else {
                    flow.handle_action(outgoing::UserAction::Cancel)?;
                }
            }
            outgoing::Step::AwaitingOtherDeviceResponse => {
                println!("Waiting for the other side…");
            }
            outgoing::Step::Ready => {
                println!("The request has been accepted.");
                flow.handle_action(outgoing::UserAction::StartSasVerification)?;
            }
            outgoing::Step::Verifying { data, state: ReplyState::Uninitialized } => {
                println!("\nDo the emojis match?\n{data}");

                if confirm("Confirm").await? {
                    flow.handle_action(outgoing::UserAction::ConfirmVerification)?;
                } else {
                    flow.handle_action(outgoing::UserAction::DeclineVerification)?;
                }
            }
            outgoing::Step::Verifying { state: ReplyState::Loading, .. } => {
                println!("Waiting for the other side to confirm…");
            }
            outgoing::Step::Canceled => {
                if confirm("The verification has been cancelled. Try again?").await? {
                    flow.handle_action(outgoing::UserAction::Reset)?;
                } else {
                    flow.handle_action(outgoing::UserAction::Cancel)?;
                }
            }
            outgoing::Step::Completed => {
                println!("Verification complete.");
                return Ok(());
            }
            outgoing::Step::Exit => return Ok(()),
        }

        match steps.next().await {
            Some(next) => step = next,
            None => return Ok(()),
        }
    }
}

async fn run_incoming(service: Arc<FakeVerificationService>, delay: Duration) -> Result<()> {
    let details = SessionVerificationRequestDetails {
        sender_id: ruma::user_id!("@peer:example.org").to_owned(),
        flow_id: "$simulated".to_owned(),
        device_id: "PEERDEVICE".into(),
        display_name: Some("Simulated peer".to_owned()),
        first_seen_timestamp: MilliSecondsSinceUnixEpoch::now(),
    };

    let finished = Arc::new(Notify::new());
    let navigator = {
        let finished = finished.clone();
        Arc::new(move || finished.notify_one())
    };

    let peer = Arc::new(SimulatedPeer { inner: service, delay });
    let flow = IncomingVerification::new(peer, details, navigator);

    let mut steps = flow.step();
    let mut step = steps.next_now();

    loop {
        info!(?step, "Incoming verification step");

        match &step {
            incoming::Step::Initial { device_display_name, is_waiting: false, .. } => {
                let question = format!("{device_display_name} wants to verify. Accept?");

                if confirm(&question).await? {
                    flow.handle_action(incoming::UserAction::StartVerification)?;
                } else {
                    flow.handle_action(incoming::UserAction::IgnoreVerification)?;
                }
            }
            incoming::Step::Verifying { data, is_waiting: false } => {
                println!("\nDo the emojis match?\n{data}");

                if confirm("Confirm").await? {
                    flow.handle_action(incoming::UserAction::ConfirmVerification)?;
                } else {
                    flow.handle_action(incoming::UserAction::DeclineVerification)?;
                }
            }
            incoming::Step::Initial { is_waiting: true, .. }
            | incoming::Step::Verifying { is_waiting: true, .. } => {
                println!("Waiting for the other side…");
            }
            incoming::Step::Canceled => println!("The verification has been cancelled."),
            incoming::Step::Completed => println!("Verification complete."),
            incoming::Step::Failure => println!("The verification failed."),
        }

        tokio::select! {
            _ = finished.notified() => return Ok(()),
            next = steps.next() => match next {
                Some(next) => step = next,
                None => return Ok(()),
            },
        }

        if matches!(
            step,
            incoming::Step::Canceled | incoming::Step::Completed | incoming::Step::Failure
        ) {
            info!(?step, "Incoming verification over");
            flow.handle_action(incoming::UserAction::GoBack)?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let delay = Duration::from_millis(cli.peer_delay_ms);

    let service = Arc::new(FakeVerificationService::new(SessionVerifiedStatus::NotVerified));

    if cli.incoming {
        return run_incoming(service, delay).await;
    }

    let recovery = Arc::new(FakeRecoveryService::new());
    if cli.backup {
        recovery.set_backup_exists_on_server(true);
        recovery.set_recovery_state(RecoveryState::Incomplete);

        let recovery = recovery.clone();
        let restore_after = Duration::from_secs(cli.backup_restore_secs);
        tokio::spawn(async move {
            sleep(restore_after).await;
            recovery.set_recovery_state(RecoveryState::Enabled);
        });
    }

    let peer = Arc::new(SimulatedPeer { inner: service, delay });
    run_outgoing(peer, recovery, &cli).await
}
