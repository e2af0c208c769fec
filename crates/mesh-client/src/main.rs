//! Mesh Client
//!
//! Headless meeting participant. Joins `MESH_MEETING_ID`, or creates a
//! meeting and hosts it when unset, then stays in the room until Ctrl-C.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Connect to the signaling relay
//! 4. Spawn the `ConnectionOrchestrator` and `SessionController`
//! 5. Sign in (when no `MESH_USER_ID` is configured)
//! 6. Join or create the meeting
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::sync::Arc;

use common::observability::init_tracing;
use common::types::UserId;
use mesh_client::actors::{
    ConnectionOrchestrator, OrchestratorDeps, SessionController, SessionDeps, SessionNotice,
};
use mesh_client::config::Config;
use mesh_client::media::{SampleCaptureDevice, WebRtcEndpointFactory};
use mesh_client::membership::HttpMembershipClient;
use mesh_client::signaling::client::SignalingClient;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.observability)?;

    info!("Starting Mesh Client");
    info!(
        signaling_url = %config.signaling_url,
        api_base_url = %config.api_base_url,
        username = %config.username,
        meeting_id = ?config.meeting_id,
        turn_enabled = config.turn_credential.is_some(),
        "Configuration loaded successfully"
    );

    let (signaling_client, signaling, signaling_events) =
        SignalingClient::connect(&config.signaling_url, config.signaling_settings())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to signaling relay");
                e
            })?;

    let factory = Arc::new(WebRtcEndpointFactory::new()?);
    let membership = Arc::new(HttpMembershipClient::new(config.api_base_url.clone())?);

    let orchestrator_token = CancellationToken::new();
    let (orchestrator, orchestrator_task) = ConnectionOrchestrator::spawn(
        OrchestratorDeps {
            local_user_id: config.user_id.clone().unwrap_or_else(UserId::new),
            factory,
            endpoint_config: config.endpoint_config(),
            capture_device: Arc::new(SampleCaptureDevice::new()),
            signaling: signaling.clone(),
            timings: config.timings(),
        },
        orchestrator_token.clone(),
    );

    let session_token = CancellationToken::new();
    let (session, session_task) = SessionController::spawn(
        SessionDeps {
            orchestrator,
            signaling,
            signaling_events,
            membership,
            timings: config.timings(),
            username: config.username.clone(),
            user_id: config.user_id.clone(),
        },
        session_token.clone(),
    );

    let mut notices = session.subscribe();
    let notice_task = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(SessionNotice::RosterUpdated(roster)) => {
                    info!(participants = roster.len(), "Roster updated");
                }
                Ok(SessionNotice::ChatReceived(chat)) => {
                    info!(from = %chat.username, message = %chat.message, "Chat");
                }
                Ok(notice) => warn!(notice = ?notice, "Session notice"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if config.user_id.is_none() {
        let user_id = session.authenticate(config.username.clone()).await?;
        info!(user_id = %user_id, "Registered user");
    }

    match config.meeting_id.clone() {
        Some(meeting_id) => {
            session.join_meeting(meeting_id.clone()).await?;
            info!(meeting_id = %meeting_id, "Joined meeting");
        }
        None => {
            let meeting_id = session
                .create_meeting(format!("{}'s meeting", config.username))
                .await?;
            info!(meeting_id = %meeting_id, "Created meeting");
        }
    }

    shutdown_signal().await;
    info!("Shutdown signal received, leaving meeting");

    session_token.cancel();
    if let Err(e) = session_task.await {
        error!(error = %e, "Session task panicked");
    }
    orchestrator_token.cancel();
    if let Err(e) = orchestrator_task.await {
        error!(error = %e, "Orchestrator task panicked");
    }
    signaling_client.shutdown().await;
    notice_task.abort();

    info!("Mesh Client shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
}
