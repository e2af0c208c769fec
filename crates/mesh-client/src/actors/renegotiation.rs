//! Track Renegotiation Manager.
//!
//! Swaps local tracks on every live connection. A sender of the same kind
//! gets its track replaced in place; a connection without one gets the
//! track added and must be renegotiated by the caller.

use crate::actors::registry::ConnectionRegistry;
use crate::errors::{CaptureError, NegotiationError};
use crate::media::capture::LocalCaptureManager;
use crate::media::track::LocalTrack;
use common::types::SessionId;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-connection result of installing one track.
#[derive(Debug, Default)]
pub struct InstallOutcome {
    /// Track swapped in place, no negotiation needed.
    pub replaced: Vec<SessionId>,
    /// Track added; these connections need a new offer.
    pub needs_offer: Vec<SessionId>,
    pub failed: Vec<(SessionId, NegotiationError)>,
}

impl InstallOutcome {
    fn merge(&mut self, other: InstallOutcome) {
        self.replaced.extend(other.replaced);
        for remote in other.needs_offer {
            if !self.needs_offer.contains(&remote) {
                self.needs_offer.push(remote);
            }
        }
        self.failed.extend(other.failed);
    }
}

/// Tracks which video source is currently on the wire.
#[derive(Debug, Default)]
pub struct TrackRenegotiationManager {
    screen_track_id: Option<String>,
}

impl TrackRenegotiationManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_screen_sharing(&self) -> bool {
        self.screen_track_id.is_some()
    }

    #[must_use]
    pub fn screen_track_id(&self) -> Option<&str> {
        self.screen_track_id.as_deref()
    }

    /// Install `track` on every connection in `registry`.
    pub async fn install_track(
        &self,
        registry: &ConnectionRegistry,
        track: &Arc<LocalTrack>,
    ) -> InstallOutcome {
        let mut outcome = InstallOutcome::default();
        let kind = track.kind();

        for connection in registry.iter() {
            let remote = connection.remote_session_id.clone();
            let endpoint = &connection.endpoint;
            let senders = endpoint.senders().await;

            if senders
                .iter()
                .any(|s| s.kind == kind && s.track_id.as_deref() == Some(track.id()))
            {
                continue;
            }

            if senders.iter().any(|s| s.kind == kind) {
                match endpoint.replace_track(kind, Arc::clone(track)).await {
                    Ok(()) => {
                        outcome.replaced.push(remote);
                        continue;
                    }
                    Err(NegotiationError::NoSender(_)) => {}
                    Err(e) => {
                        outcome.failed.push((remote, e));
                        continue;
                    }
                }
            }

            match endpoint.add_track(Arc::clone(track)).await {
                Ok(()) => outcome.needs_offer.push(remote),
                Err(e) => outcome.failed.push((remote, e)),
            }
        }

        debug!(
            target: "mesh.renegotiation",
            track = %track.id(),
            kind = %kind,
            replaced = outcome.replaced.len(),
            added = outcome.needs_offer.len(),
            failed = outcome.failed.len(),
            "Track installed"
        );
        outcome
    }

    /// Install every current local track, e.g. after late acquisition.
    pub async fn install_all(
        &self,
        registry: &ConnectionRegistry,
        capture: &LocalCaptureManager,
    ) -> InstallOutcome {
        let mut outcome = InstallOutcome::default();
        for track in capture.tracks() {
            outcome.merge(self.install_track(registry, &track).await);
        }
        outcome
    }

    /// Flip the microphone on or off. No negotiation.
    ///
    /// # Errors
    ///
    /// Returns `NotActive` without local media.
    pub fn set_audio_enabled(
        &self,
        capture: &LocalCaptureManager,
        enabled: bool,
    ) -> Result<(), CaptureError> {
        capture.set_audio_enabled(enabled)
    }

    /// Turning video off stops the camera and releases the device. Turning
    /// it on captures a fresh camera track and installs it everywhere. While
    /// a screen share is live the camera is re-acquired but stays off the
    /// wire until sharing stops.
    ///
    /// # Errors
    ///
    /// Returns the capture error when the camera cannot be re-opened.
    pub async fn set_video_enabled(
        &self,
        registry: &ConnectionRegistry,
        capture: &mut LocalCaptureManager,
        enabled: bool,
    ) -> Result<InstallOutcome, CaptureError> {
        if !capture.is_active() {
            return Err(CaptureError::NotActive);
        }
        if !enabled {
            capture.stop_video();
            return Ok(InstallOutcome::default());
        }

        let camera = capture.reacquire_video().await?;
        if self.is_screen_sharing() {
            return Ok(InstallOutcome::default());
        }
        Ok(self.install_track(registry, &camera).await)
    }

    /// Capture the display and put it on every video sender.
    ///
    /// # Errors
    ///
    /// Returns the capture error if display capture is refused.
    pub async fn start_screen_share(
        &mut self,
        registry: &ConnectionRegistry,
        capture: &mut LocalCaptureManager,
    ) -> Result<(Arc<LocalTrack>, InstallOutcome), CaptureError> {
        let screen = capture.start_screen().await?;
        self.screen_track_id = Some(screen.id().to_string());
        let outcome = self.install_track(registry, &screen).await;
        info!(target: "mesh.renegotiation", track = %screen.id(), "Screen share started");
        Ok((screen, outcome))
    }

    /// Stop the display track and restore the camera, re-acquiring it if it
    /// ended meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the capture error if the camera cannot be re-opened.
    pub async fn stop_screen_share(
        &mut self,
        registry: &ConnectionRegistry,
        capture: &mut LocalCaptureManager,
    ) -> Result<InstallOutcome, CaptureError> {
        if self.screen_track_id.take().is_none() {
            return Ok(InstallOutcome::default());
        }
        capture.stop_screen();
        info!(target: "mesh.renegotiation", "Screen share stopped");

        let camera = match capture.camera() {
            Some(camera) if !camera.is_ended() => camera,
            Some(_) => capture.reacquire_video().await?,
            None => return Ok(InstallOutcome::default()),
        };
        Ok(self.install_track(registry, &camera).await)
    }

    /// Forget screen-share state after local media was released.
    pub fn reset(&mut self) {
        self.screen_track_id = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_dedups_offer_targets() {
        let mut a = InstallOutcome {
            needs_offer: vec![SessionId::from("sock-b")],
            ..InstallOutcome::default()
        };
        a.merge(InstallOutcome {
            needs_offer: vec![SessionId::from("sock-b"), SessionId::from("sock-c")],
            replaced: vec![SessionId::from("sock-d")],
            failed: Vec::new(),
        });
        assert_eq!(a.needs_offer.len(), 2);
        assert_eq!(a.replaced.len(), 1);
    }

    #[test]
    fn test_new_manager_is_not_sharing() {
        let manager = TrackRenegotiationManager::new();
        assert!(!manager.is_screen_sharing());
        assert!(manager.screen_track_id().is_none());
    }
}
