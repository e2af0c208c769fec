//! Local Capture Manager.
//!
//! Owns the local microphone, camera and screen tracks. Device access goes
//! through [`CaptureDevice`] so the headless binary and tests can plug in
//! their own sources.

use crate::errors::CaptureError;
use crate::media::track::{LocalTrack, TrackSource};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of local media tracks.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open_microphone(&self) -> Result<Arc<LocalTrack>, CaptureError>;
    async fn open_camera(&self) -> Result<Arc<LocalTrack>, CaptureError>;
    async fn open_display(&self) -> Result<Arc<LocalTrack>, CaptureError>;
}

/// Owns the current local tracks.
pub struct LocalCaptureManager {
    device: Arc<dyn CaptureDevice>,
    audio: Option<Arc<LocalTrack>>,
    camera: Option<Arc<LocalTrack>>,
    screen: Option<Arc<LocalTrack>>,
}

fn live(track: Option<&Arc<LocalTrack>>) -> Option<&Arc<LocalTrack>> {
    track.filter(|t| !t.is_ended())
}

impl LocalCaptureManager {
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            audio: None,
            camera: None,
            screen: None,
        }
    }

    /// Acquire microphone and camera. Either both are captured or neither.
    ///
    /// # Errors
    ///
    /// Returns the device error; any track opened before it is stopped.
    pub async fn acquire(&mut self) -> Result<(), CaptureError> {
        if live(self.audio.as_ref()).is_some() && live(self.camera.as_ref()).is_some() {
            return Ok(());
        }
        self.stop_all();

        let audio = self.device.open_microphone().await?;
        let camera = match self.device.open_camera().await {
            Ok(track) => track,
            Err(e) => {
                audio.stop();
                return Err(e);
            }
        };

        info!(
            target: "mesh.capture",
            audio_track = %audio.id(),
            video_track = %camera.id(),
            "Local media acquired"
        );
        self.audio = Some(audio);
        self.camera = Some(camera);
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.audio.is_some() || self.camera.is_some()
    }

    #[must_use]
    pub fn audio(&self) -> Option<Arc<LocalTrack>> {
        self.audio.clone()
    }

    #[must_use]
    pub fn camera(&self) -> Option<Arc<LocalTrack>> {
        self.camera.clone()
    }

    #[must_use]
    pub fn screen(&self) -> Option<Arc<LocalTrack>> {
        live(self.screen.as_ref()).cloned()
    }

    /// Tracks attached to a newly created endpoint: audio plus the screen
    /// while sharing, otherwise the camera.
    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        let video = live(self.screen.as_ref()).or(self.camera.as_ref());
        self.audio.iter().chain(video).cloned().collect()
    }

    /// Flip the microphone enabled flag.
    ///
    /// # Errors
    ///
    /// Returns `NotActive` without a microphone track.
    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), CaptureError> {
        let audio = self.audio.as_ref().ok_or(CaptureError::NotActive)?;
        audio.set_enabled(enabled);
        Ok(())
    }

    /// Stop the camera. The ended track stays in place until re-acquired.
    pub fn stop_video(&mut self) {
        if let Some(camera) = &self.camera {
            camera.set_enabled(false);
            camera.stop();
            debug!(target: "mesh.capture", track = %camera.id(), "Camera stopped");
        }
    }

    /// Return a live camera track, re-opening the device if the current
    /// one has ended.
    ///
    /// # Errors
    ///
    /// Returns the device error.
    pub async fn reacquire_video(&mut self) -> Result<Arc<LocalTrack>, CaptureError> {
        if let Some(camera) = live(self.camera.as_ref()) {
            camera.set_enabled(true);
            return Ok(Arc::clone(camera));
        }
        let camera = self.device.open_camera().await?;
        info!(target: "mesh.capture", track = %camera.id(), "Camera re-acquired");
        self.camera = Some(Arc::clone(&camera));
        Ok(camera)
    }

    /// Open a display capture track.
    ///
    /// # Errors
    ///
    /// Returns the device error.
    pub async fn start_screen(&mut self) -> Result<Arc<LocalTrack>, CaptureError> {
        if let Some(screen) = live(self.screen.as_ref()) {
            return Ok(Arc::clone(screen));
        }
        let screen = self.device.open_display().await?;
        info!(target: "mesh.capture", track = %screen.id(), "Screen capture started");
        self.screen = Some(Arc::clone(&screen));
        Ok(screen)
    }

    /// Stop and forget the screen track.
    pub fn stop_screen(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
            debug!(target: "mesh.capture", track = %screen.id(), "Screen capture stopped");
        }
    }

    /// Stop every track and release the devices.
    pub fn stop_all(&mut self) {
        for track in [self.audio.take(), self.camera.take(), self.screen.take()]
            .into_iter()
            .flatten()
        {
            track.stop();
        }
    }
}

/// Opus frame encoding 20 ms of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Headless capture device used by the client binary.
///
/// Microphone tracks carry a stream of Opus silence frames so that remote
/// peers see inbound RTP. Camera and display tracks are negotiated but idle.
#[derive(Debug, Default)]
pub struct SampleCaptureDevice;

impl SampleCaptureDevice {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn spawn_silence_pump(track: &Arc<LocalTrack>) {
    let track = Arc::clone(track);
    tokio::spawn(async move {
        let frame = Duration::from_millis(20);
        let mut interval = tokio::time::interval(frame);
        loop {
            tokio::select! {
                () = track.ended() => break,
                _ = interval.tick() => {
                    if let Err(e) = track
                        .write_sample(Bytes::from_static(&OPUS_SILENCE), frame)
                        .await
                    {
                        warn!(target: "mesh.capture", error = %e, "Sample write failed");
                        break;
                    }
                }
            }
        }
    });
}

#[async_trait]
impl CaptureDevice for SampleCaptureDevice {
    async fn open_microphone(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        let track = LocalTrack::new(TrackSource::Microphone);
        spawn_silence_pump(&track);
        Ok(track)
    }

    async fn open_camera(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        Ok(LocalTrack::new(TrackSource::Camera))
    }

    async fn open_display(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        Ok(LocalTrack::new(TrackSource::Screen))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::track::MediaKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlakyCamera {
        camera_fails: AtomicBool,
    }

    #[async_trait]
    impl CaptureDevice for FlakyCamera {
        async fn open_microphone(&self) -> Result<Arc<LocalTrack>, CaptureError> {
            Ok(LocalTrack::new(TrackSource::Microphone))
        }

        async fn open_camera(&self) -> Result<Arc<LocalTrack>, CaptureError> {
            if self.camera_fails.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("camera".to_string()));
            }
            Ok(LocalTrack::new(TrackSource::Camera))
        }

        async fn open_display(&self) -> Result<Arc<LocalTrack>, CaptureError> {
            Ok(LocalTrack::new(TrackSource::Screen))
        }
    }

    #[tokio::test]
    async fn test_acquire_is_all_or_nothing() {
        let device = Arc::new(FlakyCamera::default());
        device.camera_fails.store(true, Ordering::SeqCst);
        let mut capture = LocalCaptureManager::new(device);

        let err = capture.acquire().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert!(!capture.is_active());
        assert!(capture.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_tracks_prefer_screen_while_sharing() {
        let mut capture = LocalCaptureManager::new(Arc::new(FlakyCamera::default()));
        capture.acquire().await.unwrap();

        let tracks = capture.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].source(), TrackSource::Camera);

        let screen = capture.start_screen().await.unwrap();
        let tracks = capture.tracks();
        assert_eq!(tracks[1].id(), screen.id());

        capture.stop_screen();
        assert!(screen.is_ended());
        assert_eq!(capture.tracks()[1].source(), TrackSource::Camera);
    }

    #[tokio::test]
    async fn test_video_off_then_on_produces_new_track() {
        let mut capture = LocalCaptureManager::new(Arc::new(FlakyCamera::default()));
        capture.acquire().await.unwrap();
        let original = capture.camera().unwrap();

        capture.stop_video();
        assert!(original.is_ended());

        let fresh = capture.reacquire_video().await.unwrap();
        assert_ne!(fresh.id(), original.id());
        assert_eq!(fresh.kind(), MediaKind::Video);
        assert!(fresh.is_enabled());
    }

    #[tokio::test]
    async fn test_set_audio_enabled_requires_capture() {
        let mut capture = LocalCaptureManager::new(Arc::new(FlakyCamera::default()));
        assert!(matches!(
            capture.set_audio_enabled(false),
            Err(CaptureError::NotActive)
        ));

        capture.acquire().await.unwrap();
        capture.set_audio_enabled(false).unwrap();
        assert!(!capture.audio().unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_stop_all_ends_every_track() {
        let mut capture = LocalCaptureManager::new(Arc::new(FlakyCamera::default()));
        capture.acquire().await.unwrap();
        let audio = capture.audio().unwrap();
        capture.stop_all();
        assert!(audio.is_ended());
        assert!(!capture.is_active());
    }
}
