//! Capture device for tests.
//!
//! Hands out silent tracks and counts every open. Each source can be told
//! to fail so capture-error paths can be driven without real devices.

use async_trait::async_trait;
use mesh_client::errors::CaptureError;
use mesh_client::media::{CaptureDevice, LocalTrack, TrackSource};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct CaptureLog {
    opened: Vec<Arc<LocalTrack>>,
    deny_microphone: bool,
    deny_camera: bool,
    deny_display: bool,
}

/// Mock [`CaptureDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockCaptureDevice {
    log: Arc<Mutex<CaptureLog>>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose microphone and camera are refused.
    pub fn denied() -> Self {
        let device = Self::new();
        device.deny_microphone(true);
        device.deny_camera(true);
        device
    }

    pub fn deny_microphone(&self, deny: bool) {
        self.log.lock().unwrap().deny_microphone = deny;
    }

    pub fn deny_camera(&self, deny: bool) {
        self.log.lock().unwrap().deny_camera = deny;
    }

    pub fn deny_display(&self, deny: bool) {
        self.log.lock().unwrap().deny_display = deny;
    }

    /// Every track opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<LocalTrack>> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn opened_count(&self, source: TrackSource) -> usize {
        self.log
            .lock()
            .unwrap()
            .opened
            .iter()
            .filter(|t| t.source() == source)
            .count()
    }

    /// Most recent track of `source`.
    pub fn last(&self, source: TrackSource) -> Option<Arc<LocalTrack>> {
        self.log
            .lock()
            .unwrap()
            .opened
            .iter()
            .rev()
            .find(|t| t.source() == source)
            .cloned()
    }

    fn open(&self, source: TrackSource) -> Result<Arc<LocalTrack>, CaptureError> {
        let mut log = self.log.lock().unwrap();
        let denied = match source {
            TrackSource::Microphone => log.deny_microphone,
            TrackSource::Camera => log.deny_camera,
            TrackSource::Screen => log.deny_display,
        };
        if denied {
            return Err(CaptureError::PermissionDenied(format!("{source:?}")));
        }
        let track = LocalTrack::new(source);
        log.opened.push(Arc::clone(&track));
        Ok(track)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn open_microphone(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        self.open(TrackSource::Microphone)
    }

    async fn open_camera(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        self.open(TrackSource::Camera)
    }

    async fn open_display(&self) -> Result<Arc<LocalTrack>, CaptureError> {
        self.open(TrackSource::Screen)
    }
}
