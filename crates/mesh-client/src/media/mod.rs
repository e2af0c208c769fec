//! Local capture, local/remote tracks and the media endpoint abstraction.

pub mod capture;
pub mod endpoint;
pub mod track;
pub mod webrtc;

pub use capture::{CaptureDevice, LocalCaptureManager, SampleCaptureDevice};
pub use endpoint::{
    EndpointConfig, EndpointEvent, EndpointEventKind, EndpointEventSender, EndpointFactory,
    IceConnectionState, IceServerConfig, MediaEndpoint, PeerConnectionState, SenderInfo,
    SignalingState,
};
pub use track::{LocalTrack, MediaKind, RemoteStream, RemoteTrackInfo, TrackSource};
pub use webrtc::{WebRtcEndpoint, WebRtcEndpointFactory};
