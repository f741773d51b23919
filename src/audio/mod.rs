pub mod backend;
pub mod convert;
pub mod file;
pub mod framer;
pub mod level;
pub mod output;
pub mod playback;
pub mod wav;

#[cfg(feature = "device")]
pub mod device;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFrame, AudioSource,
    CapturedFrame, OutputKind, SystemDevices,
};
pub use file::{AudioFile, FileBackend};
pub use framer::{CaptureCounters, SampleFramer};
pub use level::{amplitude_level, amplitude_level_i16, AmplitudeLevel};
pub use output::{OutputDevice, ScheduledWindow, VirtualOutput};
pub use playback::{PlaybackListener, PlaybackScheduler};
pub use wav::{base64_pcm_to_wav, pcm_to_wav};
