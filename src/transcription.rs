use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),

    #[error("transcription service failed: {0}")]
    Service(String),
}

/// Speech-to-text for uploaded clips, outside any live session
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_base64: &str, mime_type: &str) -> Result<String, TranscriptionError>;
}

/// Fixed reply used until a transcription service is wired in
pub const DISABLED_TRANSCRIPT: &str = "Transcription is disabled";

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTranscriber;

#[async_trait::async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, audio_base64: &str, mime_type: &str) -> Result<String, TranscriptionError> {
        if audio_base64.is_empty() {
            return Err(TranscriptionError::InvalidAudio("empty audio payload".to_string()));
        }
        tracing::debug!(mime_type, bytes = audio_base64.len(), "Transcription requested while disabled");
        Ok(DISABLED_TRANSCRIPT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_transcriber_returns_fixed_text() {
        let text = DisabledTranscriber.transcribe("AAAA", "audio/wav").await.unwrap();
        assert_eq!(text, "Transcription is disabled");
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let result = DisabledTranscriber.transcribe("", "audio/wav").await;
        assert!(matches!(result, Err(TranscriptionError::InvalidAudio(_))));
    }
}
