//! Wire dialects spoken to the remote model
//!
//! Two dialects are supported:
//!
//! - `generic`: the minimal contract. Setup is
//!   `{"setup": {"model", "systemInstructions"}}`, audio is
//!   `{"chunk": "<base64>", "mimeType": "audio/pcm"}`, and inbound messages
//!   are a tagged union on `kind`.
//! - `gemini`: the Gemini Live `BidiGenerateContent` shape. All server
//!   messages may arrive as binary frames carrying JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::messages::{
    AudioChunkMessage, EncodedChunk, InboundMessage, SetupMessage, SetupPayload, SetupRequest,
};
use super::transport::WireFrame;
use crate::error::SessionError;

/// Encodes outbound requests and demultiplexes inbound frames
pub trait WireCodec: Send + Sync {
    fn name(&self) -> &str;

    fn encode_setup(&self, setup: &SetupRequest) -> serde_json::Result<WireFrame>;

    fn encode_media(&self, chunk: &EncodedChunk) -> serde_json::Result<WireFrame>;

    /// One frame may carry several messages. A frame that carries none is
    /// `MalformedInbound`.
    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundMessage>, SessionError>;
}

/// Which dialect to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireDialect {
    #[default]
    Generic,
    Gemini,
}

impl WireDialect {
    pub fn codec(self) -> Arc<dyn WireCodec> {
        match self {
            WireDialect::Generic => Arc::new(GenericCodec),
            WireDialect::Gemini => Arc::new(GeminiCodec),
        }
    }
}

fn frame_text(frame: &WireFrame) -> Result<&str, SessionError> {
    match frame {
        WireFrame::Text(text) => Ok(text),
        WireFrame::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| {
            SessionError::MalformedInbound(format!("{}-byte binary frame is not UTF-8", bytes.len()))
        }),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GenericCodec;

impl WireCodec for GenericCodec {
    fn name(&self) -> &str {
        "generic"
    }

    fn encode_setup(&self, setup: &SetupRequest) -> serde_json::Result<WireFrame> {
        let message = SetupMessage {
            setup: SetupPayload {
                model: setup.model.clone(),
                system_instructions: setup.system_instructions.clone(),
            },
        };
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn encode_media(&self, chunk: &EncodedChunk) -> serde_json::Result<WireFrame> {
        let message = AudioChunkMessage {
            chunk: chunk.data.clone(),
            mime_type: chunk.mime_type.clone(),
        };
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundMessage>, SessionError> {
        let text = frame_text(frame)?;
        serde_json::from_str::<InboundMessage>(text)
            .map(|message| vec![message])
            .map_err(|e| SessionError::MalformedInbound(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiCodec;

impl WireCodec for GeminiCodec {
    fn name(&self) -> &str {
        "gemini"
    }

    fn encode_setup(&self, setup: &SetupRequest) -> serde_json::Result<WireFrame> {
        let message = json!({
            "setup": {
                "model": setup.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"]
                },
                "systemInstruction": {
                    "parts": [{ "text": setup.system_instructions }]
                }
            }
        });
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn encode_media(&self, chunk: &EncodedChunk) -> serde_json::Result<WireFrame> {
        let message = json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": chunk.mime_type,
                    "data": chunk.data
                }]
            }
        });
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundMessage>, SessionError> {
        let text = frame_text(frame)?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SessionError::MalformedInbound(e.to_string()))?;

        let mut messages = Vec::new();

        if value.get("setupComplete").is_some() {
            messages.push(InboundMessage::SetupComplete);
        }

        if let Some(content) = value.get("serverContent") {
            if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
                messages.push(InboundMessage::Interrupted);
            }

            // Any model content holds the turn until turnComplete
            if content.get("modelTurn").is_some() {
                messages.push(InboundMessage::TurnState { speaking: true });
            }

            if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
                for part in parts {
                    if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                        messages.push(InboundMessage::AudioFragment {
                            data: data.to_string(),
                        });
                    }
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        messages.push(InboundMessage::Transcript {
                            text: text.to_string(),
                        });
                    }
                }
            }

            if let Some(text) = content.pointer("/outputTranscription/text").and_then(Value::as_str) {
                if !text.is_empty() {
                    messages.push(InboundMessage::Transcript {
                        text: text.to_string(),
                    });
                }
            }

            if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
                messages.push(InboundMessage::TurnState { speaking: false });
            }
        }

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error");
            messages.push(InboundMessage::Error {
                message: message.to_string(),
            });
        }

        if messages.is_empty() {
            // Usage metadata, tool calls and similar are valid but not ours
            let keys: Vec<&str> = value
                .as_object()
                .map(|object| object.keys().map(String::as_str).collect())
                .unwrap_or_default();
            return Err(SessionError::MalformedInbound(format!(
                "no known fields in message (keys: {:?})",
                keys
            )));
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn text(frame: WireFrame) -> String {
        match frame {
            WireFrame::Text(text) => text,
            WireFrame::Binary(bytes) => String::from_utf8(bytes).unwrap(),
        }
    }

    #[test]
    fn test_generic_audio_message_shape() {
        let chunk = EncodedChunk::from_samples(&[1, 2, 3]);
        let json: Value = serde_json::from_str(&text(GenericCodec.encode_media(&chunk).unwrap())).unwrap();

        assert_eq!(json["mimeType"], "audio/pcm");
        assert_eq!(json["chunk"], chunk.data);
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_generic_setup_carries_instructions() {
        let setup = SetupRequest {
            model: "models/test".to_string(),
            system_instructions: "Be brief.".to_string(),
        };
        let json: Value = serde_json::from_str(&text(GenericCodec.encode_setup(&setup).unwrap())).unwrap();
        assert_eq!(json["setup"]["systemInstructions"], "Be brief.");
        assert_eq!(json["setup"]["model"], "models/test");
    }

    #[test]
    fn test_generic_decodes_each_kind() {
        let cases = [
            (r#"{"kind":"transcript","text":"hi"}"#, InboundMessage::Transcript { text: "hi".into() }),
            (r#"{"kind":"audioFragment","data":"AAA="}"#, InboundMessage::AudioFragment { data: "AAA=".into() }),
            (r#"{"kind":"turnState","speaking":true}"#, InboundMessage::TurnState { speaking: true }),
            (r#"{"kind":"setupComplete"}"#, InboundMessage::SetupComplete),
            (r#"{"kind":"interrupted"}"#, InboundMessage::Interrupted),
        ];

        for (raw, expected) in cases {
            let decoded = GenericCodec.decode(&WireFrame::Text(raw.to_string())).unwrap();
            assert_eq!(decoded, vec![expected]);
        }
    }

    #[test]
    fn test_generic_unknown_kind_is_malformed() {
        let result = GenericCodec.decode(&WireFrame::Text(r#"{"kind":"bogus"}"#.to_string()));
        assert!(matches!(result, Err(SessionError::MalformedInbound(_))));
    }

    #[test]
    fn test_generic_accepts_binary_json() {
        let frame = WireFrame::Binary(br#"{"kind":"setupComplete"}"#.to_vec());
        assert_eq!(GenericCodec.decode(&frame).unwrap(), vec![InboundMessage::SetupComplete]);
    }

    #[test]
    fn test_gemini_setup_shape() {
        let setup = SetupRequest {
            model: "models/gemini-2.0-flash-exp".to_string(),
            system_instructions: "You are helpful.".to_string(),
        };
        let json: Value = serde_json::from_str(&text(GeminiCodec.encode_setup(&setup).unwrap())).unwrap();

        assert_eq!(json["setup"]["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "You are helpful.");
    }

    #[test]
    fn test_gemini_media_chunks() {
        let chunk = EncodedChunk::from_samples(&[0; 4]);
        let json: Value = serde_json::from_str(&text(GeminiCodec.encode_media(&chunk).unwrap())).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm");
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], chunk.data);
    }

    #[test]
    fn test_gemini_setup_complete_in_binary_frame() {
        let frame = WireFrame::Binary(br#"{"setupComplete": {}}"#.to_vec());
        assert_eq!(GeminiCodec.decode(&frame).unwrap(), vec![InboundMessage::SetupComplete]);
    }

    #[test]
    fn test_gemini_model_turn_with_audio_and_text() {
        let audio = base64::engine::general_purpose::STANDARD.encode([10u8, 0, 20, 0]);
        let raw = format!(
            r#"{{"serverContent": {{"modelTurn": {{"parts": [{{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{audio}"}}}}, {{"text": "Hello"}}]}}, "turnComplete": true}}}}"#
        );
        let messages = GeminiCodec.decode(&WireFrame::Text(raw)).unwrap();

        assert_eq!(
            messages,
            vec![
                InboundMessage::TurnState { speaking: true },
                InboundMessage::AudioFragment { data: audio },
                InboundMessage::Transcript { text: "Hello".into() },
                InboundMessage::TurnState { speaking: false },
            ]
        );
    }

    #[test]
    fn test_gemini_model_turn_opens_remote_turn() {
        let raw = r#"{"serverContent": {"modelTurn": {"parts": [{"text": "Thinking"}]}}}"#;
        let messages = GeminiCodec.decode(&WireFrame::Text(raw.to_string())).unwrap();

        assert_eq!(messages[0], InboundMessage::TurnState { speaking: true });
        assert!(!messages.contains(&InboundMessage::TurnState { speaking: false }));
    }

    #[test]
    fn test_gemini_turn_complete_alone_closes_turn() {
        let raw = r#"{"serverContent": {"turnComplete": true}}"#;
        assert_eq!(
            GeminiCodec.decode(&WireFrame::Text(raw.to_string())).unwrap(),
            vec![InboundMessage::TurnState { speaking: false }]
        );
    }

    #[test]
    fn test_gemini_interrupted() {
        let frame = WireFrame::Text(r#"{"serverContent": {"interrupted": true}}"#.to_string());
        assert_eq!(GeminiCodec.decode(&frame).unwrap(), vec![InboundMessage::Interrupted]);
    }

    #[test]
    fn test_gemini_error() {
        let frame = WireFrame::Text(r#"{"error": {"message": "Rate limit exceeded"}}"#.to_string());
        assert!(matches!(
            &GeminiCodec.decode(&frame).unwrap()[0],
            InboundMessage::Error { message } if message.contains("Rate limit")
        ));
    }

    #[test]
    fn test_gemini_unrelated_message_is_malformed() {
        let frame = WireFrame::Text(r#"{"usageMetadata": {"totalTokenCount": 3}}"#.to_string());
        assert!(matches!(GeminiCodec.decode(&frame), Err(SessionError::MalformedInbound(_))));
    }

    #[test]
    fn test_gemini_invalid_json() {
        let frame = WireFrame::Text("not json at all".to_string());
        assert!(matches!(GeminiCodec.decode(&frame), Err(SessionError::MalformedInbound(_))));
    }
}
