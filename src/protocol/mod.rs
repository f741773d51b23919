pub mod codec;
pub mod messages;
pub mod transport;

pub use codec::{GeminiCodec, GenericCodec, WireCodec, WireDialect};
pub use messages::{
    decode_pcm, ConnectionStatus, EncodedChunk, InboundMessage, SetupRequest, PCM_MIME_TYPE,
};
pub use transport::{ChannelTransport, RemoteEnd, Transport, TransportLink, WebSocketTransport, WireFrame};
