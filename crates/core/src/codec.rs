use crate::error::CodecError;
use crate::message::Body;

/// Serializer seam between structured bodies and the wire.
///
/// The adapter never inspects bodies; it passes them through a codec on send
/// and receive. Implementations must be cheap to share across tasks.
pub trait BodyCodec: Send + Sync {
    /// MIME-ish label, used for logging only.
    fn content_type(&self) -> &'static str;

    /// Encode a body into the message-body string sent over the wire.
    fn encode(&self, body: &Body) -> Result<String, CodecError>;

    /// Decode a received message-body string.
    fn decode(&self, raw: &str) -> Result<Body, CodecError>;
}

/// Default JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, body: &Body) -> Result<String, CodecError> {
        serde_json::to_string(body).map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<Body, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError(e.to_string()))
    }
}
