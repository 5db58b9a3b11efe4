use thiserror::Error;

/// Failure while encoding or decoding a message body.
///
/// Codec implementations wrap their backend's error into this type so the
/// adapter stays independent of the serializer in use.
#[derive(Debug, Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// Malformed target address string.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid queue target `{0}`, expected `<queue>/<method>`")]
    InvalidQueueTarget(String),

    #[error("invalid topic target `{0}`, expected `<topic>#<event_type>`")]
    InvalidTopicTarget(String),
}
