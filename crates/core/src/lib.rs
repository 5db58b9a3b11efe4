pub mod codec;
pub mod config;
pub mod error;
pub mod message;

pub use codec::{BodyCodec, JsonCodec};
pub use config::{load_dotenv, AwsConfig, MessagingConfig, WorkerPoolConfig};
pub use error::{CodecError, TargetError};
pub use message::{
    Body, Headers, Message, ReservedHeaders, Target, HEADER_EVENT_TYPE, HEADER_METHOD,
    HEADER_REPLY_QUEUE_URL, HEADER_REQUEST_ID,
};
