/// Error raised while decoding a firehose frame, a CAR block store or a
/// record block. Never fatal to the consumer loop: the caller drops the
/// offending unit (operation or commit) and moves on.
#[derive(Debug)]
pub enum DecodeError {
    /// Frame header/body framing problem
    Frame(String),
    /// Malformed CAR container
    Car(String),
    /// Malformed DAG-CBOR
    Cbor(String),
    /// Malformed content identifier
    Cid(String),
    /// Required field absent or of the wrong type
    MissingField(&'static str),
    /// Change descriptor references a block the store does not carry
    BlockNotFound(String),
    /// Unknown op action or unparseable path
    InvalidOp(String),
}

impl<T: std::fmt::Debug> From<ciborium::de::Error<T>> for DecodeError {
    fn from(err: ciborium::de::Error<T>) -> Self {
        DecodeError::Cbor(format!("{:?}", err))
    }
}

impl From<cid::Error> for DecodeError {
    fn from(err: cid::Error) -> Self {
        DecodeError::Cid(err.to_string())
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Frame(msg) => write!(f, "Frame error: {}", msg),
            DecodeError::Car(msg) => write!(f, "CAR error: {}", msg),
            DecodeError::Cbor(msg) => write!(f, "CBOR error: {}", msg),
            DecodeError::Cid(msg) => write!(f, "CID error: {}", msg),
            DecodeError::MissingField(field) => write!(f, "Missing field: {}", field),
            DecodeError::BlockNotFound(cid) => write!(f, "Block not found: {}", cid),
            DecodeError::InvalidOp(msg) => write!(f, "Invalid op: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}
