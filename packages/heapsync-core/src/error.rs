use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Protocol or lifecycle misuse, such as a missing transaction, a terminated heap, an unknown
    /// id or the wrong parent kind.
    #[error("invalid heap state: {0}")]
    State(String),
    /// A locally-originated mutation reached an immutable heap.
    #[error("immutable heap: {0}")]
    ImmutableViolation(String),
    /// Node kinds disagree, or a delta stream is corrupt.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// A list index, or a dictated node id, outside the accepted range.
    #[error("index out of bounds: {0}")]
    Bounds(String),
}

impl Error {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }

    pub(crate) fn immutable(msg: impl Into<String>) -> Self {
        Error::ImmutableViolation(msg.into())
    }
}
