/// Errors that can occur while (re)initializing a channel store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Buffers must be able to hold at least one sample.
    #[error("channel capacity must be at least 1")]
    ZeroCapacity,

    /// Channel names key the store, so they must be unique.
    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
