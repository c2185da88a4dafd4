#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The queue entry could not be turned into a runnable job. Such
    /// payloads are dropped, never requeued.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}
