//! Messages passed from the generation worker to the consumer

use crate::types::errors::GenerationError;

#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Token generated, in production order
    Token(u32),

    /// Generation completed without an error
    Finished,

    /// Generation failed after the worker ran its cleanup
    Failed(GenerationError),
}

impl WorkerMessage {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Token(_))
    }
}
