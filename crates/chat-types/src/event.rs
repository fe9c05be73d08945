use serde::{Deserialize, Serialize};

/// Events emitted by the chat controller.
/// The view subscribes to these for reactive updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    /// The session collection changed (create, rename, pin, delete, reorder, import)
    SessionsChanged,

    /// A different session became current
    ActiveSessionChanged { session_id: String },

    /// A session's message history grew
    MessageAppended { session_id: String },

    /// A request was opened for this session
    GenerationStarted { session_id: String },

    /// Accumulated assistant text after one more chunk
    StreamDelta { session_id: String, text: String },

    /// Stream finished and the reply was persisted
    GenerationCompleted { session_id: String, text: String },

    /// The user stopped the stream; the stop marker was persisted
    GenerationStopped { session_id: String },

    /// Transport failure; nothing was persisted for the reply
    GenerationFailed { session_id: String, message: String },

    /// Health probe flipped the connectivity state
    ConnectivityChanged { online: bool },
}
