pub mod chat;
pub mod error;
pub mod frame;

pub use chat::{ChatMessage, ChatRole};
pub use error::{Error, Result};
pub use frame::{FrameBuffer, SseFrame};
