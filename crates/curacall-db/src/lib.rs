pub mod conversation_store;

pub use conversation_store::{ConversationRow, ConversationStore, MessageRow, SettingsRow};
