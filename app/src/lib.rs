pub mod console;

pub use console::{parse_chat_input, ChatInput, TerminalObserver};
