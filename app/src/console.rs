use lexgate_core::{ChatStreamObserver, CompletedResponse};
use std::io::Write;

/// Prints streamed answers to a terminal: a progress mark per fragment on
/// `progress`, the final HTML (or the partial text on failure) on `out`.
pub struct TerminalObserver<O: Write, P: Write> {
    out: O,
    progress: P,
    chunks: usize,
}

impl<O: Write, P: Write> TerminalObserver<O, P> {
    pub fn new(out: O, progress: P) -> Self {
        Self {
            out,
            progress,
            chunks: 0,
        }
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn into_inner(self) -> (O, P) {
        (self.out, self.progress)
    }
}

impl<O: Write, P: Write> ChatStreamObserver for TerminalObserver<O, P> {
    fn on_chunk(&mut self, _html: &str) {
        self.chunks += 1;
        write!(self.progress, ".").ok();
        self.progress.flush().ok();
    }

    fn on_error(&mut self, partial_text: &str, message: &str) {
        writeln!(self.progress).ok();
        if !partial_text.is_empty() {
            writeln!(self.out, "{partial_text}").ok();
        }
        writeln!(self.out, "[answer interrupted: {message}]").ok();
    }

    fn on_complete(&mut self, response: CompletedResponse) {
        writeln!(self.progress).ok();
        writeln!(self.out, "{}", response.html.trim_end()).ok();
        if let Some(query) = &response.metadata.query {
            writeln!(self.out, "[source query: {query}]").ok();
        }
    }
}

/// What a line typed into the chat prompt asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    NewConversation,
    Quit,
    Message(&'a str),
    Empty,
}

pub fn parse_chat_input(line: &str) -> ChatInput<'_> {
    match line.trim() {
        "" => ChatInput::Empty,
        "/new" => ChatInput::NewConversation,
        "/quit" | "/exit" => ChatInput::Quit,
        message => ChatInput::Message(message),
    }
}
