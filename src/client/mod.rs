//! Terminal chat client
//!
//! Session state, prompt shaping and reply cleaning for the `chat` binary.
//! Network calls live in [`api_client`].

pub mod api_client;

pub use api_client::ApiClient;

use crate::models::{Exchange, SessionId};
use std::fmt;

/// Number of past exchanges folded into each prompt.
pub const DEFAULT_HISTORY_LEVEL: usize = 3;

//
// ================= Session State =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    AboutApp,
    TechnicalInfrastructure,
    Chatbot,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::AboutApp, Mode::TechnicalInfrastructure, Mode::Chatbot];

    pub fn label(self) -> &'static str {
        match self {
            Mode::AboutApp => "About App",
            Mode::TechnicalInfrastructure => "Technical Infrastructure",
            Mode::Chatbot => "RaifBot: Pinterest + DuckGo",
        }
    }

    /// 1-based menu index as typed after `/mode`.
    pub fn from_index(index: usize) -> Option<Mode> {
        index.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub role: Role,
    pub content: String,
}

/// Everything one client knows about its conversation.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: SessionId,
    pub messages: Vec<DisplayMessage>,
    pub mode: Mode,
}

impl ChatSession {
    pub fn new(mode: Mode) -> Self {
        let mut session = Self {
            session_id: SessionId::generate(),
            messages: Vec::new(),
            mode,
        };
        session.reset();
        session
    }

    /// Fresh identity, cleared transcript, greeting pair re-seeded.
    pub fn reset(&mut self) {
        self.session_id = SessionId::generate();
        self.messages.clear();
        self.push(Role::User, "Hey! 👋");
        self.push(
            Role::Assistant,
            format!("Hello! Ask me anything related to {} 🤗", self.mode),
        );
    }

    pub fn switch_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.reset();
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(DisplayMessage {
            role,
            content: content.into(),
        });
    }
}

//
// ================= Prompt Shaping =================
//

/// Wrap `query` with the last `level` exchanges of `history`; a level of 0
/// keeps the whole history.
pub fn history_prompt(query: &str, history: &[Exchange], level: usize) -> String {
    let start = match level {
        0 => 0,
        n => history.len().saturating_sub(n),
    };
    let recent = &history[start..];
    let rendered = recent
        .iter()
        .map(|e| format!("[{:?}, {:?}]", e.user(), e.assistant()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Chat history: [{}].\nKeep in mind the above chat history to answer following input question: {}",
        rendered, query
    )
}

//
// ================= Reply Cleaning =================
//

/// Turn raw streamed text into display text. Never fails: when the reply is
/// not a valid escaped literal the raw text is lightly scrubbed instead.
pub fn parse_response(raw: &str) -> String {
    let fenced = raw.replace("```", "~~~").replace("``", "~~");
    let stripped = fenced.trim_matches(|c| matches!(c, '\'' | '"' | '\n' | ' '));

    decode_escapes(stripped).unwrap_or_else(|| scrub(raw))
}

fn scrub(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .chars()
        .map(|c| if matches!(c, '`' | '"' | '{' | '}') { ' ' } else { c })
        .collect()
}

/// Decode `body` as the inside of a double-quoted string literal.
/// `None` on a bare quote, a raw newline, or a dangling/unknown escape.
fn decode_escapes(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return None,
            '\\' => {
                let escaped = chars.next()?;
                match escaped {
                    '\n' => {}
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'a' => out.push('\u{07}'),
                    'b' => out.push('\u{08}'),
                    'f' => out.push('\u{0c}'),
                    'v' => out.push('\u{0b}'),
                    'x' => out.push(hex_char(&mut chars, 2)?),
                    'u' => out.push(hex_char(&mut chars, 4)?),
                    'U' => out.push(hex_char(&mut chars, 8)?),
                    '0'..='7' => {
                        let mut value = escaped.to_digit(8)?;
                        for _ in 0..2 {
                            match chars.peek().and_then(|d| d.to_digit(8)) {
                                Some(d) => {
                                    value = value * 8 + d;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        out.push(char::from_u32(value)?);
                    }
                    _ => return None,
                }
            }
            other => out.push(other),
        }
    }

    Some(out)
}

fn hex_char(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, digits: usize) -> Option<char> {
    let mut value = 0u32;
    for _ in 0..digits {
        value = value.checked_mul(16)? + chars.next()?.to_digit(16)?;
    }
    char::from_u32(value)
}
