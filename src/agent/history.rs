//! Conversation turns and the prompt format built from them.

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    /// Label used in front of each prompt line.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Bot => "Bot",
        }
    }
}

/// One contribution to a conversation. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self { role: Role::Bot, text: text.into() }
    }
}

/// Ordered turns of one session; index order is conversational order.
pub type History = Vec<Turn>;

/// Render the most recent `max_turns` turns (all of them when `max_turns` is 0)
/// as `"User: ..."` / `"Bot: ..."` lines joined by newlines.
pub fn render_prompt(history: &[Turn], max_turns: usize) -> String {
    let start = if max_turns == 0 {
        0
    } else {
        history.len().saturating_sub(max_turns)
    };

    history[start..]
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}
