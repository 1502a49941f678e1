//! Rolling conversation state shared by all adapter families

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation, with content in whatever shape the owning
/// family's wire format uses. Turns never move between adapter instances.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: Value,
}

impl ConversationTurn {
    pub fn user(content: Value) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Value) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Render as a `{"role": ..., "content": ...}` message object.
    pub fn to_message(&self) -> Value {
        json!({
            "role": self.role,
            "content": self.content,
        })
    }
}

/// Bounded FIFO buffer of recent turns.
///
/// Capacity counts individual turns, not request/response pairs. A capacity
/// of zero disables retention entirely.
#[derive(Debug, Default)]
pub struct ContextWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, immediately evicting oldest turns if the new
    /// limit is tighter.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.truncate();
    }

    /// Append a turn, evicting the oldest when over capacity.
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        self.turns.push_back(turn);
        self.truncate();
    }

    fn truncate(&mut self) {
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> ConversationTurn {
        ConversationTurn::user(json!(format!("turn {n}")))
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut window = ContextWindow::new(3);
        for n in 0..10 {
            window.push(turn(n));
            assert!(window.len() <= 3);
        }
        let contents: Vec<_> = window.iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, vec![json!("turn 7"), json!("turn 8"), json!("turn 9")]);
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut window = ContextWindow::new(0);
        window.push(turn(1));
        window.push(turn(2));
        assert!(window.is_empty());
    }

    #[test]
    fn test_clear_empties() {
        let mut window = ContextWindow::new(4);
        window.push(turn(1));
        window.push(turn(2));
        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let mut window = ContextWindow::new(4);
        for n in 0..4 {
            window.push(turn(n));
        }
        window.set_capacity(2);
        let contents: Vec<_> = window.iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, vec![json!("turn 2"), json!("turn 3")]);
    }

    #[test]
    fn test_message_rendering() {
        let msg = ConversationTurn::assistant(json!([{"text": "hello"}])).to_message();
        assert_eq!(msg["role"], json!("assistant"));
        assert_eq!(msg["content"], json!([{"text": "hello"}]));
    }
}
