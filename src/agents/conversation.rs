use serde::{Deserialize, Serialize};

use crate::agents::model::AgentTurn;

/// One entry of the synthesis conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    /// Authored prompt or corrective feedback.
    User { content: String },
    Agent(AgentTurn),
    ToolResult { call_id: String, content: String },
}

/// Append-only turn log plus the bounded iteration counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
    iteration: u32,
    max_iterations: u32,
}

impl Conversation {
    pub fn new(prompt: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            turns: vec![Turn::User {
                content: prompt.into(),
            }],
            iteration: 0,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::User {
            content: content.into(),
        });
    }

    pub fn push_agent(&mut self, turn: AgentTurn) {
        self.turns.push(Turn::Agent(turn));
    }

    pub fn push_tool_result(&mut self, call_id: impl Into<String>, content: impl Into<String>) {
        self.turns.push(Turn::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        });
    }

    /// Start the next iteration. Returns `false` once the budget is spent.
    pub fn advance(&mut self) -> bool {
        if self.iteration >= self.max_iterations {
            return false;
        }
        self.iteration += 1;
        true
    }

    /// 1-based number of the current iteration, 0 before the first `advance`.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn is_final_iteration(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn remaining(&self) -> u32 {
        self.max_iterations - self.iteration
    }

    /// Number of corrective or prompt turns authored so far.
    pub fn user_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::User { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_budget() {
        let mut conversation = Conversation::new("hi", 2);
        assert_eq!(conversation.iteration(), 0);
        assert!(conversation.advance());
        assert!(!conversation.is_final_iteration());
        assert_eq!(conversation.remaining(), 1);
        assert!(conversation.advance());
        assert!(conversation.is_final_iteration());
        assert!(!conversation.advance());
        assert_eq!(conversation.iteration(), 2);
    }

    #[test]
    fn test_turns_are_appended_in_order() {
        let mut conversation = Conversation::new("prompt", 3);
        conversation.push_agent(AgentTurn::text("{}"));
        conversation.push_tool_result("call_1", "{\"matchCount\":0}");
        conversation.push_user("try again");

        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation.user_turns(), 2);
        assert!(matches!(conversation.turns()[0], Turn::User { .. }));
        assert!(matches!(conversation.turns()[2], Turn::ToolResult { .. }));
        assert_eq!(
            conversation.last(),
            Some(&Turn::User {
                content: "try again".to_string()
            })
        );
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        let mut conversation = Conversation::new("p", 0);
        assert_eq!(conversation.max_iterations(), 1);
        assert!(conversation.advance());
        assert!(!conversation.advance());
    }
}
