//! Context assembly for LLM turns
//!
//! Merges the personality directive, emotional-state fragment, topic
//! summary, fact block, retrieved knowledge, recent conversation history
//! and the raw user text into one ordered payload. The order is fixed;
//! every fragment has its own character budget and the assembled payload
//! never exceeds the total budget. Assembly is pure: identical inputs
//! produce identical output.

use crate::store::{Message, Role};

/// Character budgets for context assembly
#[derive(Debug, Clone)]
pub struct ContextBudgets {
    pub personality: usize,
    pub emotion: usize,
    pub conversation: usize,
    pub facts: usize,
    pub knowledge: usize,
    /// Budget for recent message history (whole messages, newest win)
    pub history: usize,
    /// Hard ceiling for the whole payload
    pub total: usize,
}

impl Default for ContextBudgets {
    fn default() -> Self {
        Self {
            personality: 600,
            emotion: 300,
            conversation: 500,
            facts: 800,
            knowledge: 1200,
            history: 1600,
            total: 6000,
        }
    }
}

/// Externally supplied context fragments
///
/// Produced by sibling subsystems; this crate only positions and truncates
/// them.
#[derive(Debug, Clone, Default)]
pub struct ExternalFragments {
    /// Personality/tone directive
    pub personality: Option<String>,
    /// Detected emotional state of the user
    pub emotion: Option<String>,
    /// Retrieved knowledge snippets
    pub knowledge: Option<String>,
}

/// What a payload block contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Personality,
    Emotion,
    Conversation,
    Facts,
    Knowledge,
    History,
    UserText,
}

/// Role tag attached to a payload block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    System,
    User,
    Assistant,
}

impl BlockRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One ordered, role-tagged block of the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub kind: BlockKind,
    pub role: BlockRole,
    pub content: String,
}

/// The assembled, size-bounded context for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPayload {
    pub blocks: Vec<ContextBlock>,
}

impl ContextPayload {
    /// Total character count across all blocks
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.blocks.iter().map(|b| b.content.chars().count()).sum()
    }

    /// The raw user text block
    #[must_use]
    pub fn user_text(&self) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.kind == BlockKind::UserText)
            .map(|b| b.content.as_str())
    }

    /// Flatten to a single prompt string (for clients without a chat API)
    #[must_use]
    pub fn render(&self) -> String {
        let parts: Vec<&str> = self.blocks.iter().map(|b| b.content.as_str()).collect();
        parts.join("\n\n")
    }
}

/// Assembles context payloads under fixed ordering and budgets
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    budgets: ContextBudgets,
}

impl ContextAssembler {
    /// Create an assembler with the given budgets
    #[must_use]
    pub const fn new(budgets: ContextBudgets) -> Self {
        Self { budgets }
    }

    /// Budgets in effect
    #[must_use]
    pub const fn budgets(&self) -> &ContextBudgets {
        &self.budgets
    }

    /// Assemble the payload for one turn
    ///
    /// Order is fixed: personality, emotion, conversation summary plus
    /// transition hint, facts, knowledge, recent history, then the raw
    /// user text last. Empty fragments are omitted; oversized ones are
    /// truncated, first to their own budget and then — lowest priority
    /// first — until the whole payload fits the total budget. History is
    /// dropped whole-message, oldest first. The user text is only
    /// truncated if it alone exceeds the total.
    #[must_use]
    pub fn assemble(
        &self,
        conversation_summary: &str,
        transition_hint: Option<&str>,
        facts_block: &str,
        fragments: &ExternalFragments,
        history: &[Message],
        user_text: &str,
    ) -> ContextPayload {
        let mut blocks = Vec::new();

        let mut push = |kind: BlockKind, content: &str, budget: usize| {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                blocks.push(ContextBlock {
                    kind,
                    role: BlockRole::System,
                    content: truncate_chars(trimmed, budget),
                });
            }
        };

        if let Some(personality) = &fragments.personality {
            push(BlockKind::Personality, personality, self.budgets.personality);
        }
        if let Some(emotion) = &fragments.emotion {
            push(BlockKind::Emotion, emotion, self.budgets.emotion);
        }

        let conversation = transition_hint.map_or_else(
            || conversation_summary.to_string(),
            |hint| {
                if conversation_summary.is_empty() {
                    hint.to_string()
                } else {
                    format!("{conversation_summary}\n{hint}")
                }
            },
        );
        push(BlockKind::Conversation, &conversation, self.budgets.conversation);
        push(BlockKind::Facts, facts_block, self.budgets.facts);
        if let Some(knowledge) = &fragments.knowledge {
            push(BlockKind::Knowledge, knowledge, self.budgets.knowledge);
        }

        for message in select_history(history, self.budgets.history) {
            blocks.push(ContextBlock {
                kind: BlockKind::History,
                role: match message.role {
                    Role::User => BlockRole::User,
                    Role::Assistant => BlockRole::Assistant,
                },
                content: message.content.clone(),
            });
        }

        blocks.push(ContextBlock {
            kind: BlockKind::UserText,
            role: BlockRole::User,
            content: user_text.to_string(),
        });

        let mut payload = ContextPayload { blocks };
        self.enforce_total(&mut payload);
        payload
    }

    /// Shrink the payload until it fits the total budget
    ///
    /// History goes first (whole messages, oldest out), then fragments in
    /// reverse priority order, then — only if it alone overflows — the
    /// user text.
    fn enforce_total(&self, payload: &mut ContextPayload) {
        const TRIM_ORDER: &[BlockKind] = &[
            BlockKind::Knowledge,
            BlockKind::Facts,
            BlockKind::Conversation,
            BlockKind::Emotion,
            BlockKind::Personality,
        ];

        while payload.total_chars() > self.budgets.total {
            let Some(pos) = payload.blocks.iter().position(|b| b.kind == BlockKind::History)
            else {
                break;
            };
            payload.blocks.remove(pos);
        }

        for kind in TRIM_ORDER {
            let total = payload.total_chars();
            if total <= self.budgets.total {
                return;
            }
            let excess = total - self.budgets.total;

            if let Some(block) = payload.blocks.iter_mut().find(|b| b.kind == *kind) {
                let len = block.content.chars().count();
                block.content = truncate_chars(&block.content, len.saturating_sub(excess));
            }
            payload
                .blocks
                .retain(|b| b.kind == BlockKind::UserText || !b.content.is_empty());
        }

        // Only the user text is left to trim
        if payload.total_chars() > self.budgets.total
            && let Some(block) = payload
                .blocks
                .iter_mut()
                .find(|b| b.kind == BlockKind::UserText)
        {
            block.content = truncate_chars(&block.content, self.budgets.total);
        }
    }
}

/// Pick the most recent messages fitting the history budget, returned
/// oldest-first
fn select_history(history: &[Message], budget_chars: usize) -> Vec<&Message> {
    let mut used = 0;
    let mut keep_from = history.len();
    for message in history.iter().rev() {
        let cost = message.content.chars().count();
        if used + cost > budget_chars {
            break;
        }
        used += cost;
        keep_from -= 1;
    }
    history[keep_from..].iter().collect()
}

/// Truncate to at most `max` characters, on a char boundary
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
