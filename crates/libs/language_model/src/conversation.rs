use crate::{ChatCompletion, ContentPart, ConversationMessage, LlmResult};
use std::fmt;
use tracing::debug;

/// How much earlier conversation is resent with each new turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// The full history.
    Unbounded,
    /// Only the last `turns` human/assistant pairs.
    SlidingWindow { turns: usize },
    /// The full history until `turns` pairs have been committed, then exactly those pairs forever.
    FreezeAfter { turns: usize },
}

impl fmt::Display for MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("unbounded"),
            Self::SlidingWindow { turns } => write!(f, "sliding_window({turns})"),
            Self::FreezeAfter { turns } => write!(f, "freeze_after({turns})"),
        }
    }
}

/// Message log of one multi-turn run.
///
/// Only successful turns are committed, as a human/assistant pair. Once frozen, the prefix
/// never changes again for the lifetime of the state (a [`reset`](Self::reset) starts a new
/// context).
#[derive(Debug, Clone)]
pub struct ConversationState {
    system: Option<String>,
    policy: MemoryPolicy,
    history: Vec<ConversationMessage>,
    committed_turns: usize,
    frozen: bool,
    frozen_prefix: Vec<ConversationMessage>,
}

impl ConversationState {
    #[must_use]
    pub fn new(system: Option<String>, policy: MemoryPolicy) -> Self {
        let mut state = Self {
            system,
            policy,
            history: Vec::new(),
            committed_turns: 0,
            frozen: false,
            frozen_prefix: Vec::new(),
        };
        state.freeze_if_due();
        state
    }

    #[must_use]
    pub const fn policy(&self) -> MemoryPolicy {
        self.policy
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn frozen_prefix(&self) -> &[ConversationMessage] {
        &self.frozen_prefix
    }

    #[must_use]
    pub const fn committed_turns(&self) -> usize {
        self.committed_turns
    }

    /// Messages to send for a new human turn, the turn itself last.
    #[must_use]
    pub fn context_for(&self, human: &ConversationMessage) -> Vec<ConversationMessage> {
        let remembered: &[ConversationMessage] = match self.policy {
            _ if self.frozen => &self.frozen_prefix,
            MemoryPolicy::Unbounded | MemoryPolicy::FreezeAfter { .. } => &self.history,
            MemoryPolicy::SlidingWindow { turns } => {
                let keep = (turns * 2).min(self.history.len());
                &self.history[self.history.len() - keep..]
            }
        };
        let mut context = Vec::with_capacity(remembered.len() + 2);
        if let Some(system) = &self.system {
            context.push(ConversationMessage::System(system.clone()));
        }
        context.extend_from_slice(remembered);
        context.push(human.clone());
        context
    }

    /// Records a successful turn.
    pub fn commit(&mut self, human: ConversationMessage, assistant: ConversationMessage) {
        self.committed_turns += 1;
        if self.frozen {
            return;
        }
        self.history.push(human);
        self.history.push(assistant);
        match self.policy {
            MemoryPolicy::SlidingWindow { turns } => {
                let excess = self.history.len().saturating_sub(turns * 2);
                self.history.drain(..excess);
            }
            MemoryPolicy::FreezeAfter { .. } => self.freeze_if_due(),
            MemoryPolicy::Unbounded => {}
        }
    }

    /// Drops every remembered turn and unfreezes; the system prompt and policy stay.
    pub fn reset(&mut self) {
        debug!(policy = %self.policy, turns = self.committed_turns, "Resetting conversation");
        self.history.clear();
        self.frozen_prefix.clear();
        self.frozen = false;
        self.committed_turns = 0;
        self.freeze_if_due();
    }

    /// Sends one human turn with the remembered context and commits it on success.
    pub async fn turn<C>(&mut self, client: &C, user_parts: Vec<ContentPart>) -> LlmResult<String>
    where
        C: ChatCompletion + ?Sized,
    {
        let human = ConversationMessage::Human(user_parts);
        let context = self.context_for(&human);
        debug!(context_len = context.len(), frozen = self.frozen, "Sending conversation turn");
        let reply = client.call(&context).await?;
        self.commit(human, ConversationMessage::assistant_text(reply.clone()));
        Ok(reply)
    }

    fn freeze_if_due(&mut self) {
        if let MemoryPolicy::FreezeAfter { turns } = self.policy
            && !self.frozen
            && self.committed_turns >= turns
        {
            self.frozen_prefix = std::mem::take(&mut self.history);
            self.frozen = true;
            debug!(prefix_len = self.frozen_prefix.len(), "Conversation memory frozen");
        }
    }
}
