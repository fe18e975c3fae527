//! Conversation-related types.

use chatloop_model::ModelMessage;

use crate::error::Error;

/// Represents a conversation.
///
/// The history is append-only, and only the owning agent appends to it.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Returns all the messages in order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the conversation has no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&ModelMessage> {
        self.messages.last()
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.messages.push(msg);
    }

    #[inline]
    pub(crate) fn extend(
        &mut self,
        msgs: impl IntoIterator<Item = ModelMessage>,
    ) {
        self.messages.extend(msgs);
    }

    /// Checks that `new_msgs` can be appended to the conversation.
    ///
    /// Every tool result must answer a tool call issued earlier, either in
    /// the history or in `new_msgs` itself, and no tool call may be
    /// answered twice. Once `new_msgs` is appended, every issued tool call
    /// must have been answered, and no other message may come between a
    /// tool call and its result.
    pub(crate) fn check_tool_results(
        &self,
        new_msgs: &[ModelMessage],
    ) -> Result<(), Error> {
        let mut tracker = ToolCallTracker::default();
        for msg in &self.messages {
            tracker.track(msg);
        }

        for msg in new_msgs {
            match msg {
                ModelMessage::Tool(result) => {
                    if !tracker.answer(&result.id) {
                        return Err(Error::UnmatchedToolResult(
                            result.id.clone(),
                        ));
                    }
                }
                _ => {
                    tracker.ensure_answered()?;
                    tracker.track(msg);
                }
            }
        }
        tracker.ensure_answered()
    }
}

/// Tool calls that are issued but not answered yet, in issue order.
#[derive(Default)]
struct ToolCallTracker<'a> {
    pending: Vec<&'a str>,
}

impl<'a> ToolCallTracker<'a> {
    fn track(&mut self, msg: &'a ModelMessage) {
        match msg {
            ModelMessage::Assistant(assistant) => {
                self.pending
                    .extend(assistant.tool_calls.iter().map(|c| c.id.as_str()));
            }
            ModelMessage::Tool(result) => {
                self.answer(&result.id);
            }
            _ => {}
        }
    }

    fn answer(&mut self, id: &str) -> bool {
        let Some(pos) = self.pending.iter().position(|p| *p == id) else {
            return false;
        };
        self.pending.remove(pos);
        true
    }

    fn ensure_answered(&self) -> Result<(), Error> {
        match self.pending.first() {
            Some(id) => Err(Error::UnansweredToolCall((*id).to_owned())),
            None => Ok(()),
        }
    }
}
