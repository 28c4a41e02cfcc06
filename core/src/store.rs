//! The sole mutator of thread data. Holds one `tokio::sync::Mutex<Thread>`
//! per thread id so all mutations on a thread serialize while unrelated
//! threads make progress concurrently; readers always see a consistent
//! snapshot, never a partially-applied mutation.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::message::{
    AssistantMessage, AssistantState, ContentPart, ContextItem, Message, MessageCheckpoint,
    MessageId, Thread, ThreadId, ToolCall, ToolCallId, ToolCallStatus, ToolMessage, ToolMessageStatus,
};
use crate::compaction::CompactedSummary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown thread: {0}")]
    UnknownThread(ThreadId),
    #[error("no in-progress assistant message on thread {0}")]
    NoInProgressAssistant(ThreadId),
    #[error("unknown tool call: {0}")]
    UnknownToolCall(String),
    #[error("illegal tool call status transition for {0}")]
    IllegalStatusTransition(ToolCallId),
    #[error("unknown checkpoint: {0}")]
    UnknownCheckpoint(uuid::Uuid),
}

/// Owns every [`Thread`] in the process and is the only component allowed to
/// mutate one.
#[derive(Default)]
pub struct ConversationStore {
    threads: DashMap<ThreadId, Arc<Mutex<Thread>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_thread(&self) -> ThreadId {
        let thread = Thread::new();
        let id = thread.id;
        self.threads.insert(id, Arc::new(Mutex::new(thread)));
        tracing::debug!(thread_id = %id, "thread created");
        id
    }

    pub fn delete_thread(&self, id: ThreadId) {
        self.threads.remove(&id);
        tracing::debug!(thread_id = %id, "thread deleted");
    }

    fn handle(&self, id: ThreadId) -> Result<Arc<Mutex<Thread>>, StoreError> {
        self.threads.get(&id).map(|e| e.clone()).ok_or(StoreError::UnknownThread(id))
    }

    /// Returns a consistent clone of the thread for readers.
    pub async fn snapshot(&self, id: ThreadId) -> Result<Thread, StoreError> {
        let handle = self.handle(id)?;
        Ok(handle.lock().await.clone())
    }

    pub async fn append_user_message(
        &self,
        id: ThreadId,
        text: impl Into<String>,
        images: Vec<crate::message::Image>,
    ) -> Result<MessageId, StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let mut msg = match Message::user(text) {
            Message::User(u) => u,
            _ => unreachable!(),
        };
        msg.images = images;
        let mid = msg.id;
        thread.messages.push(Message::User(msg));
        thread.updated_at = std::time::SystemTime::now();
        Ok(mid)
    }

    /// Begins a new in-progress assistant message, starting in `streaming`
    /// state.
    pub async fn begin_assistant_message(&self, id: ThreadId) -> Result<MessageId, StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = AssistantMessage::new_streaming();
        let mid = am.id;
        thread.messages.push(Message::Assistant(am));
        Ok(mid)
    }

    fn in_progress_assistant<'a>(thread: &'a mut Thread) -> Option<&'a mut AssistantMessage> {
        thread.messages.iter_mut().rev().find_map(|m| match m {
            Message::Assistant(a) if a.state == AssistantState::Streaming => Some(a),
            _ => None,
        })
    }

    /// Appends a text delta by concatenation: no delta is ever dropped, and
    /// no empty intermediate render is materialized.
    pub async fn append_text_delta(&self, id: ThreadId, delta: &str) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        am.text.push_str(delta);
        Ok(())
    }

    pub async fn append_reasoning_delta(&self, id: ThreadId, delta: &str) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        am.reasoning.get_or_insert_with(String::new).push_str(delta);
        Ok(())
    }

    pub async fn tool_call_start(
        &self,
        id: ThreadId,
        tool_call_id: ToolCallId,
        name: impl Into<String>,
    ) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        if !am.tool_calls.iter().any(|tc| tc.id == tool_call_id) {
            am.tool_calls.push(ToolCall::new_streaming(tool_call_id, name));
        }
        Ok(())
    }

    pub async fn tool_call_delta(
        &self,
        id: ThreadId,
        tool_call_id: &str,
        args_fragment: &str,
    ) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        let tc = am
            .tool_calls
            .iter_mut()
            .find(|tc| tc.id == tool_call_id)
            .ok_or_else(|| StoreError::UnknownToolCall(tool_call_id.to_string()))?;
        let streaming = tc.streaming.get_or_insert_with(Default::default);
        streaming.partial_args_fragment.push_str(args_fragment);
        streaming.last_update = Some(std::time::SystemTime::now());
        Ok(())
    }

    /// Finalizes one tool call's arguments by strictly parsing its
    /// accumulated fragment, falling back to partial-JSON recovery if the
    /// fragment never closed cleanly.
    pub async fn tool_call_end(&self, id: ThreadId, tool_call_id: &str) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        let tc = am
            .tool_calls
            .iter_mut()
            .find(|tc| tc.id == tool_call_id)
            .ok_or_else(|| StoreError::UnknownToolCall(tool_call_id.to_string()))?;
        if let Some(streaming) = &mut tc.streaming {
            streaming.is_streaming = false;
            if let Ok(serde_json::Value::Object(map)) =
                serde_json::from_str::<serde_json::Value>(&streaming.partial_args_fragment)
            {
                tc.arguments = map.into_iter().collect();
            } else {
                tc.arguments = crate::partial_json::parse_partial_json(&streaming.partial_args_fragment);
            }
        }
        Ok(())
    }

    /// Finalizes the in-progress assistant message, marking it complete.
    pub async fn finalize_assistant_message(&self, id: ThreadId) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        am.state = AssistantState::Complete;
        Ok(())
    }

    /// Aborts the in-progress assistant message, preserving whatever text
    /// and tool calls had already accumulated.
    pub async fn abort_assistant_message(&self, id: ThreadId) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        am.state = AssistantState::Aborted;
        Ok(())
    }

    pub async fn error_assistant_message(&self, id: ThreadId) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let am = Self::in_progress_assistant(&mut thread).ok_or(StoreError::NoInProgressAssistant(id))?;
        am.state = AssistantState::Error;
        Ok(())
    }

    /// Appends a Tool Message resolving `tool_call_id` and applies the
    /// corresponding monotone ToolCall status transition.
    pub async fn append_tool_result(
        &self,
        id: ThreadId,
        tool_call_id: ToolCallId,
        text: impl Into<String>,
        content: Vec<ContentPart>,
        status: ToolMessageStatus,
    ) -> Result<MessageId, StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;

        let tool_call_status = match status {
            ToolMessageStatus::Success => ToolCallStatus::Success,
            ToolMessageStatus::Error => ToolCallStatus::Error,
            ToolMessageStatus::Rejected => ToolCallStatus::Rejected,
        };
        let found = thread.messages.iter_mut().find_map(|m| match m {
            Message::Assistant(a) => a.tool_calls.iter_mut().find(|tc| tc.id == tool_call_id),
            _ => None,
        });
        let Some(tc) = found else {
            return Err(StoreError::UnknownToolCall(tool_call_id));
        };
        if !tc.set_status(tool_call_status) {
            return Err(StoreError::IllegalStatusTransition(tool_call_id));
        }

        let msg = ToolMessage {
            id: uuid::Uuid::new_v4(),
            created_at: std::time::SystemTime::now(),
            tool_call_id,
            text: text.into(),
            content,
            status,
        };
        let mid = msg.id;
        thread.messages.push(Message::Tool(msg));
        Ok(mid)
    }

    /// Updates a ToolCall's status without appending a Tool Message — used
    /// for intermediate transitions like `awaiting-approval` / `running`.
    pub async fn update_tool_call_status(
        &self,
        id: ThreadId,
        tool_call_id: &str,
        status: ToolCallStatus,
    ) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let found = thread.messages.iter_mut().find_map(|m| match m {
            Message::Assistant(a) => a.tool_calls.iter_mut().find(|tc| tc.id == tool_call_id),
            _ => None,
        });
        let Some(tc) = found else {
            return Err(StoreError::UnknownToolCall(tool_call_id.to_string()));
        };
        if !tc.set_status(status) {
            return Err(StoreError::IllegalStatusTransition(tool_call_id.to_string()));
        }
        Ok(())
    }

    pub async fn add_context_item(&self, id: ThreadId, item: ContextItem) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let key = item.canonical_key();
        if !thread.context_items.iter().any(|i| i.canonical_key() == key) {
            thread.context_items.push(item);
        }
        Ok(())
    }

    pub async fn remove_context_item(&self, id: ThreadId, item: &ContextItem) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        let key = item.canonical_key();
        thread.context_items.retain(|i| i.canonical_key() != key);
        Ok(())
    }

    pub async fn clear_context_items(&self, id: ThreadId) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        thread.context_items.clear();
        Ok(())
    }

    pub async fn set_summary(&self, id: ThreadId, summary: CompactedSummary) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        thread.summary = Some(summary);
        Ok(())
    }

    pub async fn clear_summary(&self, id: ThreadId) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        thread.summary = None;
        Ok(())
    }

    pub async fn append_checkpoint(
        &self,
        id: ThreadId,
        checkpoint: MessageCheckpoint,
    ) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;
        thread.checkpoints.push(checkpoint);
        Ok(())
    }

    pub async fn list_checkpoints_oldest_first(&self, id: ThreadId) -> Result<Vec<MessageCheckpoint>, StoreError> {
        Ok(self.snapshot(id).await?.checkpoints)
    }

    pub async fn list_checkpoints_newest_first(&self, id: ThreadId) -> Result<Vec<MessageCheckpoint>, StoreError> {
        let mut v = self.list_checkpoints_oldest_first(id).await?;
        v.reverse();
        Ok(v)
    }

    /// Truncates thread history back to the point a checkpoint was taken:
    /// drops every checkpoint created after `checkpoint_id` and every Message
    /// created after the Assistant Message that owns it. File restoration
    /// itself is the
    /// [`crate::checkpoint::CheckpointStore`]'s job; this only truncates the
    /// thread's own history, which only the store may mutate.
    pub async fn truncate_to_checkpoint(
        &self,
        id: ThreadId,
        checkpoint_id: uuid::Uuid,
    ) -> Result<(), StoreError> {
        let handle = self.handle(id)?;
        let mut thread = handle.lock().await;

        let Some(cp_index) = thread.checkpoints.iter().position(|c| c.id == checkpoint_id) else {
            return Err(StoreError::UnknownCheckpoint(checkpoint_id));
        };
        let owning_message_id = thread.checkpoints[cp_index].message_id;
        thread.checkpoints.truncate(cp_index + 1);

        if let Some(msg_index) = thread.messages.iter().position(|m| m.id() == owning_message_id) {
            thread.messages.truncate(msg_index + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_text_turn() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        store.append_user_message(id, "hi", vec![]).await.unwrap();
        store.begin_assistant_message(id).await.unwrap();
        store.append_text_delta(id, "hel").await.unwrap();
        store.append_text_delta(id, "lo").await.unwrap();
        store.finalize_assistant_message(id).await.unwrap();

        let thread = store.snapshot(id).await.unwrap();
        assert_eq!(thread.messages.len(), 2);
        match &thread.messages[1] {
            Message::Assistant(a) => {
                assert_eq!(a.text, "hello");
                assert_eq!(a.state, AssistantState::Complete);
                assert!(a.tool_calls.is_empty());
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[tokio::test]
    async fn tool_call_lifecycle_finalizes_arguments_from_fragments() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        store.append_user_message(id, "read foo.ts", vec![]).await.unwrap();
        store.begin_assistant_message(id).await.unwrap();
        store.tool_call_start(id, "t1".into(), "read_file").await.unwrap();
        store.tool_call_delta(id, "t1", r#"{"path":"f"#).await.unwrap();
        store.tool_call_delta(id, "t1", r#"oo.ts"}"#).await.unwrap();
        store.tool_call_end(id, "t1").await.unwrap();

        let thread = store.snapshot(id).await.unwrap();
        let tc = thread.find_tool_call("t1").unwrap();
        assert_eq!(tc.arguments.get("path").unwrap(), "foo.ts");

        store
            .append_tool_result(id, "t1".into(), "export const x = 1\n", vec![], ToolMessageStatus::Success)
            .await
            .unwrap();
        let thread = store.snapshot(id).await.unwrap();
        let tc = thread.find_tool_call("t1").unwrap();
        assert_eq!(tc.status, ToolCallStatus::Success);
    }

    #[tokio::test]
    async fn context_items_deduplicate_by_canonical_key() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        let item = ContextItem::File { uri: "a.rs".into() };
        store.add_context_item(id, item.clone()).await.unwrap();
        store.add_context_item(id, item.clone()).await.unwrap();
        store.remove_context_item(id, &item).await.unwrap();
        store.add_context_item(id, item.clone()).await.unwrap();
        let thread = store.snapshot(id).await.unwrap();
        assert_eq!(thread.context_items.len(), 1);
    }

    #[tokio::test]
    async fn abort_mid_stream_preserves_accumulated_text() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        store.append_user_message(id, "hi", vec![]).await.unwrap();
        store.begin_assistant_message(id).await.unwrap();
        store.append_text_delta(id, "partial").await.unwrap();
        store.abort_assistant_message(id).await.unwrap();

        let thread = store.snapshot(id).await.unwrap();
        match &thread.messages[1] {
            Message::Assistant(a) => {
                assert_eq!(a.text, "partial");
                assert_eq!(a.state, AssistantState::Aborted);
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[tokio::test]
    async fn truncate_to_checkpoint_drops_later_messages_and_checkpoints() {
        let store = ConversationStore::new();
        let id = store.create_thread();
        store.append_user_message(id, "hi", vec![]).await.unwrap();
        let am_id = store.begin_assistant_message(id).await.unwrap();
        store.finalize_assistant_message(id).await.unwrap();

        let cp = MessageCheckpoint {
            id: uuid::Uuid::new_v4(),
            message_id: am_id,
            created_at: std::time::SystemTime::now(),
            description: "before write".into(),
            files: Default::default(),
        };
        let cp_id = cp.id;
        store.append_checkpoint(id, cp).await.unwrap();

        store.append_user_message(id, "follow-up", vec![]).await.unwrap();
        store.begin_assistant_message(id).await.unwrap();
        store.finalize_assistant_message(id).await.unwrap();

        store.truncate_to_checkpoint(id, cp_id).await.unwrap();
        let thread = store.snapshot(id).await.unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.checkpoints.len(), 1);
    }
}
