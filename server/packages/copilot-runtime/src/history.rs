//! Per-thread conversation history for gateways that replay context to the
//! model.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::request::{Message, Role, ThreadId};

/// Keeps every thread's messages in memory for the process lifetime.
/// Threads are never evicted; restarting the server forgets them all.
#[derive(Debug, Default)]
pub struct InMemoryThreadStore {
    threads: Mutex<HashMap<ThreadId, Arc<Mutex<Vec<Message>>>>>,
}

/// Exclusive access to one thread. Concurrent runs on the same thread wait
/// for the guard to drop.
#[derive(Debug)]
pub struct ThreadGuard {
    thread_id: ThreadId,
    messages: OwnedMutexGuard<Vec<Message>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, thread_id: &ThreadId) -> ThreadGuard {
        let slot = {
            let mut threads = self.threads.lock().await;
            threads
                .entry(thread_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
                .clone()
        };
        ThreadGuard {
            thread_id: thread_id.clone(),
            messages: slot.lock_owned().await,
        }
    }

    pub async fn snapshot(&self, thread_id: &ThreadId) -> Vec<Message> {
        let slot = self.threads.lock().await.get(thread_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.clone(),
            None => Vec::new(),
        }
    }
}

impl ThreadGuard {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Folds client-sent messages into the stored history. A message whose
    /// id is already known replaces the stored copy in place.
    pub fn merge(&mut self, incoming: &[Message]) {
        for message in incoming {
            match self
                .messages
                .iter_mut()
                .find(|existing| existing.id == message.id)
            {
                Some(existing) => *existing = message.clone(),
                None => self.messages.push(message.clone()),
            }
        }
    }

    /// Records the assistant reply under the id the client was given, so a
    /// later `merge` of the echoed message replaces it instead of adding a
    /// second copy.
    pub fn append_reply(&mut self, id: impl Into<String>, content: impl Into<String>) {
        let mut reply = Message::new(Role::Assistant, content);
        reply.id = id.into();
        self.merge(std::slice::from_ref(&reply));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(id: &str, role: Role, content: &str) -> Message {
        Message {
            id: id.to_string(),
            role,
            content: content.to_string(),
            parent_message_id: None,
        }
    }

    #[tokio::test]
    async fn merge_replaces_known_ids_and_appends_new() {
        let store = InMemoryThreadStore::new();
        let thread = ThreadId::from_request(Some("t-1"));
        {
            let mut guard = store.lock(&thread).await;
            guard.merge(&[message("a", Role::User, "hi")]);
            guard.append_reply("r-1", "hello");
        }
        {
            let mut guard = store.lock(&thread).await;
            guard.merge(&[
                message("a", Role::User, "hi again"),
                message("b", Role::User, "second"),
            ]);
        }

        let history = store.snapshot(&thread).await;
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi again", "hello", "second"]);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn same_thread_runs_are_serialized() {
        let store = Arc::new(InMemoryThreadStore::new());
        let thread = ThreadId::from_request(Some("t-2"));
        let guard = store.lock(&thread).await;

        let waiter = {
            let store = store.clone();
            let thread = thread.clone();
            tokio::spawn(async move {
                let mut guard = store.lock(&thread).await;
                guard.append_reply("r-2", "second run");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(store.snapshot(&thread).await.len(), 1);
    }

    #[tokio::test]
    async fn echoed_reply_is_not_stored_twice() {
        let store = InMemoryThreadStore::new();
        let thread = ThreadId::from_request(Some("t-echo"));
        {
            let mut guard = store.lock(&thread).await;
            guard.merge(&[message("u-1", Role::User, "hello")]);
            guard.append_reply("run--abc", "Hi there");
        }
        {
            let mut guard = store.lock(&thread).await;
            guard.merge(&[
                message("u-1", Role::User, "hello"),
                message("run--abc", Role::Assistant, "Hi there"),
                message("u-2", Role::User, "again"),
            ]);
        }

        let history = store.snapshot(&thread).await;
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u-1", "run--abc", "u-2"]);
    }

    #[tokio::test]
    async fn unknown_thread_snapshot_is_empty() {
        let store = InMemoryThreadStore::new();
        assert!(store
            .snapshot(&ThreadId::from_request(Some("missing")))
            .await
            .is_empty());
    }
}
