//! Shared test doubles for the agent modules.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::delivery::{Delivery, NoticeHandle};
use crate::llm::{ApiError, ChatModel, ChatResponse, Message};

/// One request seen by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub search: Option<Map<String, Value>>,
}

/// A model that answers with a queue of scripted responses.
///
/// Once the queue is empty it repeats the fallback response, or panics when
/// none was configured.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ChatResponse, ApiError>>>,
    fallback: Option<ChatResponse>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ChatResponse, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(ChatResponse::text(*t))).collect())
    }

    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = Some(ChatResponse::text(text));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn call(
        &self,
        messages: &[Message],
        search: Option<&Map<String, Value>>,
    ) -> Result<ChatResponse, ApiError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                search: search.cloned(),
            });
            calls.len()
        };

        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => panic!("ScriptedModel: no response scripted for call #{}", call_number),
        }
    }
}

/// Everything a [`RecordingDelivery`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    Notice(usize, String),
    Deleted(usize),
    Final(String),
}

#[derive(Default)]
pub struct RecordingDelivery {
    events: Mutex<Vec<DeliveryEvent>>,
    next_id: Mutex<usize>,
    fail_finals: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A delivery whose `send_final` always errors.
    pub fn failing_finals() -> Self {
        Self {
            fail_finals: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeliveryEvent::Notice(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn finals(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeliveryEvent::Final(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeliveryEvent::Deleted(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send_notice(&self, text: &str) -> anyhow::Result<NoticeHandle> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.events
            .lock()
            .unwrap()
            .push(DeliveryEvent::Notice(id, text.to_string()));
        Ok(NoticeHandle(id))
    }

    async fn delete_notice(&self, handle: NoticeHandle) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(DeliveryEvent::Deleted(handle.0));
        Ok(())
    }

    async fn send_final(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_finals {
            anyhow::bail!("final message rejected");
        }
        self.events
            .lock()
            .unwrap()
            .push(DeliveryEvent::Final(text.to_string()));
        Ok(())
    }
}
