use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::{GenerationClient, LlmError};

/// Scripted generation client.
///
/// Rules (`when`) answer any prompt whose user payload contains a needle and
/// are never consumed, so concurrent domain tasks can be scripted
/// independently. Queued answers are consumed in call order when no rule
/// matches.
#[derive(Default)]
pub struct MockGenerator {
    rules: Vec<(String, Result<String, String>)>,
    queue: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `response` whenever the user payload contains `needle`.
    pub fn when(mut self, needle: &str, response: &str) -> Self {
        self.rules
            .push((needle.to_string(), Ok(response.to_string())));
        self
    }

    /// Fail whenever the user payload contains `needle`.
    pub fn fail_when(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), Err(message.to_string())));
        self
    }

    /// Queue one answer.
    pub fn respond(self, response: &str) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(response.to_string()));
        self
    }

    /// Queue one failure.
    pub fn fail(self, message: &str) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(message.to_string()));
        self
    }

    /// User payloads received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationClient for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user.to_string());

        let scripted = self
            .rules
            .iter()
            .find(|(needle, _)| user.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .or_else(|| {
                self.queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front()
            });

        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Scripted(message)),
            None => Err(LlmError::Scripted("no scripted response left".to_string())),
        }
    }
}
