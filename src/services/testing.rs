// In-process fakes for the embedding and language-model providers.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Nl2SqlError, Result};
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::llm_service::LanguageModel;

/// Bag-of-words embedder over a fixed vocabulary. The last dimension is a
/// constant bias so no text embeds to the zero vector.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| text.matches(word.as_str()).count() as f32)
            .collect();
        vector.push(1.0);
        Ok(vector)
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Nl2SqlError::EmbeddingUnavailable("connection refused".to_string()))
    }
}

/// Returns queued responses in order, then repeats the last one. Records
/// every prompt it receives.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String>>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| Ok(r.to_string())).collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        let llm = Self::new(&[]);
        llm.responses
            .lock()
            .unwrap()
            .push_back(Err(Nl2SqlError::LlmService(message.to_string())));
        llm
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => {
                *self.last.lock().unwrap() = Some(text.clone());
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Nl2SqlError::LlmService("no scripted response".to_string())),
        }
    }
}
