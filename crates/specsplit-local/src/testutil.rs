//! Test doubles for `GenerativeModel`.

use specsplit_core::{Error, GenerativeModel, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

type Respond = Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>;

/// A model whose answer is computed from `(prompt, call_index)`.
pub struct FnModel {
    respond: Respond,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl FnModel {
    pub fn new(f: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(f),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replays `script` in order; once exhausted every call fails.
    pub fn scripted(script: Vec<Result<String>>) -> Self {
        let queue = Mutex::new(VecDeque::from(script));
        Self::new(move |_, _| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Llm("script exhausted".to_string())))
        })
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl GenerativeModel for FnModel {
    fn name(&self) -> &str {
        "fn-model"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let idx = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), prompt.to_string()));
            calls.len() - 1
        };
        (self.respond)(prompt, idx)
    }
}

pub fn rate_limited() -> Error {
    Error::Llm("gemini HTTP 429 Too Many Requests: Resource exhausted".to_string())
}
