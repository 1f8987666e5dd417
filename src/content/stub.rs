//! Scripted content service for tests and local development
//!
//! Answers come from, in order: a per-task queue of canned values, a
//! per-task handler closure, then a per-task default. Anything else fails.

use super::{ContentRequest, ContentService, ContentTask};
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&ContentRequest) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct Script {
    queued: HashMap<ContentTask, VecDeque<std::result::Result<Value, String>>>,
    handlers: HashMap<ContentTask, Handler>,
    defaults: HashMap<ContentTask, Value>,
    calls: Vec<ContentRequest>,
}

/// Deterministic `ContentService` driven by canned structured values.
#[derive(Default)]
pub struct ScriptedContentService {
    script: Mutex<Script>,
}

impl ScriptedContentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one answer for `task`; queued answers are consumed in order.
    pub fn with_response(self, task: ContentTask, value: Value) -> Self {
        self.push(task, Ok(value));
        self
    }

    /// Queue one failure for `task`.
    pub fn with_failure(self, task: ContentTask, message: impl Into<String>) -> Self {
        self.push(task, Err(message.into()));
        self
    }

    /// Answer every `task` call that has nothing queued with `value`.
    pub fn with_default(self, task: ContentTask, value: Value) -> Self {
        self.lock().defaults.insert(task, value);
        self
    }

    /// Compute answers for `task` from the request itself.
    pub fn with_handler<F>(self, task: ContentTask, handler: F) -> Self
    where
        F: Fn(&ContentRequest) -> Result<Value> + Send + Sync + 'static,
    {
        self.lock().handlers.insert(task, Arc::new(handler));
        self
    }

    pub fn push(&self, task: ContentTask, answer: std::result::Result<Value, String>) {
        self.lock().queued.entry(task).or_default().push_back(answer);
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<ContentRequest> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, task: ContentTask) -> Vec<ContentRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.task == task)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A poisoned script only means an earlier test assertion panicked.
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ContentService for ScriptedContentService {
    async fn invoke(&self, request: &ContentRequest) -> Result<Value> {
        let handler = {
            let mut script = self.lock();
            script.calls.push(request.clone());

            if let Some(answer) = script
                .queued
                .get_mut(&request.task)
                .and_then(VecDeque::pop_front)
            {
                return answer.map_err(OrchestrationError::ContentService);
            }

            match script.handlers.get(&request.task) {
                Some(handler) => handler.clone(),
                None => {
                    return script.defaults.get(&request.task).cloned().ok_or_else(|| {
                        OrchestrationError::ContentService(format!(
                            "no scripted answer for task '{}'",
                            request.task
                        ))
                    })
                }
            }
        };

        handler(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SchemaDescriptor;
    use serde_json::json;

    fn request(task: ContentTask) -> ContentRequest {
        ContentRequest {
            task,
            instructions: String::new(),
            context: json!({"entity": "Acme"}),
            schema: SchemaDescriptor {
                name: "test",
                required_fields: &[],
            },
        }
    }

    #[tokio::test]
    async fn test_queue_then_handler_then_default() {
        let service = ScriptedContentService::new()
            .with_response(ContentTask::Route, json!(1))
            .with_handler(ContentTask::Route, |req| {
                Ok(json!(req.context_str("entity").unwrap_or_default()))
            })
            .with_default(ContentTask::Plan, json!("plan"));

        assert_eq!(service.invoke(&request(ContentTask::Route)).await.unwrap(), json!(1));
        assert_eq!(service.invoke(&request(ContentTask::Route)).await.unwrap(), json!("Acme"));
        assert_eq!(service.invoke(&request(ContentTask::Plan)).await.unwrap(), json!("plan"));
        assert!(service.invoke(&request(ContentTask::Reflect)).await.is_err());
        assert_eq!(service.calls().len(), 4);
        assert_eq!(service.calls_for(ContentTask::Route).len(), 2);
    }

    #[tokio::test]
    async fn test_queued_failure() {
        let service = ScriptedContentService::new().with_failure(ContentTask::Classify, "backend down");
        let err = service.invoke(&request(ContentTask::Classify)).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));
    }
}
