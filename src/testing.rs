//! Scripted in-memory gateway shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::Notify;

use crate::gateway::{CallError, Endpoint, Payload, RemoteCall, ResponseBody, TimeoutClass};

#[derive(Debug, Clone)]
pub enum Scripted {
    Ok(ResponseBody),
    Err(CallError),
}

impl Scripted {
    pub fn json(value: serde_json::Value) -> Self {
        Scripted::Ok(ResponseBody::json_value(&value))
    }

    pub fn status(code: u16) -> Self {
        Scripted::Err(CallError::Transport {
            status: Some(code),
            message: format!("Request failed with status code {code}"),
        })
    }

    pub fn detail(code: u16, detail: &str) -> Self {
        Scripted::Err(CallError::RemoteDetail {
            status: code,
            detail: detail.to_string(),
        })
    }

    pub fn unreachable() -> Self {
        Scripted::Err(CallError::Transport {
            status: None,
            message: "connect ECONNREFUSED".into(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub payload: Payload,
    pub timeout: TimeoutClass,
}

/// Answers calls by endpoint path. One-shot responses queued with
/// [`push`](ScriptedGateway::push) win over the standing response set with
/// [`respond`](ScriptedGateway::respond); anything unscripted gets
/// `200 {"status":"ok"}`.
#[derive(Default)]
pub struct ScriptedGateway {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    standing: Mutex<HashMap<String, Scripted>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, response: Scripted) -> &Self {
        self.standing.lock().unwrap().insert(key(path), response);
        self
    }

    pub fn push(&self, path: &str, response: Scripted) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(key(path))
            .or_default()
            .push_back(response);
        self
    }

    /// Calls to `path` block until the returned handle is notified.
    pub fn hold(&self, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(key(path), Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| key(&c.endpoint.path))
            .collect()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        let wanted = key(path);
        self.calls()
            .into_iter()
            .filter(|c| key(&c.endpoint.path) == wanted)
            .collect()
    }

    fn next_response(&self, path: &str) -> Scripted {
        if let Some(queue) = self.queued.lock().unwrap().get_mut(path)
            && let Some(next) = queue.pop_front()
        {
            return next;
        }
        self.standing
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Scripted::json(json!({"status": "ok"})))
    }
}

impl RemoteCall for ScriptedGateway {
    async fn call(
        &self,
        endpoint: &Endpoint,
        payload: &Payload,
        timeout: TimeoutClass,
    ) -> Result<ResponseBody, CallError> {
        let path = key(&endpoint.path);
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.clone(),
            payload: payload.clone(),
            timeout,
        });

        let hold = self.holds.lock().unwrap().get(&path).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }

        match self.next_response(&path) {
            Scripted::Ok(body) => Ok(body),
            Scripted::Err(err) => Err(err),
        }
    }
}
