//! In-process transport for unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::{
    listeners::lock, NotebookError, RequestDescriptor, Result, Transport, TransportResponse,
};

/// Scripted reply for one call.
#[derive(Clone, Debug)]
pub(crate) enum Step {
    Ok(Value),
    Status(u16),
    Unreachable,
    /// Never resolves.
    Hang,
    /// Succeeds with `null` once the gate is notified.
    Gate(Arc<Notify>),
}

/// Replays scripted steps in order and records every request it sees.
///
/// Once the script is exhausted every call succeeds with `null`.
#[derive(Clone, Debug, Default)]
pub(crate) struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<RequestDescriptor>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<RequestDescriptor> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        lock(&self.calls).push(request.clone());
        let step = lock(&self.steps).pop_front();
        match step {
            None => Ok(TransportResponse {
                status: 200,
                body: Value::Null,
            }),
            Some(Step::Ok(body)) => Ok(TransportResponse { status: 200, body }),
            Some(Step::Status(status)) => Err(NotebookError::Http {
                status,
                body: format!("scripted status {status}"),
            }),
            Some(Step::Unreachable) => {
                Err(NotebookError::Unreachable("scripted outage".to_owned()))
            }
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Gate(gate)) => {
                gate.notified().await;
                Ok(TransportResponse {
                    status: 200,
                    body: Value::Null,
                })
            }
        }
    }
}
