use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::device::{DeviceState, Transition};
use crate::error::ControlResult;
use crate::id::TaskId;

/// A command addressed to a set of tasks selected by a path prefix.
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    ChangeState {
        transition: Transition,
    },
    SetProperties {
        request_id: u64,
        props: Vec<(String, String)>,
    },
    GetProperties {
        request_id: u64,
        query: String,
    },
    SubscribeStateChanges,
    UnsubscribeStateChanges,
}

/// A reply or notification from one task.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    StateChange {
        task_id: TaskId,
        current: DeviceState,
        last: DeviceState,
    },
    PropertiesSet {
        task_id: TaskId,
        request_id: u64,
        ok: bool,
    },
    Properties {
        task_id: TaskId,
        request_id: u64,
        ok: bool,
        props: HashMap<String, String>,
    },
    Subscription {
        task_id: TaskId,
        ok: bool,
    },
}

/// Delivery of typed commands to tasks and of their typed replies back.
///
/// The event stream is taken once per session by the topology coordinator;
/// events for a given task are delivered in the order the task sent them.
#[tonic::async_trait]
pub trait CommandTransport: Send + Sync + 'static {
    async fn broadcast(&self, path_filter: &str, command: DeviceCommand) -> ControlResult<()>;

    /// Take the event stream of the session.
    /// Fails when called more than once.
    async fn subscribe(&self) -> ControlResult<mpsc::UnboundedReceiver<DeviceEvent>>;
}
