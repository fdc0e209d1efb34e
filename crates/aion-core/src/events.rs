//! Process-wide event bus. Activities publish lifecycle events here for
//! anything that wants to observe the system without being on the hot
//! path of the Orchestrator/Scheduler/Cost Optimizer/Healing Agent message
//! passing itself (dashboards, the `aion-server` shutdown sequence, tests).
//!
//! This is deliberately not the audit channel: audit records are the
//! tamper-evident decision trail (`aion-audit`); `OrMindEvent`s are a
//! best-effort fan-out for observability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &OrMindEvent);
    fn event_types(&self) -> Vec<&'static str>;
    fn handler_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrMindEvent {
    GoalAccepted { goal_id: Uuid, timestamp: DateTime<Utc> },
    GoalTerminal { goal_id: Uuid, status: String, timestamp: DateTime<Utc> },
    TaskReady { goal_id: Uuid, task: u32, timestamp: DateTime<Utc> },
    TaskDispatched { goal_id: Uuid, task: u32, provider: String, timestamp: DateTime<Utc> },
    JobStarted { job_id: Uuid, instance_id: Uuid, timestamp: DateTime<Utc> },
    JobEnded { job_id: Uuid, succeeded: bool, timestamp: DateTime<Utc> },
    MigrationStarted { old_instance: Uuid, target_provider: String, timestamp: DateTime<Utc> },
    MigrationCompleted { old_instance: Uuid, new_instance: Uuid, timestamp: DateTime<Utc> },
    MigrationFailed { old_instance: Uuid, reason: String, timestamp: DateTime<Utc> },
    PriceObserved { provider: String, region: String, timestamp: DateTime<Utc> },
    HealingActionTaken { instance_id: Uuid, action: String, timestamp: DateTime<Utc> },
    TelemetryDrop { instance_id: Uuid, dropped: usize, timestamp: DateTime<Utc> },
    AuditBatchSealed { batch_index: u64, records: usize, timestamp: DateTime<Utc> },
}

pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
    sender: broadcast::Sender<OrMindEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(1024);
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            sender,
        }
    }

    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        for event_type in handler.event_types() {
            handlers
                .entry(event_type.to_string())
                .or_insert_with(Vec::new)
                .push(handler.clone());
        }
        tracing::info!(handler = handler.handler_name(), "registered event handler");
    }

    pub async fn publish(&self, event: OrMindEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!("no subscribers on event bus broadcast channel");
        }

        let handlers = self.handlers.read().await;
        if let Some(event_handlers) = handlers.get(event_type_name(&event)) {
            for handler in event_handlers {
                handler.handle_event(&event).await;
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrMindEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn event_type_name(event: &OrMindEvent) -> &'static str {
    match event {
        OrMindEvent::GoalAccepted { .. } => "GoalAccepted",
        OrMindEvent::GoalTerminal { .. } => "GoalTerminal",
        OrMindEvent::TaskReady { .. } => "TaskReady",
        OrMindEvent::TaskDispatched { .. } => "TaskDispatched",
        OrMindEvent::JobStarted { .. } => "JobStarted",
        OrMindEvent::JobEnded { .. } => "JobEnded",
        OrMindEvent::MigrationStarted { .. } => "MigrationStarted",
        OrMindEvent::MigrationCompleted { .. } => "MigrationCompleted",
        OrMindEvent::MigrationFailed { .. } => "MigrationFailed",
        OrMindEvent::PriceObserved { .. } => "PriceObserved",
        OrMindEvent::HealingActionTaken { .. } => "HealingActionTaken",
        OrMindEvent::TelemetryDrop { .. } => "TelemetryDrop",
        OrMindEvent::AuditBatchSealed { .. } => "AuditBatchSealed",
    }
}
