//! Liveness/readiness registry for the five long-lived activities
//! (Orchestrator, Scheduler, Cost Optimizer, Healing Agent, Audit Agent).
//! `aion-server` polls this on a timer and logs/terminates on sustained
//! failure; nothing here is exposed over HTTP (out of scope).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub activity: String,
    pub state: HealthState,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait ActivityHealth: Send + Sync {
    async fn check(&self) -> HealthReport;
    fn activity_name(&self) -> &'static str;
}

pub struct HealthRegistry {
    checks: Arc<RwLock<HashMap<String, Arc<dyn ActivityHealth>>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, check: Arc<dyn ActivityHealth>) {
        let mut checks = self.checks.write().await;
        checks.insert(check.activity_name().to_string(), check);
    }

    pub async fn check_all(&self) -> Vec<HealthReport> {
        let checks = self.checks.read().await;
        let mut reports = Vec::with_capacity(checks.len());
        for check in checks.values() {
            reports.push(check.check().await);
        }
        reports
    }

    /// The service is ready only when every registered activity reports
    /// `Healthy`; a single `Degraded` activity does not fail readiness, a
    /// single `Unhealthy` one does.
    pub async fn is_ready(&self) -> bool {
        self.check_all()
            .await
            .iter()
            .all(|r| r.state != HealthState::Unhealthy)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
