//! LLM-backed Reasoning Engine. Structurally mirrors the rest of the
//! core's provider-style clients: a thin HTTP client hitting an
//! OpenAI-compatible chat completion endpoint, with the response parsed
//! into the engine's typed output rather than handed back as free text.

use crate::{
    Diagnosis, FailureContext, InstanceContext, PlanConstraints, PlannedTask, ReasoningEngine,
    ReasoningError, RepairDecision, RepairResult, TaskPlan,
};
use aion_domain::task::{Task, TaskHandle};
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct LlmReasoningEngine {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmReasoningEngine {
    pub fn new(base_url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            base_url,
            api_key,
            model,
        })
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: String,
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt,
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
            // Deterministic as the spec requires under a fixed seed; a
            // true seed parameter isn't part of the OpenAI-compatible
            // chat API this client targets, so temperature 0 is the
            // closest approximation available at this layer.
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ReasoningError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Unavailable(format!("{status}: {body}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::MalformedPlan(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ReasoningError::MalformedPlan("empty choices array".to_string()))
    }
}

#[derive(Deserialize)]
struct PlanPayload {
    tasks: Vec<PlannedTask>,
}

#[async_trait]
impl ReasoningEngine for LlmReasoningEngine {
    async fn plan(
        &self,
        goal_text: &str,
        constraints: &PlanConstraints,
    ) -> Result<TaskPlan, ReasoningError> {
        let system_prompt = "You are a GPU job planner. Respond with a JSON object \
            {\"tasks\": [...]} describing a task DAG. Each task has predecessors \
            (indices into this same array), image_reference, command, env, \
            gpu_class, gpu_count, vram_gib, max_duration_secs, max_cost_usd, \
            interruptible_ok, confidence (0-1), and risk_tier (low|normal|elevated|blocked).";
        let user_prompt = format!(
            "Goal: {goal_text}\nBudget ceiling USD: {:?}\nDeadline seconds: {:?}\nAllowed regions: {:?}",
            constraints.budget_ceiling_usd, constraints.deadline_secs, constraints.allowed_regions
        );

        let content = self.chat(system_prompt, &user_prompt).await?;
        let raw_output: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| ReasoningError::MalformedPlan(e.to_string()))?;
        let payload: PlanPayload = serde_json::from_value(raw_output.clone())
            .map_err(|e| ReasoningError::MalformedPlan(e.to_string()))?;

        if payload.tasks.is_empty() {
            return Err(ReasoningError::MalformedPlan(
                "plan contained zero tasks".to_string(),
            ));
        }

        Ok(TaskPlan {
            tasks: payload.tasks,
            raw_output,
        })
    }

    async fn diagnose(
        &self,
        instance_context: &InstanceContext,
        metrics_window: &[TelemetrySample],
    ) -> Result<Diagnosis, ReasoningError> {
        let system_prompt = "You are a GPU instance health analyst. Respond with JSON \
            {\"confidence\": <0-1 float>, \"reasoning\": \"...\"} assessing the \
            candidate action given the metrics window and instance context.";
        let user_prompt = format!(
            "Candidate action: {:?}\nGPU class: {}\nOOM signal: {}\nRestart count (10 min): {}\nSample count: {}",
            instance_context.candidate_action,
            instance_context.gpu_class,
            instance_context.oom_signal,
            instance_context.restart_count_last_10min,
            metrics_window.len()
        );

        let content = self.chat(system_prompt, &user_prompt).await?;

        #[derive(Deserialize)]
        struct DiagnosisPayload {
            confidence: f64,
            reasoning: String,
        }
        let payload: DiagnosisPayload = serde_json::from_str(&content)
            .map_err(|e| ReasoningError::MalformedPlan(e.to_string()))?;

        Ok(Diagnosis {
            action: instance_context.candidate_action,
            confidence: payload.confidence,
            reasoning: payload.reasoning,
        })
    }

    async fn repair(
        &self,
        task: &Task,
        _task_handle: TaskHandle,
        failure: &FailureContext,
    ) -> Result<RepairResult, ReasoningError> {
        let system_prompt = "You are a GPU job failure triager. Respond with JSON \
            {\"decision\": \"retry\"|\"modify\"|\"abandon\", \"modified_vram_gib\": \
            <int or null>, \"rationale\": \"...\"}.";
        let user_prompt = format!(
            "Error kind: {}\nRetry count: {}\nLast error: {}\nCurrent VRAM GiB: {}\nRisk tier: {:?}",
            failure.provider_error_kind,
            failure.retry_count,
            failure.last_error_message,
            task.demand.vram_gib,
            task.risk_tier
        );

        let content = self.chat(system_prompt, &user_prompt).await?;

        #[derive(Deserialize)]
        struct RepairPayload {
            decision: String,
            modified_vram_gib: Option<u32>,
            rationale: String,
        }
        let payload: RepairPayload = serde_json::from_str(&content)
            .map_err(|e| ReasoningError::MalformedPlan(e.to_string()))?;

        let decision = match payload.decision.as_str() {
            "retry" => RepairDecision::Retry,
            "modify" => RepairDecision::Modify,
            "abandon" => RepairDecision::Abandon,
            other => {
                return Err(ReasoningError::MalformedPlan(format!(
                    "unknown repair decision '{other}'"
                )))
            }
        };

        Ok(RepairResult {
            decision,
            modified_vram_gib: payload.modified_vram_gib,
            rationale: payload.rationale,
        })
    }
}
