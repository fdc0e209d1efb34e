//! Adapter for REST-API GPU marketplaces (RunPod/Vast.ai-shaped: a price
//! quote endpoint, a pod/instance create endpoint, a terminate endpoint).
//! One instantiation per provider; only the base URL and auth header
//! differ, so operators register as many of these as they have accounts.

use crate::adapter::{CommandHandle, InstanceRequest, ProviderAdapter, ProviderError};
use aion_domain::instance::{Instance, InstanceState};
use aion_domain::price::{Availability, PriceKey, PricePoint};
use aion_domain::task::GpuClass;
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub struct GenericRestAdapter {
    provider_name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GenericRestAdapter {
    pub fn new(provider_name: String, base_url: String, api_key: String) -> Self {
        Self {
            provider_name,
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct QuoteResponse {
    hourly_rate_usd: f64,
    available: bool,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    instance_id: String,
    hourly_rate_usd: f64,
}

#[derive(Deserialize)]
struct MetricsResponse {
    gpu_utilization_pct: f64,
    vram_usage_pct: f64,
    temp_celsius: f64,
    interconnect_gbps: f64,
}

fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited {
            message: body,
            retry_after: Duration::from_secs(5),
        }
    } else if status.is_client_error() {
        ProviderError::Permanent(body)
    } else {
        ProviderError::Transient(body)
    }
}

#[async_trait]
impl ProviderAdapter for GenericRestAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        let url = format!("{}/v1/quote", self.base_url);
        let result = tokio::time::timeout(
            price_budget,
            self.client
                .get(&url)
                .bearer_auth(&self.api_key)
                .query(&[("gpu_class", gpu_class.to_string()), ("region", region.to_string())])
                .send(),
        )
        .await;

        let stale = result.is_err();
        let quote = match result {
            Ok(Ok(response)) if response.status().is_success() => {
                response
                    .json::<QuoteResponse>()
                    .await
                    .map_err(|e| ProviderError::Transient(e.to_string()))?
            }
            Ok(Ok(response)) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, body));
            }
            Ok(Err(e)) => return Err(ProviderError::Transient(e.to_string())),
            Err(_) => {
                return Err(ProviderError::Unavailable(format!(
                    "{} did not answer a price quote within {price_budget:?}",
                    self.provider_name
                )))
            }
        };

        Ok(PricePoint {
            key: PriceKey {
                provider: self.provider_name.clone(),
                region: region.to_string(),
                gpu_class: gpu_class.clone(),
                instance_type: format!("{}-{}", self.provider_name, gpu_class),
            },
            hourly_rate_usd: quote.hourly_rate_usd,
            availability: if quote.available {
                Availability::High
            } else {
                Availability::None
            },
            observed_at: Utc::now(),
            stale,
        })
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        let url = format!("{}/v1/instances", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "gpu_class": request.gpu_class.to_string(),
                "region": request.region,
                "gpu_count": request.demand.gpu_count,
                "vram_gib": request.demand.vram_gib,
                "idempotency_key": request.provisioning_token,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: ProvisionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::UnknownState(e.to_string()))?;

        Ok(Instance {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            provider_instance_id: body.instance_id,
            provider: self.provider_name.clone(),
            region: request.region,
            gpu_class: request.gpu_class,
            gpu_count: request.demand.gpu_count,
            hourly_rate_usd: body.hourly_rate_usd,
            state: InstanceState::Provisioning,
            interruptible: request.demand.interruptible_ok,
            created_at: Utc::now(),
        })
    }

    async fn execute(
        &self,
        instance: &Instance,
        command: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        let url = format!(
            "{}/v1/instances/{}/exec",
            self.base_url, instance.provider_instance_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "command": command, "env": env }))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        // The provider's exec endpoint streams over its own websocket;
        // wiring that into stdout/exit_status channels is left to the
        // concrete deployment, not this reference adapter.
        let (_stdout_tx, stdout_rx) = tokio::sync::mpsc::channel(1);
        let (_exit_tx, exit_rx) = tokio::sync::oneshot::channel();
        let (cancel_tx, _cancel_rx) = tokio::sync::oneshot::channel();
        Ok(CommandHandle::new(stdout_rx, exit_rx, cancel_tx))
    }

    async fn metrics(&self, instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        let url = format!(
            "{}/v1/instances/{}/metrics",
            self.base_url, instance.provider_instance_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: MetricsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::UnknownState(e.to_string()))?;

        Ok(TelemetrySample {
            gpu_utilization_pct: body.gpu_utilization_pct,
            vram_usage_pct: body.vram_usage_pct,
            temp_celsius: body.temp_celsius,
            interconnect_gbps: body.interconnect_gbps,
            timestamp: Utc::now(),
        })
    }

    async fn terminate(&self, instance: &Instance) -> Result<(), ProviderError> {
        let url = format!(
            "{}/v1/instances/{}",
            self.base_url, instance.provider_instance_id
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        // 404 on delete means it's already gone: idempotent success.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, body))
        }
    }
}
