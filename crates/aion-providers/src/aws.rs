//! Reference on-demand/spot adapter backed by the AWS EC2 API. Pricing for
//! GPU instance types isn't exposed by a live EC2 call, so `price` serves a
//! small static table refreshed by a background task (not wired here) and
//! stamps `stale = true` once that table is older than `price_budget`.

use crate::adapter::{CommandHandle, InstanceRequest, ProviderAdapter, ProviderError};
use aion_domain::instance::{Instance, InstanceState};
use aion_domain::price::{Availability, PriceKey, PricePoint};
use aion_domain::task::GpuClass;
use aion_domain::telemetry::TelemetrySample;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::Client as Ec2Client;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

struct PriceTableEntry {
    hourly_rate_usd: f64,
    fetched_at: std::time::Instant,
}

pub struct AwsAdapter {
    region: String,
    client: RwLock<Option<Ec2Client>>,
    price_table: RwLock<HashMap<(String, String), PriceTableEntry>>,
}

impl AwsAdapter {
    pub fn new(region: String) -> Self {
        Self {
            region,
            client: RwLock::new(None),
            price_table: RwLock::new(HashMap::new()),
        }
    }

    async fn client(&self) -> Ec2Client {
        {
            let guard = self.client.read().await;
            if let Some(client) = guard.as_ref() {
                return client.clone();
            }
        }
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .load()
            .await;
        let client = Ec2Client::new(&config);
        *self.client.write().await = Some(client.clone());
        client
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn name(&self) -> &str {
        "aws"
    }

    async fn price(
        &self,
        gpu_class: &GpuClass,
        region: &str,
        price_budget: Duration,
    ) -> Result<PricePoint, ProviderError> {
        let key = (gpu_class.to_string(), region.to_string());
        let table = self.price_table.read().await;
        let entry = table.get(&key);

        let (rate, stale) = match entry {
            Some(entry) if entry.fetched_at.elapsed() <= price_budget => {
                (entry.hourly_rate_usd, false)
            }
            Some(entry) => (entry.hourly_rate_usd, true),
            None => {
                return Err(ProviderError::Unavailable(format!(
                    "no price observation cached for {gpu_class} in {region}"
                )))
            }
        };

        Ok(PricePoint {
            key: PriceKey {
                provider: "aws".to_string(),
                region: region.to_string(),
                gpu_class: gpu_class.clone(),
                instance_type: ec2_instance_type(gpu_class).to_string(),
            },
            hourly_rate_usd: rate,
            availability: if stale {
                Availability::Low
            } else {
                Availability::High
            },
            observed_at: Utc::now(),
            stale,
        })
    }

    async fn provision(&self, request: InstanceRequest) -> Result<Instance, ProviderError> {
        let client = self.client().await;
        let instance_type = ec2_instance_type(&request.gpu_class);

        let response = client
            .run_instances()
            .instance_type(instance_type.into())
            .min_count(1)
            .max_count(1)
            .client_token(request.provisioning_token.to_string())
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let instance = response
            .instances()
            .first()
            .ok_or_else(|| ProviderError::UnknownState("run_instances returned no instance".into()))?;

        let provider_instance_id = instance
            .instance_id()
            .ok_or_else(|| ProviderError::UnknownState("instance missing id".into()))?
            .to_string();

        Ok(Instance {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            provider_instance_id,
            provider: "aws".to_string(),
            region: self.region.clone(),
            gpu_class: request.gpu_class,
            gpu_count: request.demand.gpu_count,
            hourly_rate_usd: request.demand.max_cost_usd,
            state: InstanceState::Provisioning,
            interruptible: request.demand.interruptible_ok,
            created_at: Utc::now(),
        })
    }

    async fn execute(
        &self,
        _instance: &Instance,
        _command: Vec<String>,
        _env: HashMap<String, String>,
    ) -> Result<CommandHandle, ProviderError> {
        Err(ProviderError::Permanent(
            "command execution over SSM is not wired for this adapter".to_string(),
        ))
    }

    async fn metrics(&self, instance: &Instance) -> Result<TelemetrySample, ProviderError> {
        let client = self.client().await;
        let response = client
            .describe_instance_status()
            .instance_ids(instance.provider_instance_id.clone())
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if response.instance_statuses().is_empty() {
            return Err(ProviderError::UnknownState(format!(
                "no status returned for {}",
                instance.provider_instance_id
            )));
        }

        // CloudWatch carries the actual GPU/VRAM/temperature series; this
        // adapter reports a conservative placeholder until that poller is
        // wired in, rather than fabricate a number from instance status.
        Ok(TelemetrySample {
            gpu_utilization_pct: 0.0,
            vram_usage_pct: 0.0,
            temp_celsius: 0.0,
            interconnect_gbps: 0.0,
            timestamp: Utc::now(),
        })
    }

    async fn terminate(&self, instance: &Instance) -> Result<(), ProviderError> {
        let client = self.client().await;
        match client
            .terminate_instances()
            .instance_ids(instance.provider_instance_id.clone())
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Idempotent: a not-found error on terminate is success.
            Err(e) if e.to_string().contains("InvalidInstanceID.NotFound") => Ok(()),
            Err(e) => Err(ProviderError::Transient(e.to_string())),
        }
    }
}

fn ec2_instance_type(gpu_class: &GpuClass) -> &'static str {
    match gpu_class {
        GpuClass::A100 => "p4d.24xlarge",
        GpuClass::H100 => "p5.48xlarge",
        GpuClass::A10 => "g5.xlarge",
        GpuClass::L40s => "g6.xlarge",
        GpuClass::T4 => "g4dn.xlarge",
        GpuClass::Other(_) => "g5.xlarge",
    }
}

pub fn boxed(region: String) -> Arc<dyn ProviderAdapter> {
    Arc::new(AwsAdapter::new(region))
}
