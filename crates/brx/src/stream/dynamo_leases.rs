// ai
//! 🎟️☁️ The lease table, in DynamoDB.
//!
//! One item per shard, keyed by `leaseKey` (the shard id):
//!
//! | attribute        | type | meaning                                          |
//! |------------------|------|--------------------------------------------------|
//! | `leaseKey`       | S    | shard id                                         |
//! | `leaseOwner`     | S    | worker id holding the lease (absent = free)      |
//! | `leaseExpiresAt` | N    | epoch millis after which anyone may take it over |
//! | `checkpoint`     | S    | last committed sequence number, or `SHARD_END`   |
//!
//! Every write is conditional on ownership, so two workers can race all they like and
//! at most one wins. The table itself is provisioned elsewhere; we only read and write items.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::debug;

use crate::errors::CheckpointError;
use crate::stream::{Lease, LeaseStore, SHARD_END_CHECKPOINT};

const LEASE_KEY: &str = "leaseKey";
const LEASE_OWNER: &str = "leaseOwner";
const LEASE_EXPIRES_AT: &str = "leaseExpiresAt";
const CHECKPOINT: &str = "checkpoint";

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

fn expiry_after(lease_duration: Duration) -> String {
    (now_millis() + lease_duration.as_millis()).to_string()
}

/// 🏷️ Sort an `UpdateItem` failure into the three buckets the consumer cares about.
fn classify<R>(err: SdkError<UpdateItemError, R>, shard_id: &str) -> CheckpointError
where
    R: std::fmt::Debug,
{
    let the_message = format!("{}", aws_sdk_dynamodb::error::DisplayErrorContext(&err));
    match err.as_service_error() {
        Some(service_err) if service_err.is_conditional_check_failed_exception() => {
            CheckpointError::LeaseLost(shard_id.to_string())
        }
        Some(service_err)
            if service_err.is_provisioned_throughput_exceeded_exception()
                || service_err.is_request_limit_exceeded()
                || service_err.code() == Some("ThrottlingException") =>
        {
            CheckpointError::Throttled(the_message)
        }
        _ => CheckpointError::InvalidState(the_message),
    }
}

/// 🎟️ [`LeaseStore`] over one DynamoDB table.
#[derive(Debug, Clone)]
pub struct DynamoLeaseStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoLeaseStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn key(shard_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(LEASE_KEY.to_string(), AttributeValue::S(shard_id.to_string()))])
    }
}

#[async_trait]
impl LeaseStore for DynamoLeaseStore {
    async fn try_acquire(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<Option<Lease>> {
        let the_current = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(shard_id)))
            .consistent_read(true)
            .send()
            .await
            .context(format!(
                "💀 GetItem on lease table '{}' failed for {shard_id}.",
                self.table
            ))?;
        let the_checkpoint = the_current
            .item()
            .and_then(|item| item.get(CHECKPOINT))
            .and_then(|value| value.as_s().ok())
            .cloned();
        if the_checkpoint.as_deref() == Some(SHARD_END_CHECKPOINT) {
            return Ok(None);
        }

        let the_now = now_millis().to_string();
        let the_result = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(shard_id)))
            .update_expression("SET #owner = :owner, #expires = :expires")
            .condition_expression(
                "attribute_not_exists(#owner) OR #owner = :owner OR #expires < :now",
            )
            .expression_attribute_names("#owner", LEASE_OWNER)
            .expression_attribute_names("#expires", LEASE_EXPIRES_AT)
            .expression_attribute_values(":owner", AttributeValue::S(owner.to_string()))
            .expression_attribute_values(":expires", AttributeValue::N(expiry_after(lease_duration)))
            .expression_attribute_values(":now", AttributeValue::N(the_now))
            .send()
            .await;

        match the_result {
            Ok(_) => {
                debug!("🎟️ {owner} took the lease on {shard_id} (checkpoint {:?})", the_checkpoint);
                Ok(Some(Lease {
                    shard_id: shard_id.to_string(),
                    checkpoint: the_checkpoint,
                }))
            }
            Err(err) => match classify(err, shard_id) {
                // -- 🙅 someone else holds it. not an error, just not our shard today.
                CheckpointError::LeaseLost(_) => Ok(None),
                other => Err(anyhow::Error::new(other)).context(format!(
                    "💀 Could not take the lease on {shard_id} in '{}'.",
                    self.table
                )),
            },
        }
    }

    async fn renew(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<(), CheckpointError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(shard_id)))
            .update_expression("SET #expires = :expires")
            .condition_expression("#owner = :owner")
            .expression_attribute_names("#owner", LEASE_OWNER)
            .expression_attribute_names("#expires", LEASE_EXPIRES_AT)
            .expression_attribute_values(":owner", AttributeValue::S(owner.to_string()))
            .expression_attribute_values(":expires", AttributeValue::N(expiry_after(lease_duration)))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| classify(err, shard_id))
    }

    async fn checkpoint(
        &self,
        shard_id: &str,
        owner: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(shard_id)))
            .update_expression("SET #checkpoint = :checkpoint")
            .condition_expression("#owner = :owner")
            .expression_attribute_names("#owner", LEASE_OWNER)
            .expression_attribute_names("#checkpoint", CHECKPOINT)
            .expression_attribute_values(":owner", AttributeValue::S(owner.to_string()))
            .expression_attribute_values(":checkpoint", AttributeValue::S(sequence_number.to_string()))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| classify(err, shard_id))
    }

    async fn release(&self, shard_id: &str, owner: &str) -> Result<()> {
        let the_result = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(shard_id)))
            .update_expression("REMOVE #owner")
            .condition_expression("#owner = :owner")
            .expression_attribute_names("#owner", LEASE_OWNER)
            .expression_attribute_values(":owner", AttributeValue::S(owner.to_string()))
            .send()
            .await;
        match the_result {
            Ok(_) => Ok(()),
            Err(err) => match classify(err, shard_id) {
                // -- 👋 already gone. that's the outcome we wanted anyway.
                CheckpointError::LeaseLost(_) => Ok(()),
                other => Err(anyhow::Error::new(other))
                    .context(format!("💀 Could not release the lease on {shard_id}.")),
            },
        }
    }
}
