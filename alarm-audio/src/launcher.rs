//! Continuation of a claimed batch in a fresh invocation.

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde::{Deserialize, Serialize};
use tracing::info;

use shared::queue::{BackgroundLauncher, ClaimedItem};
use shared::{Error, Result};

/// Event sent to this function to process an already claimed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub dispatch: bool,
    pub items: Vec<ClaimedItem>,
}

impl DispatchPayload {
    pub fn new(items: Vec<ClaimedItem>) -> Self {
        Self {
            dispatch: true,
            items,
        }
    }
}

/// Invokes this function again, asynchronously, with the batch.
pub struct SelfInvokeLauncher {
    lambda_client: aws_sdk_lambda::Client,
    function_name: String,
}

impl SelfInvokeLauncher {
    pub fn new(lambda_client: aws_sdk_lambda::Client, function_name: impl Into<String>) -> Self {
        Self {
            lambda_client,
            function_name: function_name.into(),
        }
    }
}

#[async_trait]
impl BackgroundLauncher for SelfInvokeLauncher {
    async fn launch(&self, items: Vec<ClaimedItem>) -> Result<()> {
        let count = items.len();
        let payload = serde_json::to_vec(&DispatchPayload::new(items))?;

        self.lambda_client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| Error::Aws(format!("Failed to invoke dispatch: {}", e)))?;

        info!(items = count, function = %self.function_name, "Dispatch invocation triggered");
        Ok(())
    }
}
