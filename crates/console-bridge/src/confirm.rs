//! Submit-then-confirm: run a transaction-submitting intent, then poll the
//! receipt with exponential backoff until it appears or attempts run out.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::exec::ContainerSelector;
use crate::intent::{Intent, IntentName};
use crate::reconcile::{json_kind, ConsoleValue, ReconcileError};
use crate::{metrics, ConsoleBridge};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptPolling {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 10,
        }
    }
}

impl ReceiptPolling {
    /// Wait before each poll: doubling from the initial delay, capped.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial_delay;
        (0..self.max_attempts).map(move |_| {
            let current = next.min(self.max_delay);
            next = next.saturating_mul(2);
            current
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub transaction_hash: String,
    /// `None` when every poll came back empty or failed.
    pub receipt: Option<Value>,
    pub attempts: u32,
    /// Last failed poll when no receipt was found. The transaction was
    /// still submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_error: Option<String>,
}

impl Confirmation {
    pub fn is_pending(&self) -> bool {
        self.receipt.is_none()
    }
}

impl ConsoleBridge {
    /// Runs a submitting intent, then polls `getTransactionReceipt` on the
    /// same container. Each poll is its own exec session. Once the submit
    /// succeeds, neither failed polls nor running out of attempts are
    /// errors: the hash comes back with no receipt.
    pub async fn submit_and_confirm(
        &self,
        intent: &Intent,
        container: &ContainerSelector,
    ) -> BridgeResult<Confirmation> {
        if !intent.is_submission() {
            let err = BridgeError::InvalidParams(format!(
                "intent {} does not submit a transaction",
                intent.name
            ));
            metrics::record_error(err.kind());
            return Err(err);
        }

        let submitted = self.run(intent, container).await?;
        let transaction_hash = match submitted {
            ConsoleValue::Text(hash) => hash,
            ConsoleValue::Structured(Value::String(hash)) => hash,
            ConsoleValue::Structured(other) => {
                let err = BridgeError::MalformedOutput(ReconcileError::NotATransactionHash {
                    found: json_kind(&other),
                });
                metrics::record_error(err.kind());
                return Err(err);
            }
        };
        info!(intent = %intent.name, tx = %transaction_hash, "transaction submitted");

        let lookup = Intent::new(
            IntentName::GetTransactionReceipt,
            vec![transaction_hash.clone()],
        );
        let mut attempts = 0;
        let mut poll_error = None;
        for delay in self.receipt_polling().delays() {
            tokio::time::sleep(delay).await;
            attempts += 1;
            match self.run(&lookup, container).await {
                Ok(receipt) if !receipt.is_null() => {
                    info!(tx = %transaction_hash, attempts, "transaction confirmed");
                    return Ok(Confirmation {
                        transaction_hash,
                        receipt: Some(receipt.into_json()),
                        attempts,
                        poll_error: None,
                    });
                }
                Ok(_) => {
                    debug!(tx = %transaction_hash, attempts, "receipt not yet available");
                }
                Err(err) => {
                    warn!(tx = %transaction_hash, attempts, error = %err, "receipt poll failed");
                    poll_error = Some(err.to_string());
                }
            }
        }

        info!(tx = %transaction_hash, attempts, "receipt still pending");
        Ok(Confirmation {
            transaction_hash,
            receipt: None,
            attempts,
            poll_error,
        })
    }
}
