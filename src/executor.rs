//! Turns a step and its resolved arguments into a confirmed transaction,
//! retrying transient failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{AbiStore, ChainClient, ChainError, Confirmation, TxHash, TxRequest};
use crate::error::{Failure, FailureKind};
use crate::job::{AttemptOutcome, ExecutionAttempt, GasPrice, JobStep, StepResult};
use crate::retry::{RetryPolicy, pause};

/// Estimated gas is padded by this ratio (numerator, denominator).
const GAS_LIMIT_PADDING: (u64, u64) = (12, 10);

/// Apply `multiplier` to a live gas price with per-mille precision.
pub fn scale_gas_price(price: u128, multiplier: f64) -> u128 {
    let per_mille = (multiplier * 1000.0).round();
    if per_mille <= 0.0 {
        return price;
    }
    price.saturating_mul(per_mille as u128) / 1000
}

fn pad_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(GAS_LIMIT_PADDING.0) / GAS_LIMIT_PADDING.1
}

/// Lowest price a node accepts for replacing a pending transaction: 10% over
/// the previous one, rounded up.
fn replacement_price(previous: u128) -> u128 {
    previous.saturating_add(previous.div_ceil(10))
}

type AttemptError = (Failure, Option<TxHash>);

/// Transactions broadcast by one `submit` call. They all carry the same
/// nonce, so at most one of them can be mined.
#[derive(Debug, Default)]
struct Pinned {
    nonce: Option<u64>,
    broadcast: Vec<TxHash>,
    last_gas_price: Option<u128>,
}

pub struct TransactionExecutor {
    client: Arc<dyn ChainClient>,
    abis: AbiStore,
    confirmation_timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(client: Arc<dyn ChainClient>, abis: AbiStore, confirmation_timeout: Duration) -> Self {
        Self {
            client,
            abis,
            confirmation_timeout,
        }
    }

    /// Submit `step` with `args` until it confirms, a permanent failure
    /// occurs, the policy runs out of attempts, or `cancel` fires during a
    /// retry pause.
    ///
    /// Every attempt reuses the nonce of the first broadcast, so a retry
    /// replaces a transaction that is still pending instead of queueing a
    /// second one. Before resubmitting, earlier broadcasts are checked for a
    /// late receipt.
    pub async fn submit(
        &self,
        step: &JobStep,
        args: &[Value],
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> StepResult {
        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut pinned = Pinned::default();

        loop {
            let index = attempts.len() as u32 + 1;
            let started_at = Utc::now();
            debug!(step = %step.name, attempt = index, max_attempts = policy.max_attempts(), "Submitting");

            match self.attempt(step, args, &mut pinned).await {
                Ok((tx_hash, block_number)) => {
                    info!(step = %step.name, attempt = index, tx_hash = %tx_hash, block_number, "Transaction confirmed");
                    attempts.push(ExecutionAttempt {
                        index,
                        started_at,
                        outcome: AttemptOutcome::Confirmed {
                            tx_hash,
                            block_number,
                        },
                    });
                    return StepResult::Succeeded { tx_hash, attempts };
                }
                Err((failure, tx_hash)) => {
                    attempts.push(ExecutionAttempt {
                        index,
                        started_at,
                        outcome: AttemptOutcome::Failed {
                            failure: failure.clone(),
                            tx_hash,
                        },
                    });

                    if !failure.is_transient() {
                        warn!(step = %step.name, attempt = index, error = %failure, "Permanent failure, not retrying");
                        return StepResult::Failed {
                            error: failure,
                            attempt_count: index,
                            attempts,
                        };
                    }
                    if !policy.should_retry(index) {
                        warn!(step = %step.name, attempts = index, error = %failure, "Retries exhausted");
                        return StepResult::Failed {
                            error: failure,
                            attempt_count: index,
                            attempts,
                        };
                    }

                    warn!(
                        step = %step.name,
                        attempt = index,
                        max_attempts = policy.max_attempts(),
                        delay_secs = policy.retry_delay.as_secs_f64(),
                        error = %failure,
                        "Transient failure, retrying"
                    );
                    if !pause(policy.retry_delay, cancel).await {
                        return StepResult::Failed {
                            error: Failure::new(
                                FailureKind::Cancelled,
                                format!("cancelled while waiting to retry after: {}", failure.message),
                            ),
                            attempt_count: index,
                            attempts,
                        };
                    }
                }
            }
        }
    }

    /// A mined earlier broadcast, if any. Lookup errors only mean "not known".
    async fn mined_earlier(&self, step: &JobStep, pinned: &Pinned) -> Option<(TxHash, u64, bool)> {
        for &tx_hash in pinned.broadcast.iter().rev() {
            match self.client.check_receipt(step.network, tx_hash).await {
                Ok(Some(Confirmation::Confirmed {
                    block_number,
                    success,
                })) => return Some((tx_hash, block_number, success)),
                Ok(_) => {}
                Err(e) => debug!(step = %step.name, tx_hash = %tx_hash, error = %e, "Receipt lookup failed"),
            }
        }
        None
    }

    fn settle_mined(tx_hash: TxHash, block_number: u64, success: bool) -> Result<(TxHash, u64), AttemptError> {
        if success {
            Ok((tx_hash, block_number))
        } else {
            Err((
                Failure::new(
                    FailureKind::Revert,
                    format!("transaction {tx_hash} reverted in block {block_number}"),
                ),
                Some(tx_hash),
            ))
        }
    }

    async fn attempt(
        &self,
        step: &JobStep,
        args: &[Value],
        pinned: &mut Pinned,
    ) -> Result<(TxHash, u64), AttemptError> {
        let network = step.network;

        if let Some((tx_hash, block_number, success)) = self.mined_earlier(step, pinned).await {
            info!(step = %step.name, tx_hash = %tx_hash, block_number, "Earlier broadcast was mined");
            return Self::settle_mined(tx_hash, block_number, success);
        }

        let abi = self.abis.load(&step.abi).map_err(|e| (Failure::from(e), None))?;
        let function = abi
            .function(&step.method, args.len())
            .map_err(|e| (Failure::from(e), None))?;
        let data = function
            .encode_input(args)
            .map_err(|e| (Failure::from(e), None))?;

        let mut gas_price = match step.gas.price {
            GasPrice::Fixed(price) => price,
            GasPrice::Network { multiplier } => {
                let live = self
                    .client
                    .current_gas_price(network)
                    .await
                    .map_err(|e| (Failure::from(e), None))?;
                scale_gas_price(live, multiplier)
            }
        };
        if let Some(previous) = pinned.last_gas_price {
            gas_price = gas_price.max(replacement_price(previous));
        }

        let nonce = match pinned.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = self
                    .client
                    .pending_nonce(network)
                    .await
                    .map_err(|e| (Failure::from(e), None))?;
                pinned.nonce = Some(nonce);
                nonce
            }
        };

        let mut tx = TxRequest {
            to: step.contract,
            data,
            value: step.value,
            gas_limit: None,
            gas_price: Some(gas_price),
            nonce: Some(nonce),
        };

        let gas_limit = match step.gas.limit {
            Some(limit) if !step.validate_before_send => limit,
            limit => {
                let estimate = self
                    .client
                    .estimate_gas(network, &tx)
                    .await
                    .map_err(|e| (Failure::from(e), None))?;
                debug!(step = %step.name, estimate, "Gas estimated");
                limit.unwrap_or_else(|| pad_gas_limit(estimate))
            }
        };
        tx.gas_limit = Some(gas_limit);

        let tx_hash = match self.client.submit_transaction(network, &tx).await {
            Ok(tx_hash) => tx_hash,
            Err(e @ ChainError::Nonce(_)) => {
                // The nonce is used: by one of ours, or by another sender.
                if let Some((tx_hash, block_number, success)) = self.mined_earlier(step, pinned).await {
                    info!(step = %step.name, tx_hash = %tx_hash, block_number, "Earlier broadcast was mined");
                    return Self::settle_mined(tx_hash, block_number, success);
                }
                if pinned.broadcast.is_empty() {
                    pinned.nonce = None;
                }
                return Err((Failure::from(e), None));
            }
            Err(e) => return Err((Failure::from(e), None)),
        };
        pinned.broadcast.push(tx_hash);
        pinned.last_gas_price = Some(gas_price);
        info!(
            step = %step.name,
            tx_hash = %tx_hash,
            nonce,
            gas_limit,
            gas_price = %gas_price,
            explorer = %format!("{}/tx/{tx_hash}", network.explorer_url()),
            "Transaction submitted"
        );

        match self
            .client
            .wait_for_confirmation(network, tx_hash, self.confirmation_timeout)
            .await
        {
            Ok(Confirmation::Confirmed {
                block_number,
                success,
            }) => Self::settle_mined(tx_hash, block_number, success),
            Ok(Confirmation::TimedOut) => Err((
                Failure::new(
                    FailureKind::Timeout,
                    format!(
                        "transaction {tx_hash} not confirmed within {}s",
                        self.confirmation_timeout.as_secs()
                    ),
                ),
                Some(tx_hash),
            )),
            Err(e) => Err((Failure::from(e), Some(tx_hash))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::GasPolicy;
    use crate::testing::{MockChain, Scripted, TEST_ABI, addr, static_step};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(chain: MockChain) -> (TransactionExecutor, Arc<MockChain>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.json"), TEST_ABI).unwrap();
        let chain = Arc::new(chain);
        let client: Arc<dyn ChainClient> = chain.clone();
        let executor = TransactionExecutor::new(client, AbiStore::new(dir.path()), Duration::from_secs(180));
        (executor, chain, dir)
    }

    fn policy(max_retries: u32, delay_secs: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_secs(delay_secs))
    }

    fn connection_error() -> Scripted {
        Scripted::SubmitError(ChainError::Connection("connection refused".into()))
    }

    #[tokio::test]
    async fn confirms_on_first_attempt() {
        let (executor, chain, _dir) = setup(MockChain::new());
        let step = static_step("ping", vec![]);

        let result = executor
            .submit(&step, &[], policy(3, 0), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count(), 1);
        let sent = chain.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, addr(0xc0));
        assert_eq!(sent[0].gas_limit, Some(120_000));
        assert_eq!(sent[0].gas_price, Some(1_000_000_000));
        assert_eq!(sent[0].data, vec![0xc0, 0x40, 0x62, 0x26]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_retries() {
        let chain = MockChain::with_script([connection_error(), connection_error(), connection_error()]);
        let (executor, chain, _dir) = setup(chain);
        let step = static_step("ping", vec![]);

        let started = tokio::time::Instant::now();
        let result = executor
            .submit(&step, &[], policy(2, 5), &CancellationToken::new())
            .await;

        match &result {
            StepResult::Failed {
                error,
                attempt_count,
                attempts,
            } => {
                assert_eq!(*attempt_count, 3);
                assert_eq!(attempts.len(), 3);
                assert_eq!(error.kind, FailureKind::Connection);
                assert_eq!(
                    attempts.iter().map(|a| a.index).collect::<Vec<_>>(),
                    vec![1, 2, 3]
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(chain.submitted().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let chain = MockChain::with_script([
            Scripted::SubmitError(ChainError::Nonce("nonce too low".into())),
            Scripted::Confirm,
        ]);
        let (executor, chain, _dir) = setup(chain);

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(3, 1), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count(), 2);
        assert!(result.attempts()[0].failure().is_some());
        // Nothing of ours was broadcast, so the nonce is read again.
        assert_eq!(chain.nonce_calls(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let chain = MockChain::with_script([Scripted::SubmitError(ChainError::InsufficientFunds(
            "insufficient funds for gas * price + value".into(),
        ))]);
        let (executor, chain, _dir) = setup(chain);

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(5, 30), &CancellationToken::new())
            .await;

        assert_eq!(result.attempt_count(), 1);
        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::InsufficientFunds));
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn failed_receipt_is_a_permanent_revert_with_hash() {
        let (executor, _chain, _dir) = setup(MockChain::with_script([Scripted::Revert]));

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(3, 0), &CancellationToken::new())
            .await;

        assert_eq!(result.attempt_count(), 1);
        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Revert));
        match &result.attempts()[0].outcome {
            AttemptOutcome::Failed { tx_hash, .. } => assert!(tx_hash.is_some()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_is_retried() {
        let (executor, chain, _dir) = setup(MockChain::with_script([Scripted::TimedOut, Scripted::Confirm]));

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(1, 10), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count(), 2);
        assert_eq!(
            result.attempts()[0].failure().map(|f| f.kind),
            Some(FailureKind::Timeout)
        );
        // The retry replaces the pending transaction: same nonce, bumped price.
        let sent = chain.submitted();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].nonce, Some(5));
        assert_eq!(sent[1].nonce, Some(5));
        assert_eq!(sent[0].gas_price, Some(1_000_000_000));
        assert_eq!(sent[1].gas_price, Some(1_100_000_000));
        assert_eq!(chain.nonce_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_receipt_of_an_earlier_broadcast_ends_the_step() {
        let (executor, chain, _dir) = setup(MockChain::with_script([Scripted::MinedLate]));

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(3, 10), &CancellationToken::new())
            .await;

        match &result {
            StepResult::Succeeded { tx_hash, attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(
                    attempts[1].outcome,
                    AttemptOutcome::Confirmed {
                        tx_hash: *tx_hash,
                        block_number: 101
                    }
                );
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn fixed_gas_price_skips_the_network_price() {
        let (executor, chain, _dir) = setup(MockChain::new());
        let mut step = static_step("ping", vec![]);
        step.gas = GasPolicy {
            limit: Some(50_000),
            price: GasPrice::Fixed(7_000_000_000),
        };

        executor
            .submit(&step, &[], policy(0, 0), &CancellationToken::new())
            .await;

        let sent = chain.submitted();
        assert_eq!(sent[0].gas_price, Some(7_000_000_000));
        assert_eq!(sent[0].gas_limit, Some(50_000));
        assert_eq!(chain.gas_price_calls(), 0);
        assert_eq!(chain.estimate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_does_not_compound_across_retries() {
        let chain = MockChain::with_script([
            Scripted::SubmitError(ChainError::Underpriced("replacement transaction underpriced".into())),
            Scripted::Confirm,
        ]);
        chain.set_gas_price(2_000);
        let (executor, chain, _dir) = setup(chain);
        let mut step = static_step("ping", vec![]);
        step.gas.price = GasPrice::Network { multiplier: 1.5 };

        let result = executor
            .submit(&step, &[], policy(2, 1), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        let prices: Vec<_> = chain.submitted().iter().map(|tx| tx.gas_price).collect();
        assert_eq!(prices, vec![Some(3_000), Some(3_000)]);
        assert_eq!(chain.gas_price_calls(), 2);
    }

    #[tokio::test]
    async fn validation_estimate_catches_reverts_before_sending() {
        let chain = MockChain::new();
        chain.push_estimate(Err(ChainError::Revert("execution reverted: paused".into())));
        let (executor, chain, _dir) = setup(chain);
        let mut step = static_step("ping", vec![]);
        step.gas.limit = Some(80_000);
        step.validate_before_send = true;

        let result = executor
            .submit(&step, &[], policy(3, 0), &CancellationToken::new())
            .await;

        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Revert));
        assert_eq!(result.attempt_count(), 1);
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn mistyped_static_args_are_invalid_arguments() {
        let (executor, chain, _dir) = setup(MockChain::new());
        let mut step = static_step("send", vec![]);
        step.method = "transfer".into();
        let args = [json!("not-an-address"), json!(1)];

        let result = executor
            .submit(&step, &args, policy(3, 0), &CancellationToken::new())
            .await;

        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::InvalidArguments));
        assert_eq!(result.attempt_count(), 1);
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_a_configuration_failure() {
        let (executor, _chain, _dir) = setup(MockChain::new());
        let mut step = static_step("nope", vec![]);
        step.method = "doesNotExist".into();

        let result = executor
            .submit(&step, &[], policy(3, 0), &CancellationToken::new())
            .await;

        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Configuration));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_retry_pause() {
        let (executor, chain, _dir) = setup(MockChain::with_script([connection_error(), connection_error()]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = executor
            .submit(&static_step("ping", vec![]), &[], policy(3, 60), &cancel)
            .await;

        assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Cancelled));
        assert_eq!(result.attempt_count(), 1);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[test]
    fn gas_helpers() {
        assert_eq!(scale_gas_price(1_000, 1.0), 1_000);
        assert_eq!(scale_gas_price(1_000, 1.25), 1_250);
        assert_eq!(scale_gas_price(3, 1.5), 4);
        assert_eq!(pad_gas_limit(100_000), 120_000);
        assert_eq!(pad_gas_limit(u64::MAX), u64::MAX / 10);
        assert_eq!(replacement_price(1_000), 1_100);
        assert_eq!(replacement_price(15), 17);
        assert_eq!(replacement_price(u128::MAX), u128::MAX);
    }
}
