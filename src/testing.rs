//! Scripted chain client and job fixtures shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::chain::{
    Address, ChainClient, ChainError, Confirmation, Function, Network, Token, TxHash, TxRequest,
};
use crate::job::{ArgSource, GasPolicy, Job, JobKind, JobStep, MultiJob};
use crate::scheduler::Schedule;

/// ABI with `run()`, `transfer(address,uint256)` and `set(uint256)`.
pub const TEST_ABI: &str = r#"[
    {"type":"function","name":"run","inputs":[],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"set","inputs":[{"name":"value","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
]"#;

pub fn addr(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    Address(bytes)
}

/// What one submission does, in call order.
#[derive(Debug, Clone)]
pub enum Scripted {
    Confirm,
    /// Mined with status 0.
    Revert,
    /// `submit_transaction` fails.
    SubmitError(ChainError),
    /// Submitted, then the receipt wait fails.
    ConfirmError(ChainError),
    TimedOut,
    /// The wait times out, but a later receipt lookup finds it mined.
    MinedLate,
}

#[derive(Debug, Clone)]
pub struct ReadCall {
    pub network: Network,
    pub address: Address,
    pub function: String,
    pub args: Vec<Token>,
}

/// In-memory [`ChainClient`]. Submissions follow the script and confirm once
/// it runs out.
pub struct MockChain {
    sender: Address,
    gas_price: Mutex<u128>,
    estimates: Mutex<VecDeque<Result<u64, ChainError>>>,
    script: Mutex<VecDeque<Scripted>>,
    pending: Mutex<HashMap<TxHash, Scripted>>,
    mined_late: Mutex<HashSet<TxHash>>,
    nonce: Mutex<u64>,
    nonce_calls: Mutex<u32>,
    read_results: Mutex<HashMap<String, Result<Vec<Token>, ChainError>>>,
    reads: Mutex<Vec<ReadCall>>,
    submitted: Mutex<Vec<TxRequest>>,
    gas_price_calls: Mutex<u32>,
    estimate_calls: Mutex<u32>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            sender: addr(0xee),
            gas_price: Mutex::new(1_000_000_000),
            estimates: Mutex::new(VecDeque::new()),
            script: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            mined_late: Mutex::new(HashSet::new()),
            nonce: Mutex::new(5),
            nonce_calls: Mutex::new(0),
            read_results: Mutex::new(HashMap::new()),
            reads: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            gas_price_calls: Mutex::new(0),
            estimate_calls: Mutex::new(0),
        }
    }

    pub fn with_script(script: impl IntoIterator<Item = Scripted>) -> Self {
        let chain = Self::new();
        chain.script.lock().unwrap().extend(script);
        chain
    }

    pub fn push(&self, outcome: Scripted) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.lock().unwrap() = price;
    }

    /// Queue an `estimate_gas` answer; 100 000 once the queue is empty.
    pub fn push_estimate(&self, estimate: Result<u64, ChainError>) {
        self.estimates.lock().unwrap().push_back(estimate);
    }

    /// Answer for every read of the function named `function`.
    pub fn set_read(&self, function: &str, result: Result<Vec<Token>, ChainError>) {
        self.read_results
            .lock()
            .unwrap()
            .insert(function.to_string(), result);
    }

    pub fn submitted(&self) -> Vec<TxRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<ReadCall> {
        self.reads.lock().unwrap().clone()
    }

    pub fn gas_price_calls(&self) -> u32 {
        *self.gas_price_calls.lock().unwrap()
    }

    pub fn estimate_calls(&self) -> u32 {
        *self.estimate_calls.lock().unwrap()
    }

    pub fn nonce_calls(&self) -> u32 {
        *self.nonce_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn read_state(
        &self,
        network: Network,
        address: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        self.reads.lock().unwrap().push(ReadCall {
            network,
            address,
            function: function.name.clone(),
            args: args.to_vec(),
        });
        self.read_results
            .lock()
            .unwrap()
            .get(&function.name)
            .cloned()
            .unwrap_or_else(|| Err(ChainError::Revert(format!("no mock for {}", function.name))))
    }

    async fn estimate_gas(&self, _network: Network, _tx: &TxRequest) -> Result<u64, ChainError> {
        *self.estimate_calls.lock().unwrap() += 1;
        self.estimates.lock().unwrap().pop_front().unwrap_or(Ok(100_000))
    }

    async fn current_gas_price(&self, _network: Network) -> Result<u128, ChainError> {
        *self.gas_price_calls.lock().unwrap() += 1;
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn pending_nonce(&self, _network: Network) -> Result<u64, ChainError> {
        *self.nonce_calls.lock().unwrap() += 1;
        Ok(*self.nonce.lock().unwrap())
    }

    async fn submit_transaction(&self, _network: Network, tx: &TxRequest) -> Result<TxHash, ChainError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Confirm);
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(tx.clone());
        if let Scripted::SubmitError(err) = outcome {
            return Err(err);
        }
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&(submitted.len() as u64).to_be_bytes());
        let hash = TxHash(hash);
        self.pending.lock().unwrap().insert(hash, outcome);
        Ok(hash)
    }

    async fn wait_for_confirmation(
        &self,
        _network: Network,
        tx_hash: TxHash,
        _timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        let outcome = self
            .pending
            .lock()
            .unwrap()
            .remove(&tx_hash)
            .unwrap_or(Scripted::Confirm);
        match outcome {
            Scripted::Confirm => Ok(Confirmation::Confirmed {
                block_number: 100,
                success: true,
            }),
            Scripted::Revert => Ok(Confirmation::Confirmed {
                block_number: 100,
                success: false,
            }),
            Scripted::TimedOut => Ok(Confirmation::TimedOut),
            Scripted::MinedLate => {
                self.mined_late.lock().unwrap().insert(tx_hash);
                Ok(Confirmation::TimedOut)
            }
            Scripted::ConfirmError(err) | Scripted::SubmitError(err) => Err(err),
        }
    }

    async fn check_receipt(&self, _network: Network, tx_hash: TxHash) -> Result<Option<Confirmation>, ChainError> {
        let mined = self.mined_late.lock().unwrap().contains(&tx_hash);
        Ok(mined.then_some(Confirmation::Confirmed {
            block_number: 101,
            success: true,
        }))
    }

    fn sender(&self, _network: Network) -> Address {
        self.sender
    }
}

pub fn static_step(name: &str, args: Vec<Value>) -> JobStep {
    JobStep {
        name: name.to_string(),
        network: Network::Bsc,
        contract: addr(0xc0),
        abi: PathBuf::from("test.json"),
        method: "run".to_string(),
        args: ArgSource::Static(args),
        gas: GasPolicy::default(),
        value: 0,
        validate_before_send: false,
        enabled: true,
        retry: None,
    }
}

pub fn calculated_step(name: &str, calculator: &str, input: Value) -> JobStep {
    let input = match input {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    JobStep {
        args: ArgSource::Calculated {
            calculator: calculator.to_string(),
            input,
        },
        ..static_step(name, vec![])
    }
}

pub fn simple_job(name: &str, step: JobStep) -> Job {
    Job {
        name: name.to_string(),
        schedule: Schedule::Every(Duration::from_secs(60)),
        enabled: true,
        kind: JobKind::Simple(step),
    }
}

pub fn multi_job(name: &str, steps: Vec<JobStep>, stop_on_failure: bool) -> Job {
    Job {
        name: name.to_string(),
        schedule: Schedule::Every(Duration::from_secs(60)),
        enabled: true,
        kind: JobKind::Multi(MultiJob {
            steps,
            stop_on_failure,
            delay_between_steps: None,
            retry: None,
            allowed_windows: Vec::new(),
        }),
    }
}
