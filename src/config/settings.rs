//! Configurações de execução lidas da tabela `[settings]` do arquivo de jobs.
//!
//! Valores não presentes no arquivo usam defaults sensíveis. Cada campo pode
//! ser sobrescrito por uma variável de ambiente, que tem precedência sobre o
//! arquivo (o `.env` é carregado em `main` antes da leitura).

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use crate::chain::{Address, LocalSigner, Network, RpcSettings, Signing};
use crate::retry::RetryPolicy;

/// Formato da saída de log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Linhas legíveis para terminal.
    #[default]
    Simple,
    /// Um objeto JSON por evento.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "text" => Ok(LogFormat::Simple),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Onde as transações são assinadas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// Assina localmente com `PRIVATE_KEY` e envia a transação crua.
    #[default]
    Local,
    /// O nó assina em nome de `SENDER_ADDRESS` (`eth_sendTransaction`).
    Node,
}

impl FromStr for SigningMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SigningMode::Local),
            "node" => Ok(SigningMode::Node),
            other => Err(format!("unknown signing mode: {other}")),
        }
    }
}

/// Valor sensível que não aparece em `Debug`.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Configuração global do agendador.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Endpoints RPC por rede (`bsc = ["https://..."]`). O primeiro é o
    /// principal, os demais são usados como failover.
    #[serde(default)]
    pub rpc: BTreeMap<String, Vec<String>>,

    /// Conta remetente. Obrigatória no modo `node`; no modo `local`, se
    /// presente, precisa bater com o endereço da chave.
    #[serde(default)]
    pub sender_address: Option<String>,

    /// Chave privada usada no modo `local`. Prefira `PRIVATE_KEY` no `.env`.
    #[serde(default)]
    pub private_key: Option<Secret>,

    #[serde(default)]
    pub signing_mode: SigningMode,

    /// Preço de gas fixo em wei aplicado a steps sem preço próprio. 0 = não definido.
    #[serde(default)]
    pub default_gas_price: u64,

    /// Multiplicador sobre o preço de gas da rede.
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: f64,

    /// Máximo de retentativas após a primeira tentativa.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pausa entre tentativas, em segundos.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Tempo máximo de espera pela confirmação, em segundos.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout: u64,

    /// Profundidade de blocos exigida para considerar a transação confirmada.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Intervalo de consulta do recibo, em milissegundos.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Timeout de cada requisição HTTP ao nó, em segundos.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Diretório base para os caminhos relativos de ABI.
    #[serde(default = "default_abi_dir")]
    pub abi_dir: PathBuf,

    /// Nível de log usado quando `RUST_LOG` não está definido.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

// Valor padrão para o multiplicador de gas: 1.0.
fn default_gas_price_multiplier() -> f64 {
    1.0
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para a pausa entre tentativas: 30s.
fn default_retry_delay() -> u64 {
    30
}

// Valor padrão para o timeout de confirmação: 180s.
fn default_confirmation_timeout() -> u64 {
    180
}

// Valor padrão de confirmações: 1 (incluída em bloco).
fn default_confirmations() -> u64 {
    1
}

// Valor padrão para o intervalo de consulta do recibo: 2000ms.
fn default_receipt_poll_interval_ms() -> u64 {
    2000
}

// Valor padrão para o timeout de requisição: 30s.
fn default_request_timeout() -> u64 {
    30
}

fn default_abi_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc: BTreeMap::new(),
            sender_address: None,
            private_key: None,
            signing_mode: SigningMode::default(),
            default_gas_price: 0,
            gas_price_multiplier: default_gas_price_multiplier(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            confirmation_timeout: default_confirmation_timeout(),
            confirmations: default_confirmations(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            request_timeout: default_request_timeout(),
            abi_dir: default_abi_dir(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

// Lê e converte uma variável; valores vazios são ignorados.
fn env_value<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        _ => Ok(None),
    }
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Aplica as variáveis de ambiente sobre os valores do arquivo.
    ///
    /// `lookup` abstrai `std::env::var` para que os testes não dependam do
    /// ambiente do processo.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for network in Network::ALL {
            if let Some(raw) = lookup(network.rpc_env_var()) {
                let urls = split_urls(&raw);
                if !urls.is_empty() {
                    self.rpc.insert(network.as_str().to_string(), urls);
                }
            }
        }
        if let Some(sender) = env_value::<String>(&lookup, "SENDER_ADDRESS")? {
            self.sender_address = Some(sender);
        }
        if let Some(key) = env_value::<String>(&lookup, "PRIVATE_KEY")? {
            self.private_key = Some(Secret(key));
        }
        if let Some(mode) = env_value(&lookup, "SIGNING_MODE")? {
            self.signing_mode = mode;
        }
        if let Some(price) = env_value(&lookup, "DEFAULT_GAS_PRICE")? {
            self.default_gas_price = price;
        }
        if let Some(multiplier) = env_value(&lookup, "GAS_PRICE_MULTIPLIER")? {
            self.gas_price_multiplier = multiplier;
        }
        if let Some(retries) = env_value(&lookup, "MAX_RETRIES")? {
            self.max_retries = retries;
        }
        if let Some(delay) = env_value(&lookup, "RETRY_DELAY")? {
            self.retry_delay = delay;
        }
        if let Some(timeout) = env_value(&lookup, "CONFIRMATION_TIMEOUT")? {
            self.confirmation_timeout = timeout;
        }
        if let Some(confirmations) = env_value(&lookup, "CONFIRMATIONS")? {
            self.confirmations = confirmations;
        }
        if let Some(interval) = env_value(&lookup, "RECEIPT_POLL_INTERVAL_MS")? {
            self.receipt_poll_interval_ms = interval;
        }
        if let Some(dir) = env_value::<String>(&lookup, "ABI_DIR")? {
            self.abi_dir = PathBuf::from(dir);
        }
        if let Some(level) = env_value::<String>(&lookup, "LOG_LEVEL")? {
            self.log_level = level;
        }
        if let Some(format) = env_value(&lookup, "LOG_FORMAT")? {
            self.log_format = format;
        }
        self.check()
    }

    /// Aplica o ambiente do processo.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    fn check(&self) -> Result<()> {
        if !self.gas_price_multiplier.is_finite() || self.gas_price_multiplier <= 0.0 {
            bail!(
                "gas_price_multiplier must be a positive number, got {}",
                self.gas_price_multiplier
            );
        }
        if self.receipt_poll_interval_ms == 0 {
            bail!("receipt_poll_interval_ms must be positive");
        }
        Ok(())
    }

    /// Preço de gas fixo global, se configurado.
    pub fn fixed_gas_price(&self) -> Option<u128> {
        (self.default_gas_price > 0).then_some(u128::from(self.default_gas_price))
    }

    /// Política de retentativa para steps e jobs sem política própria.
    pub fn default_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_delay))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout)
    }

    fn sender(&self) -> Result<Option<Address>> {
        self.sender_address
            .as_deref()
            .map(|raw| {
                raw.parse::<Address>()
                    .map_err(|e| anyhow!("invalid SENDER_ADDRESS {raw:?}: {e}"))
            })
            .transpose()
    }

    /// Define como as transações são assinadas.
    ///
    /// No modo `local` exige `PRIVATE_KEY`; no modo `node`, `SENDER_ADDRESS`.
    pub fn signing(&self) -> Result<Signing> {
        let sender = self.sender()?;
        match self.signing_mode {
            SigningMode::Node => {
                let sender = sender.context("SENDER_ADDRESS is not set (required with SIGNING_MODE=node)")?;
                Ok(Signing::Node(sender))
            }
            SigningMode::Local => {
                let key = self
                    .private_key
                    .as_ref()
                    .context("PRIVATE_KEY is not set (or use SIGNING_MODE=node)")?;
                let signer = LocalSigner::from_hex(key.expose()).map_err(|e| anyhow!("PRIVATE_KEY: {e}"))?;
                if let Some(sender) = sender {
                    if sender != signer.address() {
                        bail!(
                            "SENDER_ADDRESS {sender} does not match the PRIVATE_KEY address {}",
                            signer.address()
                        );
                    }
                }
                Ok(Signing::Local(signer))
            }
        }
    }

    /// Monta a configuração do cliente JSON-RPC.
    pub fn rpc_settings(&self) -> Result<RpcSettings> {
        let signing = self.signing()?;

        let mut endpoints = HashMap::new();
        for (name, urls) in &self.rpc {
            let network: Network = name.parse().map_err(|e| anyhow!("[settings.rpc] {e}"))?;
            let urls: Vec<String> = urls
                .iter()
                .map(|url| url.trim())
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
            if !urls.is_empty() {
                endpoints.insert(network, urls);
            }
        }

        Ok(RpcSettings {
            endpoints,
            signing,
            confirmations: self.confirmations,
            poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout),
        })
    }
}
