//! Leitura do arquivo de jobs (`jobs.toml`).
//!
//! Cada entrada `[[jobs]]` é convertida e validada individualmente: uma
//! entrada inválida é reportada em [`LoadedJobs::rejected`] e as demais
//! continuam carregando.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::Settings;
use crate::chain::{Address, Network};
use crate::error::SchedulerError;
use crate::job::{
    ArgSource, ConfigurationError, GasPolicy, GasPrice, Job, JobKind, JobStep, MultiJob, TimeWindow,
};
use crate::retry::RetryPolicy;
use crate::scheduler::Schedule;

/// Arquivo de jobs como escrito em disco, antes da validação.
#[derive(Debug, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub jobs: Vec<toml::Table>,
}

impl JobsFile {
    pub fn parse(contents: &str) -> Result<Self, SchedulerError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn read(path: &Path) -> Result<Self, SchedulerError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}

/// Resultado da carga: jobs válidos e as entradas rejeitadas com o motivo.
#[derive(Debug, Default)]
pub struct LoadedJobs {
    pub jobs: Vec<Job>,
    pub rejected: Vec<(String, ConfigurationError)>,
}

/// Quantidade nativa em wei: inteiro TOML ou string decimal para valores
/// acima de `i64`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Wei {
    Int(u64),
    Text(String),
}

impl Wei {
    fn to_u128(&self, step: &str, field: &str) -> Result<u128, ConfigurationError> {
        match self {
            Wei::Int(n) => Ok(u128::from(*n)),
            Wei::Text(s) => s.trim().parse().map_err(|_| ConfigurationError::InvalidStep {
                step: step.to_string(),
                reason: format!("`{field}` must be a non-negative integer, got '{s}'"),
            }),
        }
    }
}

/// Campos de uma chamada de contrato, comuns a jobs simples e steps.
#[derive(Debug, Deserialize)]
struct CallConfig {
    network: String,
    contract: String,
    abi: PathBuf,
    method: String,
    #[serde(default)]
    args: Option<Vec<Value>>,
    #[serde(default)]
    calculator: Option<String>,
    #[serde(default)]
    input: Option<Map<String, Value>>,
    #[serde(default)]
    gas_limit: Option<u64>,
    #[serde(default)]
    gas_price: Option<Wei>,
    #[serde(default)]
    gas_price_multiplier: Option<f64>,
    #[serde(default)]
    value: Option<Wei>,
    #[serde(default = "default_true")]
    validate_before_send: bool,
    #[serde(default)]
    retry: Option<RetryPolicy>,
}

#[derive(Debug, Deserialize)]
struct SimpleJobConfig {
    name: String,
    schedule: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(flatten)]
    call: CallConfig,
}

#[derive(Debug, Deserialize)]
struct StepConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(flatten)]
    call: CallConfig,
}

#[derive(Debug, Deserialize)]
struct WindowConfig {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct MultiJobConfig {
    name: String,
    schedule: String,
    #[serde(default = "default_true")]
    enabled: bool,
    steps: Vec<StepConfig>,
    #[serde(default = "default_true")]
    stop_on_failure: bool,
    /// Segundos, aceita frações.
    #[serde(default)]
    delay_between_steps: Option<f64>,
    #[serde(default)]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    allowed_windows: Vec<WindowConfig>,
}

fn default_true() -> bool {
    true
}

/// Converte e valida todas as entradas do arquivo.
pub fn build_jobs(entries: &[toml::Table], settings: &Settings) -> LoadedJobs {
    let mut loaded = LoadedJobs::default();
    let mut seen = HashSet::new();

    for (index, entry) in entries.iter().enumerate() {
        let label = entry
            .get("name")
            .and_then(toml::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("jobs[{index}]"));

        match build_job(entry, settings) {
            Ok(job) => {
                if seen.insert(job.name.clone()) {
                    loaded.jobs.push(job);
                } else {
                    loaded
                        .rejected
                        .push((label, ConfigurationError::DuplicateJob(job.name)));
                }
            }
            Err(e) => loaded.rejected.push((label, e)),
        }
    }
    loaded
}

fn build_job(entry: &toml::Table, settings: &Settings) -> Result<Job, ConfigurationError> {
    let raw = toml::Value::Table(entry.clone());
    let malformed = |e: toml::de::Error| ConfigurationError::Malformed {
        job: entry
            .get("name")
            .and_then(toml::Value::as_str)
            .unwrap_or("?")
            .to_string(),
        reason: e.message().to_string(),
    };

    let job = if entry.contains_key("steps") {
        let config: MultiJobConfig = raw.try_into().map_err(malformed)?;
        multi_job(config, settings)?
    } else {
        let config: SimpleJobConfig = raw.try_into().map_err(malformed)?;
        let step = build_step(config.name.clone(), true, config.call, settings)?;
        Job {
            schedule: parse_schedule(&config.schedule)?,
            name: config.name,
            enabled: config.enabled,
            kind: JobKind::Simple(step),
        }
    };
    job.validate()?;
    Ok(job)
}

fn multi_job(config: MultiJobConfig, settings: &Settings) -> Result<Job, ConfigurationError> {
    let steps = config
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let name = step
                .name
                .unwrap_or_else(|| format!("{}#{}", step.call.method, index + 1));
            build_step(name, step.enabled, step.call, settings)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let delay_between_steps = match config.delay_between_steps.map(Duration::try_from_secs_f64) {
        None => None,
        Some(Ok(delay)) => Some(delay).filter(|d| !d.is_zero()),
        Some(Err(e)) => {
            return Err(ConfigurationError::Malformed {
                job: config.name,
                reason: format!("delay_between_steps: {e}"),
            });
        }
    };

    let allowed_windows = config
        .allowed_windows
        .iter()
        .map(parse_window)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Job {
        schedule: parse_schedule(&config.schedule)?,
        name: config.name,
        enabled: config.enabled,
        kind: JobKind::Multi(MultiJob {
            steps,
            stop_on_failure: config.stop_on_failure,
            delay_between_steps,
            retry: config.retry,
            allowed_windows,
        }),
    })
}

fn build_step(
    name: String,
    enabled: bool,
    call: CallConfig,
    settings: &Settings,
) -> Result<JobStep, ConfigurationError> {
    let network: Network = call
        .network
        .parse()
        .map_err(|_| ConfigurationError::UnknownNetwork {
            step: name.clone(),
            value: call.network.clone(),
        })?;
    let contract: Address = call
        .contract
        .parse()
        .map_err(|_| ConfigurationError::InvalidAddress {
            step: name.clone(),
            value: call.contract.clone(),
        })?;

    let args = match (call.args, call.calculator) {
        (Some(_), Some(_)) => return Err(ConfigurationError::ArgsAndCalculator { step: name }),
        (None, None) => return Err(ConfigurationError::NoArgumentSource { step: name }),
        (Some(_), None) if call.input.is_some() => {
            return Err(ConfigurationError::InvalidStep {
                step: name,
                reason: "`input` is only used together with `calculator`".into(),
            });
        }
        (Some(values), None) => ArgSource::Static(values),
        (None, Some(calculator)) => ArgSource::Calculated {
            calculator,
            input: call.input.unwrap_or_default(),
        },
    };

    let price = match (call.gas_price, call.gas_price_multiplier) {
        (Some(_), Some(_)) => return Err(ConfigurationError::GasPriceAndMultiplier { step: name }),
        (Some(price), None) => GasPrice::Fixed(price.to_u128(&name, "gas_price")?),
        (None, multiplier) => match settings.fixed_gas_price() {
            Some(price) => GasPrice::Fixed(price),
            None => GasPrice::Network {
                multiplier: multiplier.unwrap_or(settings.gas_price_multiplier),
            },
        },
    };

    let value = match &call.value {
        Some(value) => value.to_u128(&name, "value")?,
        None => 0,
    };

    Ok(JobStep {
        name,
        network,
        contract,
        abi: call.abi,
        method: call.method,
        args,
        gas: GasPolicy {
            limit: call.gas_limit,
            price,
        },
        value,
        validate_before_send: call.validate_before_send,
        enabled,
        retry: call.retry,
    })
}

fn parse_schedule(value: &str) -> Result<Schedule, ConfigurationError> {
    value
        .parse()
        .map_err(|reason| ConfigurationError::InvalidSchedule {
            value: value.to_string(),
            reason,
        })
}

fn parse_window(window: &WindowConfig) -> Result<TimeWindow, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidWindow {
        start: window.start.clone(),
        end: window.end.clone(),
        reason,
    };
    let time = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| invalid(format!("expected HH:MM, got '{s}'")))
    };
    TimeWindow::new(time(&window.start)?, time(&window.end)?)
}

/// Lê o arquivo de jobs, aplica o ambiente às configurações e converte os jobs.
pub fn load(path: &Path) -> anyhow::Result<(Settings, LoadedJobs)> {
    let JobsFile { mut settings, jobs } =
        JobsFile::read(path).with_context(|| format!("failed to load {}", path.display()))?;
    settings.apply_process_env()?;
    let loaded = build_jobs(&jobs, &settings);
    Ok((settings, loaded))
}
