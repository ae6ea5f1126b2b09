//! Interface de linha de comando baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, validate,
//! calculators) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Agendador de chamadas a contratos inteligentes.
#[derive(Debug, Parser)]
#[command(name = "contract-scheduler", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de jobs.
    #[arg(long, global = true, default_value = "jobs.toml")]
    pub config: PathBuf,

    /// Habilita saída detalhada (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa os jobs: em loop conforme o agendamento, ou uma única vez.
    Run {
        /// Executa cada job selecionado uma vez e sai.
        #[arg(long)]
        once: bool,

        /// Intervalo, em segundos, entre verificações do agendador.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Restringe a execução aos jobs com estes nomes.
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Apenas lista o que seria executado, sem enviar transações.
        #[arg(long)]
        dry_run: bool,
    },

    /// Carrega o arquivo de jobs e reporta jobs aceitos e rejeitados.
    Validate,

    /// Lista as calculadoras de argumentos registradas.
    Calculators,
}
