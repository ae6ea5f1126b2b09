//! Configuração do agendador: arquivo de jobs em TOML com uma tabela
//! `[settings]` opcional, sobrescrita por variáveis de ambiente.

mod jobs;
mod settings;

pub use jobs::{LoadedJobs, load};
pub use settings::{LogFormat, Settings};
