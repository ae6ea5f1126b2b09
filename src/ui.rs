//! Interface de terminal: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente uma
//! execução única (`run --once`) no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::LoadedJobs;
use crate::job::{Job, JobResult, RunState, StepResult};

/// Indicador visual de progresso para uma execução no terminal.
///
/// Exibe um spinner animado enquanto os jobs rodam e mensagens coloridas
/// para sucesso (verde), falha (vermelho) e falha parcial ou step pulado
/// (amarelo).
pub struct RunProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com a descrição fornecida.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(description.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    fn state_style(&self, state: RunState) -> &Style {
        match state {
            RunState::Succeeded => &self.green,
            RunState::Failed => &self.red,
            _ => &self.yellow,
        }
    }

    /// Exibe o resultado de um job, com uma linha por step.
    pub fn report(&self, result: &JobResult) {
        let mark = match result.state {
            RunState::Succeeded => "✓",
            RunState::Failed => "✗",
            _ => "!",
        };
        let style = self.state_style(result.state);
        self.pb.println(format!(
            "  {} {} {} ({} ms)",
            style.apply_to(mark),
            result.job,
            style.apply_to(result.state),
            result.duration_ms()
        ));
        if let Some(error) = &result.error {
            self.pb.println(format!("      {}", self.red.apply_to(error)));
        }
        for step in &result.steps {
            let line = match &step.result {
                StepResult::Succeeded { tx_hash, attempts } => format!(
                    "{} {}  {tx_hash} ({} attempt(s))",
                    self.green.apply_to("✓"),
                    step.name,
                    attempts.len()
                ),
                StepResult::Failed {
                    error,
                    attempt_count,
                    ..
                } => format!(
                    "{} {}  {error} after {attempt_count} attempt(s)",
                    self.red.apply_to("✗"),
                    step.name
                ),
                StepResult::Skipped { reason } => {
                    format!("{} {}  skipped ({reason:?})", self.yellow.apply_to("↷"), step.name)
                }
            };
            self.pb.println(format!("      {line}"));
        }
    }

    /// Finaliza o spinner.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    /// Imprime o resultado completo formatado em JSON com estilo colorido.
    pub fn print_result(&self, result: &JobResult) {
        println!();
        println!(
            "{}",
            self.state_style(result.state)
                .apply_to(format!("─── {} ───", result.job))
        );
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
    }
}

/// Lista os jobs carregados e os rejeitados com o motivo.
pub fn print_loaded(loaded: &LoadedJobs) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    for job in &loaded.jobs {
        println!("  {} {}", green.apply_to("✓"), describe(job));
    }
    for (name, error) in &loaded.rejected {
        println!("  {} {name}: {error}", red.apply_to("✗"));
    }
    println!(
        "{} job(s) accepted, {} rejected",
        loaded.jobs.len(),
        loaded.rejected.len()
    );
}

/// Mostra o plano de execução sem enviar nada (`run --dry-run`).
pub fn print_plan(jobs: &[Job]) {
    let dim = Style::new().dim();
    for job in jobs {
        println!("{}", describe(job));
        for (index, step) in job.steps().iter().enumerate() {
            let state = if step.enabled { "" } else { " (disabled)" };
            println!(
                "  {}. {} {}.{} on {}{state}",
                index + 1,
                step.name,
                step.contract,
                step.method,
                step.network
            );
        }
        if !job.enabled {
            println!("  {}", dim.apply_to("job disabled"));
        }
    }
}

/// Lista nomes de calculadoras com a aridade de cada uma.
pub fn print_calculators(calculators: &[(&str, usize)]) {
    let cyan = Style::new().cyan();
    for (name, arity) in calculators {
        println!("  {} ({arity} argument(s))", cyan.apply_to(name));
    }
}

fn describe(job: &Job) -> String {
    let kind = if job.is_multi() {
        format!("{} steps", job.steps().len())
    } else {
        "simple".to_string()
    };
    format!("{} [{}] {kind}", job.name, job.schedule)
}
