//! Bootstrap runner
//!
//! Executes a rendered bootstrap script on the instance, one step at a time,
//! through `bash -c` (the interpreter named by the script's shebang). A
//! failing step is logged and the run continues, as a plain shell script
//! without `set -e` would, unless `fail_fast` is set.

use crate::StackError;
use crate::userdata::{RenderedScript, RenderedStep, Section};
use tracing::{debug, info, warn};

/// Shell used to execute each step
pub const SHELL: &str = "bash";

/// Runner options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Abort at the first failing step
    pub fail_fast: bool,
    /// Only run these sections (empty runs everything)
    pub sections: Vec<Section>,
    /// Log the commands without executing them
    pub dry_run: bool,
}

impl RunOptions {
    fn selects(&self, section: Section) -> bool {
        self.sections.is_empty() || self.sections.contains(&section)
    }
}

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub section: Section,
    pub command: String,
    /// Exit code, `None` when killed by a signal or not executed
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Everything a run did, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub outcomes: Vec<StepOutcome>,
}

impl BootReport {
    /// Whether any step of `section` was executed
    pub fn reached(&self, section: Section) -> bool {
        self.outcomes.iter().any(|o| o.section == section)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    /// Concatenated standard output of every step
    pub fn stdout(&self) -> String {
        self.outcomes.iter().map(|o| o.stdout.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Executes rendered scripts
#[derive(Debug, Clone, Default)]
pub struct BootRunner {
    options: RunOptions,
}

impl BootRunner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run every selected step of `script`
    pub async fn run(&self, script: &RenderedScript) -> Result<BootReport, StackError> {
        let steps: Vec<&RenderedStep> = script
            .steps
            .iter()
            .filter(|s| self.options.selects(s.section))
            .collect();
        info!("Executing {} bootstrap step(s)", steps.len());

        let mut report = BootReport::default();
        for (i, step) in steps.iter().enumerate() {
            debug!("Executing step {}/{} [{}]", i + 1, steps.len(), step.section);

            if self.options.dry_run {
                info!("[dry-run] {}: {}", step.section, step.command);
                report.outcomes.push(StepOutcome {
                    section: step.section,
                    command: step.command.clone(),
                    status: None,
                    success: true,
                    stdout: String::new(),
                    stderr: String::new(),
                });
                continue;
            }

            let outcome = execute_step(step).await?;
            if !outcome.success && self.options.fail_fast {
                let message = format!(
                    "'{}' exited with status {}",
                    outcome.command,
                    outcome.status.unwrap_or(-1)
                );
                report.outcomes.push(outcome);
                return Err(StackError::step(step.section.name(), message));
            }
            report.outcomes.push(outcome);
        }

        let failed = report.failures().count();
        if failed > 0 {
            warn!("{} bootstrap step(s) failed", failed);
        } else {
            info!("Bootstrap completed");
        }
        Ok(report)
    }
}

async fn execute_step(step: &RenderedStep) -> Result<StepOutcome, StackError> {
    debug!("Running shell command: {}", step.command);
    let output = tokio::process::Command::new(SHELL)
        .args(["-c", &step.command])
        .output()
        .await
        .map_err(|e| StackError::Command(format!("{}: {}", step.command, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        warn!(
            "Command exited with status {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim_end()
        );
    }
    for line in stdout.lines() {
        info!("{}", line);
    }

    Ok(StepOutcome {
        section: step.section,
        command: step.command.clone(),
        status: output.status.code(),
        success: output.status.success(),
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::userdata::SHEBANG;

    fn script(steps: &[(Section, &str)]) -> RenderedScript {
        RenderedScript {
            shebang: SHEBANG.to_string(),
            steps: steps
                .iter()
                .map(|(section, command)| RenderedStep {
                    section: *section,
                    command: command.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_run() {
        let script = script(&[
            (Section::Restore, "false"),
            (Section::Schedule, "echo scheduled"),
        ]);
        let report = BootRunner::default().run(&script).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures().count(), 1);
        assert!(report.reached(Section::Schedule));
        assert_eq!(report.stdout(), "scheduled\n");
    }

    #[tokio::test]
    async fn test_steps_run_under_bash() {
        let script = script(&[(Section::Custom, "[[ -n \"$BASH_VERSION\" ]] && echo bash")]);
        let report = BootRunner::default().run(&script).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.stdout(), "bash\n");
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let script = script(&[
            (Section::Restore, "exit 3"),
            (Section::Schedule, "echo scheduled"),
        ]);
        let runner = BootRunner::new(RunOptions {
            fail_fast: true,
            ..Default::default()
        });
        let result = runner.run(&script).await;
        assert!(matches!(result, Err(StackError::Step { ref section, .. }) if section == "restore"));
    }

    #[tokio::test]
    async fn test_section_filter_and_dry_run() {
        let script = script(&[
            (Section::Packages, "exit 1"),
            (Section::Schedule, "exit 1"),
        ]);
        let runner = BootRunner::new(RunOptions {
            sections: vec![Section::Schedule],
            dry_run: true,
            ..Default::default()
        });
        let report = runner.run(&script).await.unwrap();

        assert!(!report.reached(Section::Packages));
        assert!(report.reached(Section::Schedule));
        assert!(report.is_success());
    }
}
