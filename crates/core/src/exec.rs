use std::process::Command;

use tracing::debug;

use crate::error::{PlacementError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools on behalf of the driver.
pub trait Executor: Send + Sync {
    fn execute(&self, program: &str, args: &[&str], run_as_root: bool) -> Result<CommandOutput>;
}

/// Spawns real processes, prefixing privileged calls with the root helper.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    root_helper: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(root_helper: Option<&str>) -> Self {
        Self {
            root_helper: root_helper
                .map(|helper| helper.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    fn command_line(&self, program: &str, args: &[&str], run_as_root: bool) -> Vec<String> {
        let mut line = Vec::with_capacity(self.root_helper.len() + args.len() + 1);
        if run_as_root {
            line.extend(self.root_helper.iter().cloned());
        }
        line.push(program.to_string());
        line.extend(args.iter().map(|arg| arg.to_string()));
        line
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, program: &str, args: &[&str], run_as_root: bool) -> Result<CommandOutput> {
        let line = self.command_line(program, args, run_as_root);
        let rendered = line.join(" ");
        debug!("running `{rendered}`");

        let output = Command::new(&line[0])
            .args(&line[1..])
            .output()
            .map_err(|err| PlacementError::CommandFailed {
                command: rendered.clone(),
                status: "spawn error".to_string(),
                stderr: err.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(PlacementError::CommandFailed {
                command: rendered,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}
