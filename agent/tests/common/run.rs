use anyhow::Context;
use assert_cmd::cargo::{CargoError, CommandCargoExt};
use std::{
    path::Path,
    process::{Child, Command, Output, Stdio},
};

/// Constructs a `Command` that executes the agent binary, without inheriting
/// the `MACHINESTATSD_*` and `STATSD_*` variables of the environment.
///
/// This does NOT call `cargo run`, see [`assert_cmd::Command::cargo_bin`].
pub fn command_run_agent(binary: &str, bin_args: &[&str]) -> Result<Command, CargoError> {
    let mut cmd = Command::cargo_bin(binary)?;
    for (key, _) in std::env::vars() {
        if key.starts_with("MACHINESTATSD_") || key.starts_with("STATSD_") {
            cmd.env_remove(key);
        }
    }
    cmd.args(bin_args);
    Ok(cmd)
}

/// Executes the agent in `workdir` until it exits, and captures its output.
pub fn run_agent_output(binary: &str, bin_args: &[&str], workdir: &Path) -> anyhow::Result<Output> {
    let mut cmd = command_run_agent(binary, bin_args)?;
    cmd.current_dir(workdir)
        .output()
        .with_context(|| format!("could not run process {cmd:?}"))
}

/// Starts the agent in `workdir`, without waiting for it.
///
/// The process is killed when the returned guard is dropped.
pub fn spawn_agent(binary: &str, bin_args: &[&str], workdir: &Path) -> anyhow::Result<ChildGuard> {
    let mut cmd = command_run_agent(binary, bin_args)?;
    let child = cmd
        .current_dir(workdir)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("could not spawn process {cmd:?}"))?;
    Ok(ChildGuard::new(child))
}

/// A wrapper around a child process that kills the child on drop.
pub struct ChildGuard(Option<Child>);

impl ChildGuard {
    pub fn new(process: Child) -> Self {
        Self(Some(process))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if let Err(e) = child.kill() {
                println!("ERROR: failed to kill child {} on drop: {e}", child.id());
            }
            let _ = child.wait();
        }
    }
}
