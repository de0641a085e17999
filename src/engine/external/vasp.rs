use std::fs;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use crate::engine::simulator::{MdSimulator, SimulationOutput, SimulationRequest};

/// Environment variable through which the wall-time budget reaches the engine.
pub const WALL_TIME_ENV: &str = "DENSITY_FINDER_WALL_TIME";
/// Run description written next to the input geometry.
pub const JOB_FILE: &str = "job.json";
/// Engine parameter file.
pub const INCAR_FILE: &str = "INCAR";

/// Runs an external engine command (VASP or a wrapper script) inside the
/// calculation directory.
///
/// The command line comes from the request's forwarded settings. Before the
/// launch the run kind is written into `INCAR` (merged over any INCAR already
/// in the directory) and the whole request into `job.json` for wrapper
/// scripts. The engine reads `POSCAR` and `INCAR` and is expected to leave
/// `OUTCAR` and `CONTCAR` behind (the executor checks). Standard output and
/// error are kept as `stdout.log` and `stderr.log`.
pub struct ExternalSimulator {
    extra_env: Vec<(String, String)>,
}

impl ExternalSimulator {
    pub fn new() -> Self {
        Self { extra_env: Vec::new() }
    }

    /// Adds an environment variable to every invocation.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.push((key.to_string(), value.to_string()));
        self
    }

    fn write_job_file(&self, request: &SimulationRequest) -> Result<()> {
        let path = request.workdir.join(JOB_FILE);
        let body = serde_json::to_string_pretty(request).context("Failed to serialize job description")?;
        fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))
    }

    /// Writes the run kind's tags into `INCAR`. Lines setting other keys are
    /// kept; lines setting one of our keys are replaced.
    fn write_incar(&self, request: &SimulationRequest) -> Result<()> {
        let path = request.workdir.join(INCAR_FILE);
        let tags = request.kind.incar_tags();
        let existing = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        let mut body = String::new();
        for line in existing.lines() {
            let key = line.split('=').next().unwrap_or("").trim().to_ascii_uppercase();
            if !tags.iter().any(|(k, _)| *k == key) {
                body.push_str(line);
                body.push('\n');
            }
        }
        for (key, value) in &tags {
            body.push_str(&format!("{} = {}\n", key, value));
        }
        fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))
    }

    /// Executes the command and captures its output streams.
    fn run_process(&self, request: &SimulationRequest) -> Result<String> {
        let mut parts = request.settings.simulation_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Empty simulation command"))?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .current_dir(&request.workdir)
            .env(WALL_TIME_ENV, request.settings.wall_time.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.extra_env {
            cmd.env(k, v);
        }

        debug!("Launching '{}' in {:?}", request.settings.simulation_command, request.workdir);
        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn simulation command '{}'", program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        fs::write(request.workdir.join("stdout.log"), &stdout).context("Failed to save stdout")?;
        fs::write(request.workdir.join("stderr.log"), &stderr).context("Failed to save stderr")?;

        if !output.status.success() {
            bail!("Simulation exited with {}: {}", output.status, stderr.trim());
        }
        Ok(stdout)
    }

    fn check_errors(&self, output: &str) -> Result<()> {
        if output.contains("VERY BAD NEWS") {
            bail!("Internal engine error (VERY BAD NEWS)");
        }
        if output.contains("ZBRENT: fatal error") {
            bail!("Ionic relaxation failure (ZBRENT)");
        }
        if output.contains("Error EDDDAV") {
            bail!("Electronic minimisation failure (EDDDAV)");
        }
        Ok(())
    }
}

impl Default for ExternalSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MdSimulator for ExternalSimulator {
    fn name(&self) -> &str {
        "External engine (VASP I/O)"
    }

    fn run(&self, request: &SimulationRequest) -> Result<SimulationOutput> {
        self.write_incar(request)?;
        self.write_job_file(request)?;
        let stdout = self.run_process(request)?;
        self.check_errors(&stdout)?;

        Ok(SimulationOutput {
            outcar: request.workdir.join("OUTCAR"),
            contcar: request.workdir.join("CONTCAR"),
        })
    }
}
