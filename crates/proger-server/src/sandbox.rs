//! Running submitted code.
//!
//! The default `Simulated` mode never executes anything; it inspects the
//! source text and reports a canned outcome. `Docker` mode runs each test
//! case in a throwaway, network-less container.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::problems::TestCase;

pub const CASE_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    Simulated,
    Docker,
}

impl SandboxMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Some(Self::Simulated),
            "docker" => Some(Self::Docker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python3,
    C,
    Cpp,
    CSharp,
    JavaScript,
    TypeScript,
}

impl Language {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python3" => Some(Self::Python3),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            "csharp" => Some(Self::CSharp),
            "javascript" => Some(Self::JavaScript),
            "typescript" => Some(Self::TypeScript),
            _ => None,
        }
    }

    fn source_file(self) -> &'static str {
        match self {
            Self::Python3 => "main.py",
            Self::C => "main.c",
            Self::Cpp => "main.cpp",
            Self::CSharp => "Program.cs",
            Self::JavaScript => "main.js",
            Self::TypeScript => "main.ts",
        }
    }

    fn image(self) -> &'static str {
        match self {
            Self::Python3 => "python:3.10-slim-buster",
            Self::C | Self::Cpp => "gcc:latest",
            Self::CSharp => "mcr.microsoft.com/dotnet/sdk:6.0",
            Self::JavaScript | Self::TypeScript => "node:18-slim",
        }
    }

    /// Command run inside the container, with the source mounted at `/app`.
    fn command(self) -> Vec<&'static str> {
        match self {
            Self::Python3 => vec!["python", "/app/main.py"],
            Self::C => vec!["bash", "-c", "gcc /app/main.c -o /tmp/a.out && /tmp/a.out"],
            Self::Cpp => vec!["bash", "-c", "g++ /app/main.cpp -o /tmp/a.out && /tmp/a.out"],
            Self::CSharp => vec![
                "bash",
                "-c",
                "dotnet new console -o /tmp/app >/dev/null && cp /app/Program.cs /tmp/app/Program.cs && dotnet run --project /tmp/app",
            ],
            Self::JavaScript => vec!["node", "/app/main.js"],
            Self::TypeScript => vec![
                "bash",
                "-c",
                "npm install -g typescript >/dev/null && tsc --outDir /tmp /app/main.ts && node /tmp/main.js",
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub test_case_id: usize,
    pub success: bool,
    pub output: String,
    pub error: String,
    pub passed: bool,
    pub runtime: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub runtime: f64,
    pub memory_usage: String,
    pub cases: Vec<CaseResult>,
}

impl Execution {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            runtime: 0.0,
            memory_usage: "N/A".into(),
            cases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    mode: SandboxMode,
}

impl Sandbox {
    pub fn new(mode: SandboxMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    pub async fn execute(&self, language: &str, code: &str, cases: &[TestCase]) -> Execution {
        let Some(lang) = Language::parse(language) else {
            return Execution::failed(format!("Unsupported language: {language}"));
        };
        match self.mode {
            SandboxMode::Simulated => simulate(code),
            SandboxMode::Docker => run_in_docker(lang, code, cases).await,
        }
    }
}

fn simulate(code: &str) -> Execution {
    let lower = code.to_lowercase();
    if lower.contains("error") || lower.contains("fail") {
        return Execution {
            memory_usage: "Simulated: 0MB".into(),
            ..Execution::failed("Simulated: Runtime error or compilation failure in sandbox.")
        };
    }

    let (output, runtime, memory) = if code.contains("while True:") || code.contains("import os") {
        ("Simulated: Code ran with potential infinite loop/security risk.", 0.5, "15MB")
    } else {
        ("Simulated: Code executed successfully against test cases.", 0.2, "10MB")
    };
    Execution {
        success: true,
        output: output.into(),
        error: String::new(),
        runtime,
        memory_usage: format!("Simulated: {memory}"),
        cases: Vec::new(),
    }
}

/// `docker run` arguments for one test case. The container is named so a
/// timed-out run can be killed; killing the CLI leaves it running.
pub fn docker_args(lang: Language, workdir: &Path, name: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "run",
        "--rm",
        "-i",
        "--name",
        name,
        "--network",
        "none",
        "--memory",
        "128m",
        "--cpus",
        "0.5",
        "-v",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(format!("{}:/app:ro", workdir.display()));
    args.push(lang.image().to_string());
    args.extend(lang.command().into_iter().map(String::from));
    args
}

async fn run_in_docker(lang: Language, code: &str, cases: &[TestCase]) -> Execution {
    let workdir = std::env::temp_dir().join(format!("proger-{}", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
        return Execution::failed(format!("Failed to set up sandbox: {e}"));
    }
    if let Err(e) = tokio::fs::write(workdir.join(lang.source_file()), code).await {
        let _ = tokio::fs::remove_dir_all(&workdir).await;
        return Execution::failed(format!("Failed to set up sandbox: {e}"));
    }

    // A problem without test cases still gets one run on empty input.
    let fallback = [TestCase::default()];
    let cases = if cases.is_empty() { &fallback[..] } else { cases };

    let mut results = Vec::with_capacity(cases.len());
    for (i, case) in cases.iter().enumerate() {
        results.push(run_case(lang, &workdir, i + 1, case).await);
    }

    if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
        warn!("Failed to clean up {}: {}", workdir.display(), e);
    }

    Execution {
        success: results.iter().all(|r| r.passed),
        output: results.iter().map(|r| r.output.as_str()).collect::<Vec<_>>().join("\n"),
        error: results
            .iter()
            .filter(|r| !r.error.is_empty())
            .map(|r| r.error.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        runtime: results.iter().map(|r| r.runtime).sum(),
        memory_usage: "N/A".into(),
        cases: results,
    }
}

async fn run_case(lang: Language, workdir: &Path, id: usize, case: &TestCase) -> CaseResult {
    let failed = |error: String, runtime: f64| CaseResult {
        test_case_id: id,
        success: false,
        output: String::new(),
        error,
        passed: false,
        runtime,
    };

    let name = format!("proger-{}", uuid::Uuid::new_v4());
    let mut cmd = Command::new("docker");
    cmd.args(docker_args(lang, workdir, &name));

    let started = Instant::now();
    let output = match run_with_input(cmd, &case.input, CASE_TIMEOUT).await {
        Ok(Some(output)) => output,
        Ok(None) => {
            kill_container(&name).await;
            return failed("Execution timed out.".into(), CASE_TIMEOUT.as_secs_f64());
        }
        Err(e) => return failed(format!("Sandbox error: {e}"), started.elapsed().as_secs_f64()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let success = output.status.success() && stderr.is_empty();
    CaseResult {
        test_case_id: id,
        success,
        passed: success && stdout == case.output.trim(),
        output: stdout,
        error: stderr,
        runtime: started.elapsed().as_secs_f64(),
    }
}

/// Feeds `input` to the process and collects its output. Writing stdin and
/// waiting both count against `limit`; `None` means it ran out.
async fn run_with_input(mut cmd: Command, input: &str, limit: Duration) -> std::io::Result<Option<Output>> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("stdin closed early: {}", e);
            }
        }
    };
    let run = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    match tokio::time::timeout(limit, run).await {
        Ok(output) => output.map(Some),
        Err(_) => Ok(None),
    }
}

async fn kill_container(name: &str) {
    let kill = Command::new("docker")
        .args(["kill", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match tokio::time::timeout(KILL_TIMEOUT, kill).await {
        Ok(Ok(status)) if status.success() => debug!("Killed timed-out container {}", name),
        Ok(Ok(status)) => warn!("docker kill {} exited with {}", name, status),
        Ok(Err(e)) => warn!("docker kill {} failed: {}", name, e),
        Err(_) => warn!("docker kill {} timed out", name),
    }
}
