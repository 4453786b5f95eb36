use std::process::{Command, ExitStatus, Stdio};

use anyhow::Context as _;

/// Output of an external tool, stdout followed by stderr.
#[derive(Debug, Clone)]
pub struct Captured {
    pub status: ExitStatus,
    pub text: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `cmd` to completion with no stdin, capturing everything it prints.
pub fn run_captured(cmd: &mut Command) -> anyhow::Result<Captured> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("spawn {program}"))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    Ok(Captured {
        status: output.status,
        text,
    })
}
