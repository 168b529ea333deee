//! Interactive confirmation for `--clean` and `--test`.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use crate::certs::provisioner::{Step, StepGate};

/// How an empty answer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAnswer {
    Yes,
    No,
}

/// Interpret a y/n answer.
pub fn parse_answer(answer: &str, default: DefaultAnswer) -> bool {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => default == DefaultAnswer::Yes,
        "y" | "yes" => true,
        _ => false,
    }
}

/// Print `question` and read one line from `input`.
pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str, default: DefaultAnswer) -> io::Result<bool> {
    let hint = match default {
        DefaultAnswer::Yes => "[Y/n]",
        DefaultAnswer::No => "[y/N]",
    };
    write!(output, "{} {} ", question, hint)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        // EOF: no operator to answer.
        return Ok(false);
    }
    Ok(parse_answer(&line, default))
}

/// Ask on the terminal without blocking the runtime.
pub async fn confirm(question: String, default: DefaultAnswer) -> bool {
    let result = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        ask(&mut stdin.lock(), &mut stdout.lock(), &question, default)
    })
    .await;

    match result {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to read confirmation");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "Confirmation prompt panicked");
            false
        }
    }
}

/// Pauses before every mutating step and asks the operator to continue.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractiveGate;

#[async_trait]
impl StepGate for InteractiveGate {
    async fn proceed(&self, step: &Step) -> bool {
        confirm(format!("[test] Next: {}. Continue?", step), DefaultAnswer::Yes).await
    }
}
