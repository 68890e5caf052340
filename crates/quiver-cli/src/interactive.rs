//! Interactive keep/uninstall prompt for blocked candidates.
//!
//! Used when `install --interactive` suspends on a security finding.
//! Uses dialoguer for terminal UI prompts.

use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

use quiver_core::scan::Severity;
use quiver_core::workflow::{BlockedCandidate, Decision};

/// Asks the user what to do with each blocked candidate.
pub struct DecisionPrompt<W: Write = io::Stdout> {
    /// Output writer (for testing)
    writer: W,
    theme: ColorfulTheme,
}

impl DecisionPrompt<io::Stdout> {
    pub fn new() -> Self {
        Self {
            writer: io::stdout(),
            theme: ColorfulTheme::default(),
        }
    }
}

impl<W: Write> DecisionPrompt<W> {
    #[cfg(test)]
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            theme: ColorfulTheme::default(),
        }
    }

    /// Show each candidate's findings and collect a decision for it.
    pub fn collect(&mut self, blocked: &[BlockedCandidate]) -> Result<BTreeMap<String, Decision>> {
        writeln!(self.writer)?;
        writeln!(
            self.writer,
            "{}",
            style("  Security review required").bold().yellow()
        )?;

        let mut decisions = BTreeMap::new();
        for candidate in blocked {
            self.print_candidate(candidate)?;
            let choice = Select::with_theme(&self.theme)
                .with_prompt(format!("Install '{}' anyway?", candidate.name))
                .items(&["Uninstall (skip it)", "Keep (install it)"])
                .default(0)
                .interact()?;
            let decision = if choice == 1 {
                Decision::Keep
            } else {
                Decision::Uninstall
            };
            decisions.insert(candidate.name.clone(), decision);
        }
        Ok(decisions)
    }

    fn print_candidate(&mut self, candidate: &BlockedCandidate) -> Result<()> {
        writeln!(self.writer)?;
        writeln!(
            self.writer,
            "  {} {}",
            style(&candidate.name).bold(),
            severity_label(candidate.severity)
        )?;
        if candidate.findings.is_empty() {
            writeln!(self.writer, "    (scanner reported no individual findings)")?;
        }
        for finding in &candidate.findings {
            let location = match (&finding.file, finding.line) {
                (Some(file), Some(line)) => format!(" at {}:{}", file, line),
                (Some(file), None) => format!(" in {}", file),
                _ => String::new(),
            };
            writeln!(
                self.writer,
                "    - [{}] {}{}",
                finding.severity, finding.title, location
            )?;
        }
        Ok(())
    }
}

fn severity_label(severity: Severity) -> String {
    let label = format!("[{}]", severity);
    match severity {
        Severity::Critical | Severity::High => style(label).red().bold().to_string(),
        Severity::Medium => style(label).yellow().to_string(),
        _ => style(label).dim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::scan::Finding;

    #[test]
    fn candidate_details_list_every_finding() {
        let mut output = Vec::new();
        let mut prompt = DecisionPrompt::with_writer(&mut output);
        let candidate = BlockedCandidate {
            name: "shell-helper".to_string(),
            severity: Severity::Critical,
            findings: vec![
                Finding {
                    rule_id: Some("exec".to_string()),
                    severity: Severity::Critical,
                    title: "Downloads and executes a script".to_string(),
                    file: Some("scripts/setup.sh".to_string()),
                    line: Some(3),
                    snippet: None,
                },
                Finding {
                    rule_id: None,
                    severity: Severity::Low,
                    title: "Broad file access".to_string(),
                    file: None,
                    line: None,
                    snippet: None,
                },
            ],
        };
        prompt.print_candidate(&candidate).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("shell-helper"));
        assert!(text.contains("Downloads and executes a script at scripts/setup.sh:3"));
        assert!(text.contains("[low] Broad file access"));
    }
}
