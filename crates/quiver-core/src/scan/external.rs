//! Subprocess-backed scanner.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::ScanConfig;
use crate::error::{PipelineError, Result};

use super::{Finding, ScanResult, SecurityScanner, Severity};

/// Runs `<command...> <dir>` and parses the JSON it prints.
#[derive(Debug, Clone)]
pub struct ExternalScanner {
    command: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    threats: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default, alias = "rule", alias = "id")]
    rule_id: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default, alias = "message", alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "path")]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    snippet: Option<String>,
}

impl ExternalScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Interpret scanner stdout.
    pub fn parse_report(name: &str, stdout: &str) -> Result<ScanResult> {
        let engine_error = |reason: String| PipelineError::ScanEngine {
            candidate: name.to_string(),
            reason,
        };

        let json = extract_json(stdout)
            .ok_or_else(|| engine_error("scanner printed no JSON report".to_string()))?;
        let raw: RawReport = serde_json::from_str(json)
            .map_err(|e| engine_error(format!("unreadable scanner report: {}", e)))?;

        if raw.status.as_deref() == Some("error") {
            return Err(engine_error(
                raw.error.unwrap_or_else(|| "scanner reported an error".to_string()),
            ));
        }

        let findings: Vec<Finding> = raw
            .findings
            .into_iter()
            .chain(raw.threats)
            .map(|f| Finding {
                severity: f
                    .severity
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(Severity::Medium),
                title: f.title.unwrap_or_else(|| "unnamed finding".to_string()),
                rule_id: f.rule_id,
                file: f.file,
                line: f.line,
                snippet: f.snippet,
            })
            .collect();

        let worst_finding = findings.iter().map(|f| f.severity).max();
        let severity = match raw.severity.as_deref() {
            Some(s) => s
                .parse::<Severity>()
                .map_err(|e| engine_error(e.to_string()))?,
            None => worst_finding.unwrap_or_default(),
        };

        Ok(ScanResult {
            severity: severity.max(worst_finding.unwrap_or_default()),
            findings,
        })
    }
}

#[async_trait]
impl SecurityScanner for ExternalScanner {
    async fn scan(&self, name: &str, dir: &Path) -> Result<ScanResult> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(PipelineError::ScanEngine {
                candidate: name.to_string(),
                reason: "no scanner command configured".to_string(),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| PipelineError::ScanEngine {
            candidate: name.to_string(),
            reason: format!("failed to start '{}': {}", program, e),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PipelineError::ScanEngine {
                    candidate: name.to_string(),
                    reason: format!("failed to wait for scanner: {}", e),
                });
            }
            Err(_) => {
                tracing::warn!(skill = name, secs = self.timeout.as_secs(), "Scanner timed out");
                return Err(PipelineError::Timeout {
                    operation: format!("security scan of {}", name),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        // Scanners commonly exit non-zero when they find threats, so the
        // report is authoritative whenever one was printed.
        let stdout = String::from_utf8_lossy(&output.stdout);
        match Self::parse_report(name, &stdout) {
            Ok(result) => {
                tracing::info!(skill = name, severity = %result.severity, findings = result.findings.len(), "Scan finished");
                Ok(result)
            }
            Err(err) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(PipelineError::ScanEngine {
                    candidate: name.to_string(),
                    reason: format!(
                        "scanner exited with {}: {} ({})",
                        output.status.code().unwrap_or(-1),
                        stderr.lines().last().unwrap_or("").trim(),
                        err
                    ),
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// The JSON object in `stdout`, tolerating log lines around it.
fn extract_json(stdout: &str) -> Option<&str> {
    let start = stdout.find('{')?;
    let end = stdout.rfind('}')?;
    (end > start).then(|| &stdout[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_report() {
        let result = ExternalScanner::parse_report(
            "pdf",
            r#"{"severity":"high","findings":[{"rule_id":"R1","severity":"high","title":"curl | sh","file":"run.sh","line":3}]}"#,
        )
        .unwrap();
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.findings[0].line, Some(3));
    }

    #[test]
    fn parses_threats_style_report_with_log_noise() {
        let stdout = "scanning...\n{\"status\":\"threat_found\",\"severity\":\"CRITICAL\",\"threats\":[{\"severity\":\"CRITICAL\",\"title\":\"exfiltration\"}]}\n";
        let result = ExternalScanner::parse_report("x", stdout).unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.findings.len(), 1);
    }

    #[test]
    fn safe_maps_to_info() {
        let result = ExternalScanner::parse_report("x", r#"{"status":"success","severity":"SAFE","threats":[]}"#).unwrap();
        assert_eq!(result, ScanResult::clean());
    }

    #[test]
    fn unknown_or_error_status_is_engine_error() {
        for report in [
            r#"{"status":"error","error":"engine missing","severity":"UNKNOWN"}"#,
            r#"{"severity":"UNKNOWN"}"#,
            "not json at all",
        ] {
            let err = ExternalScanner::parse_report("x", report).unwrap_err();
            assert!(matches!(err, PipelineError::ScanEngine { .. }), "{report}");
        }
    }

    #[test]
    fn overall_severity_is_at_least_worst_finding() {
        let result = ExternalScanner::parse_report(
            "x",
            r#"{"severity":"low","findings":[{"severity":"high","title":"t"}]}"#,
        )
        .unwrap();
        assert_eq!(result.severity, Severity::High);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_scanner_times_out() {
        let scanner = ExternalScanner {
            command: vec!["sh".into(), "-c".into(), "sleep 5".into(), "scan".into()],
            timeout: Duration::from_millis(200),
        };
        let err = scanner.scan("slow", Path::new(".")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_TIMEOUT);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scanner_exiting_nonzero_with_report_is_honoured() {
        let scanner = ExternalScanner {
            command: vec![
                "sh".into(),
                "-c".into(),
                r#"echo '{"severity":"medium","findings":[]}'; exit 1"#.into(),
                "scan".into(),
            ],
            timeout: Duration::from_secs(10),
        };
        let result = scanner.scan("m", Path::new(".")).await.unwrap();
        assert_eq!(result.severity, Severity::Medium);
    }
}
