//! Evaluation engine adapter
//!
//! The worker never interprets scan points itself; it hands each one to an
//! `Evaluator` and ships back whatever channels come out.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{EvaluatorConfig, OutputFormat};
use crate::domain::{ScanPoint, ScanResult};
use crate::error::{Result, ScanError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate one scan point into its output channels.
    async fn evaluate(&self, point: &ScanPoint) -> Result<ScanResult>;
}

/// Runs an external program once per scan point
///
/// The point is written to the program's stdin. In `raw` mode stdout becomes
/// the payload of `output_channel`; in `json` mode stdout must be a JSON
/// object mapping channel names to string payloads.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
    output_channel: String,
    output_format: OutputFormat,
    timeout: Option<Duration>,
}

impl CommandEvaluator {
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| ScanError::InvalidConfig("evaluator.command is empty".into()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            output_channel: config.output_channel.clone(),
            output_format: config.output_format,
            timeout: config.timeout(),
        })
    }

    fn parse_output(&self, stdout: Vec<u8>) -> Result<ScanResult> {
        match self.output_format {
            OutputFormat::Raw => Ok(ScanResult::single(self.output_channel.clone(), stdout)),
            OutputFormat::Json => {
                let channels: serde_json::Map<String, Value> = serde_json::from_slice(&stdout)?;
                channels
                    .into_iter()
                    .map(|(name, value)| match value {
                        Value::String(text) => Ok((name, text.into_bytes())),
                        other => Err(ScanError::Evaluation(format!(
                            "channel {} is not a string: {}",
                            name, other
                        ))),
                    })
                    .collect()
            }
        }
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(&self, point: &ScanPoint) -> Result<ScanResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ScanError::Evaluation(format!("failed to spawn {}: {}", self.program, e))
        })?;

        // Fed from its own task so a program that writes before it finishes
        // reading cannot stall on a full stdout pipe
        let writer = child.stdin.take().map(|mut stdin| {
            let input = point.as_bytes().to_vec();
            tokio::spawn(async move { stdin.write_all(&input).await })
        });

        let output = match self.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    ScanError::Timeout(format!(
                        "{} did not finish within {}ms",
                        self.program,
                        limit.as_millis()
                    ))
                })??,
            None => child.wait_with_output().await?,
        };

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The program may exit without reading all of its input
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(ScanError::Evaluation(format!(
                        "failed to write scan point: {}",
                        e
                    )))
                }
                Err(e) => {
                    return Err(ScanError::Evaluation(format!(
                        "scan point writer failed: {}",
                        e
                    )))
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::Evaluation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!("{} produced {} bytes", self.program, output.stdout.len());
        self.parse_output(output.stdout)
    }
}

/// Collect results for a whole batch, stopping at the first failure.
pub async fn evaluate_all<E>(evaluator: &E, points: &[ScanPoint]) -> Result<Vec<ScanResult>>
where
    E: Evaluator + ?Sized,
{
    let mut results = Vec::with_capacity(points.len());
    for point in points {
        results.push(evaluator.evaluate(point).await?);
    }
    Ok(results)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, format: OutputFormat) -> CommandEvaluator {
        CommandEvaluator::from_config(&EvaluatorConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            output_channel: "trace.dat".into(),
            output_format: format,
            timeout_ms: 5_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_raw_output_becomes_one_channel() {
        let evaluator = shell("cat", OutputFormat::Raw);
        let result = evaluator.evaluate(&ScanPoint::new("x = 1.5\n")).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("trace.dat"), Some(&b"x = 1.5\n"[..]));
    }

    #[tokio::test]
    async fn test_output_larger_than_pipe_buffer_while_input_is_unread() {
        // Writes a full pipe's worth of output before touching stdin
        let evaluator = shell("head -c 200000 /dev/zero; cat > /dev/null", OutputFormat::Raw);
        let point = ScanPoint::new("x".repeat(200_000));
        let result = evaluator.evaluate(&point).await.unwrap();
        assert_eq!(result.get("trace.dat").map(<[u8]>::len), Some(200_000));
    }

    #[tokio::test]
    async fn test_program_ignoring_stdin_still_succeeds() {
        let evaluator = shell("echo done", OutputFormat::Raw);
        let point = ScanPoint::new("y".repeat(200_000));
        let result = evaluator.evaluate(&point).await.unwrap();
        assert_eq!(result.get("trace.dat"), Some(&b"done\n"[..]));
    }

    #[tokio::test]
    async fn test_json_output_maps_channels() {
        let evaluator = shell(
            r#"cat > /dev/null; printf '{"a.dat": "1\\n", "sub/b.txt": "2"}'"#,
            OutputFormat::Json,
        );
        let result = evaluator.evaluate(&ScanPoint::new("x = 0.0\n")).await.unwrap();
        assert_eq!(result.get("a.dat"), Some(&b"1\n"[..]));
        assert_eq!(result.get("sub/b.txt"), Some(&b"2"[..]));
    }

    #[tokio::test]
    async fn test_non_string_channel_is_rejected() {
        let evaluator = shell(r#"cat > /dev/null; echo '{"a.dat": 3}'"#, OutputFormat::Json);
        let err = evaluator.evaluate(&ScanPoint::new("x\n")).await.unwrap_err();
        assert!(matches!(err, ScanError::Evaluation(_)));
    }

    #[tokio::test]
    async fn test_failing_program_is_an_error() {
        let evaluator = shell("cat > /dev/null; echo boom >&2; exit 3", OutputFormat::Raw);
        let err = evaluator.evaluate(&ScanPoint::new("x\n")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_slow_program_times_out() {
        let mut evaluator = shell("sleep 5", OutputFormat::Raw);
        evaluator.timeout = Some(Duration::from_millis(50));
        let err = evaluator.evaluate(&ScanPoint::new("x\n")).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout(_)));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let config = EvaluatorConfig {
            command: Vec::new(),
            ..EvaluatorConfig::default()
        };
        assert!(CommandEvaluator::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_evaluate_all_keeps_order() {
        let mut mock = MockEvaluator::new();
        mock.expect_evaluate()
            .times(3)
            .returning(|p| Ok(ScanResult::single("echo.dat", p.as_bytes().to_vec())));

        let points: Vec<_> = ["a\n", "b\n", "c\n"].into_iter().map(ScanPoint::from).collect();
        let results = evaluate_all(&mock, &points).await.unwrap();
        let payloads: Vec<_> = results.iter().map(|r| r.get("echo.dat").unwrap()).collect();
        assert_eq!(payloads, vec![&b"a\n"[..], &b"b\n"[..], &b"c\n"[..]]);
    }
}
