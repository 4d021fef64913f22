use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::app::ports::ObjectDetector;
use crate::config::CommandConfig;
use crate::domain::Detection;

/// A configured external program, run to completion.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    config: CommandConfig,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExternalCommand {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn program(&self) -> &str {
        &self.config.program
    }

    /// Run with the configured args followed by `extra_args`.
    ///
    /// A non-zero exit is an error carrying the program's stderr as written.
    pub async fn run<S: AsRef<OsStr>>(&self, extra_args: &[S]) -> Result<CommandOutput, String> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args).args(extra_args).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        debug!(program = %self.config.program, args = ?self.config.args, "Running external command");

        let output = cmd
            .output()
            .await
            .map_err(|e| format!("failed to start '{}': {}", self.config.program, e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let stderr = stderr.trim_end();
            return Err(if stderr.is_empty() {
                format!("'{}' exited with {}", self.config.program, output.status)
            } else {
                stderr.to_string()
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Object detector that shells out to a model runner.
///
/// The image path is appended to the configured arguments; the program prints a
/// JSON array of `{"label", "confidence"}` objects on stdout.
pub struct CommandDetector {
    command: ExternalCommand,
}

impl CommandDetector {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            command: ExternalCommand::new(config),
        }
    }
}

#[async_trait]
impl ObjectDetector for CommandDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<Detection>, String> {
        let output = self.command.run(&[image_path]).await?;
        serde_json::from_str(output.stdout.trim())
            .map_err(|e| format!("invalid detector output: {}", e))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandConfig {
        CommandConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into()],
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn test_detector_parses_stdout() {
        let detector = CommandDetector::new(sh(
            r#"printf '[{"label":"person","confidence":0.9},{"label":"%s","confidence":0.5}]' "$(basename "$1" .jpg)""#,
        ));
        let detections = detector.detect(Path::new("/tmp/images/alpha/cup.jpg")).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[1].label, "cup");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let cmd = ExternalCommand::new(sh("echo 'model not found' >&2; exit 3"));
        let err = cmd.run::<&str>(&[]).await.unwrap_err();
        assert_eq!(err, "model not found");
    }

    #[tokio::test]
    async fn test_garbage_output_is_an_error() {
        let detector = CommandDetector::new(sh("echo not-json"));
        let err = detector.detect(Path::new("x.jpg")).await.unwrap_err();
        assert!(err.starts_with("invalid detector output"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cmd = ExternalCommand::new(CommandConfig {
            program: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            working_dir: None,
        });
        assert!(cmd.run::<&str>(&[]).await.unwrap_err().starts_with("failed to start"));
    }
}
