use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::backend::{
    ClusterAssignment, ClusterRequest, ClusteringBackend, RenderRequest, RenderingBackend,
    SubLineageBackend, SubLineageRequest,
};
use crate::error::{PipelineError, Result};

/// Captured result of one collaborator invocation.
#[derive(Debug)]
struct CommandOutput {
    stdout: String,
}

/// Drives collaborators as external programs.
///
/// Each call runs `sh -c <command>` with the JSON-encoded request on stdin.
/// The clustering command must print a JSON [`ClusterAssignment`] on stdout.
/// A non-zero exit status fails the call with the captured stderr.
#[derive(Debug, Clone, Default)]
pub struct CommandBackend {
    pub cluster_cmd: String,
    pub render_cmd: String,
    pub sublineage_cmd: Option<String>,
}

impl CommandBackend {
    pub fn new(cluster_cmd: impl Into<String>, render_cmd: impl Into<String>) -> Self {
        Self {
            cluster_cmd: cluster_cmd.into(),
            render_cmd: render_cmd.into(),
            sublineage_cmd: None,
        }
    }

    pub fn with_sublineage_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.sublineage_cmd = Some(cmd.into());
        self
    }

    async fn invoke<R: Serialize>(
        command: &str,
        request: &R,
    ) -> std::result::Result<CommandOutput, String> {
        tracing::info!(command, "Invoking collaborator");
        let payload = serde_json::to_vec(request).map_err(|e| e.to_string())?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| e.to_string())?;

        // Feed stdin while output is drained, or a chatty command can fill
        // its pipe before reading its input
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Commands are free to ignore their input
                match stdin.write_all(&payload).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| e.to_string())?;
        fed.map_err(|e| e.to_string())?;
        Self::process_output(output)
    }

    fn process_output(output: std::process::Output) -> std::result::Result<CommandOutput, String> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout })
        } else if stderr.trim().is_empty() {
            Err(format!("Exit code: {:?}", output.status.code()))
        } else {
            Err(stderr.trim().to_string())
        }
    }
}

#[async_trait]
impl ClusteringBackend for CommandBackend {
    async fn assign(&self, request: ClusterRequest) -> Result<ClusterAssignment> {
        let output = Self::invoke(&self.cluster_cmd, &request)
            .await
            .map_err(PipelineError::Clustering)?;
        serde_json::from_str(&output.stdout)
            .map_err(|e| PipelineError::Clustering(format!("malformed assignment output: {}", e)))
    }
}

#[async_trait]
impl RenderingBackend for CommandBackend {
    async fn render(&self, request: RenderRequest) -> Result<()> {
        Self::invoke(&self.render_cmd, &request)
            .await
            .map(|_| ())
            .map_err(PipelineError::Rendering)
    }
}

#[async_trait]
impl SubLineageBackend for CommandBackend {
    async fn assign_sublineages(&self, request: SubLineageRequest) -> Result<()> {
        let cmd = self.sublineage_cmd.as_deref().ok_or_else(|| {
            PipelineError::Configuration("no sub-lineage command configured".to_string())
        })?;
        Self::invoke(cmd, &request)
            .await
            .map(|_| ())
            .map_err(PipelineError::Clustering)
    }
}
