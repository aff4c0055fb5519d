//! Byte channels to tool servers, and the [`Launcher`] seam that creates them.

use crate::descriptor::ServerDescriptor;
use async_trait::async_trait;
use helmsman_core::RegistryError;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// The two halves of a connection, plus the child process if there is one.
pub struct Transport {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub child: Option<Child>,
}

impl Transport {
    /// A transport with no backing process (in-process servers, tests).
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

/// Turns a descriptor into a live transport.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<Transport, RegistryError>;
}

/// Spawns the descriptor's command as a child process with piped stdio.
///
/// The child's stderr is forwarded to the log at debug level.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<Transport, RegistryError> {
        info!(
            server = %descriptor.name,
            command = %descriptor.command_line(),
            "Spawning tool server"
        );

        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RegistryError::Spawn {
            server: descriptor.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| RegistryError::Spawn {
            server: descriptor.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RegistryError::Spawn {
            server: descriptor.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let server = descriptor.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {line}");
                }
            });
        }

        Ok(Transport {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}
