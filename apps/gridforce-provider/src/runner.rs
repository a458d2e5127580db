use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::{ClientVersion, Docker};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

const DOCKER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("invalid docker API version {0:?} (expected MAJOR.MINOR)")]
    InvalidApiVersion(String),
}

/// Executes one job and returns its standard output.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, image: &str, cmd: &[String]) -> Result<String, RunnerError>;
}

/// Runs jobs as throwaway containers on the local Docker daemon.
pub struct DockerRunner {
    docker: Docker,
}

impl DockerRunner {
    /// Connects to the local daemon. With an explicit `api_version` the
    /// client is pinned to it, otherwise the version is negotiated.
    pub async fn connect(api_version: Option<&str>) -> Result<Self, RunnerError> {
        let docker = match api_version {
            Some(version) => {
                let version = parse_api_version(version)?;
                let socket = std::env::var("DOCKER_HOST")
                    .ok()
                    .and_then(|host| host.strip_prefix("unix://").map(str::to_owned))
                    .unwrap_or_else(|| DEFAULT_SOCKET.to_string());
                Docker::connect_with_socket(&socket, DOCKER_TIMEOUT_SECS, &version)?
            }
            None => Docker::connect_with_local_defaults()?.negotiate_version().await?,
        };
        Ok(Self { docker })
    }

    async fn pull(&self, image: &str) -> Result<(), RunnerError> {
        info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            let update = update?;
            debug!(image, status = ?update.status, "pull progress");
        }
        Ok(())
    }

    async fn execute(&self, container_id: &str) -> Result<String, RunnerError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await?;

        let mut wait = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);
        while let Some(status) = wait.next().await {
            match status {
                Ok(exit) => debug!(container_id, code = exit.status_code, "container exited"),
                // Non-zero exit; logs are still collected.
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    debug!(container_id, code, "container exited with failure")
                }
                Err(err) => return Err(err.into()),
            }
        }

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(container_id, Some(options));
        let mut stdout = Vec::new();
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.extend_from_slice(&message)
                }
                LogOutput::StdErr { .. } | LogOutput::StdIn { .. } => {}
            }
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

#[async_trait]
impl JobRunner for DockerRunner {
    async fn run(&self, image: &str, cmd: &[String]) -> Result<String, RunnerError> {
        self.pull(image).await?;

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        let container_id = created.id;

        let output = self.execute(&container_id).await;

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(err) = self
            .docker
            .remove_container(&container_id, Some(remove))
            .await
        {
            warn!(container_id = %container_id, error = %err, "failed to remove container");
        }
        output
    }
}

fn parse_api_version(value: &str) -> Result<ClientVersion, RunnerError> {
    let invalid = || RunnerError::InvalidApiVersion(value.to_string());
    let (major, minor) = value
        .trim()
        .trim_start_matches('v')
        .split_once('.')
        .ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}
