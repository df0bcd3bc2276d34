// ABOUTME: Docker provider implementation for per-project sandboxes
// ABOUTME: Uses bollard to run locked-down long-lived containers and exec cell runs inside them

use super::{
    BoundedBuffer, ContainerSpec, ContainerSummary, ExecOutput, ExecRequest, ProviderError,
    Result, SandboxProvider, MANAGED_LABEL, PROJECT_LABEL,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct DockerProvider {
    client: Docker,
    /// Images already known to be present locally
    image_cache: Arc<RwLock<HashSet<String>>>,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the local daemon with the default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            image_cache: Arc::new(RwLock::new(HashSet::new())),
            pull_timeout: timeout,
        }
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(PROJECT_LABEL.to_string(), spec.project_id.clone());

        let memory = (spec.limits.memory_mb * 1024 * 1024) as i64;

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:/workspace:rw",
                spec.workspace.to_string_lossy()
            )]),
            memory: Some(memory),
            // Same as memory: no swap on top of the ceiling
            memory_swap: Some(memory),
            nano_cpus: Some((spec.limits.cpu_cores * 1_000_000_000.0) as i64),
            pids_limit: Some(spec.limits.pids_limit),
            network_mode: Some(spec.limits.network_mode.clone()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some("/workspace".to_string()),
            env: Some(vec![
                "PYTHONUNBUFFERED=1".to_string(),
                "MPLBACKEND=Agg".to_string(),
                "HOME=/workspace".to_string(),
            ]),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_cache.read().await.contains(image) {
            return Ok(());
        }

        if !self.image_exists(image).await? {
            self.pull_image(image).await?;
        }

        self.image_cache.write().await.insert(image.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating container: {}", spec.name);

        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Don't leave a created-but-stopped container behind
            if let Err(remove_err) = self.remove_container(&container.id).await {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    container.id, remove_err
                );
            }
            return Err(ProviderError::ContainerError(e.to_string()));
        }

        Ok(container.id)
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        info!("Removing container: {}", container_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already gone", container_id);
                Ok(())
            }
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                let name = container
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let project_id = container
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(PROJECT_LABEL).cloned());

                Some(ContainerSummary {
                    id,
                    name,
                    project_id,
                    state: container.state.unwrap_or_else(|| "unknown".to_string()),
                    created: container
                        .created
                        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
                })
            })
            .collect())
    }

    async fn exec(&self, container_id: &str, request: ExecRequest) -> Result<ExecOutput> {
        debug!(
            "Executing command in container {}: {:?}",
            container_id, request.cmd
        );

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec_config = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: request.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?;

        let mut stdout = BoundedBuffer::new(request.max_output_bytes);
        let mut stderr = BoundedBuffer::new(request.max_output_bytes);

        let mut output = match start_result {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(ProviderError::ExecError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let drain = async {
            while let Some(msg) = output.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        stdout.push(&message)
                    }
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Exec stream error in container {}: {}", container_id, e);
                        break;
                    }
                }
            }
        };

        let timed_out = match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline, drain).await.is_err(),
            None => {
                drain.await;
                false
            }
        };

        let exit_code = if timed_out {
            None
        } else {
            self.client
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| ProviderError::ExecError(e.to_string()))?
                .exit_code
        };

        let truncated = stdout.is_truncated() || stderr.is_truncated();
        Ok(ExecOutput {
            exit_code,
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            timed_out,
            truncated,
        })
    }
}
