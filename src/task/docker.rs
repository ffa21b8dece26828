use std::collections::HashMap;

use bollard::{
    container::{
        CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    secret::{ContainerInspectResponse, HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures_util::stream::StreamExt;
use tracing::{debug, error, info};

use super::types::{Config, DockerError, DockerResult, PortBinding};

/// Thin adapter over the local Docker daemon. One client is built per task
/// operation from that task's config, mirroring how the run loop drives it.
#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
    pub config: Config,
}

impl DockerClient {
    pub fn new(config: Config) -> Result<Self, DockerError> {
        let client = Docker::connect_with_unix_defaults()
            .map_err(|e| DockerError::Client(e.to_string()))?;
        Ok(DockerClient { client, config })
    }

    async fn pull_image(&self) -> Result<(), DockerError> {
        info!(image = %self.config.image, "pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: self.config.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %self.config.image, %status, "pull progress");
                    }
                }
                Err(e) => return Err(DockerError::ImagePull(e.to_string())),
            }
        }

        info!(image = %self.config.image, "image pulled");
        Ok(())
    }

    /// Pull the image, create the container, and start it.
    pub async fn run(&self) -> DockerResult {
        if let Err(e) = self.pull_image().await {
            error!(image = %self.config.image, error = %e, "image pull failed");
            return DockerResult::with_error(e);
        }

        let restart_policy = RestartPolicy {
            name: Some(match self.config.restart_policy.as_str() {
                "always" => RestartPolicyNameEnum::ALWAYS,
                "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
                "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
                _ => RestartPolicyNameEnum::NO,
            }),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            memory: Some(self.config.memory),
            nano_cpus: Some((self.config.cpu * 1_000_000_000.0) as i64),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let container_config = bollard::container::Config {
            image: Some(self.config.image.clone()),
            env: Some(self.config.env.clone()),
            exposed_ports: Some(
                self.config
                    .exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: self.config.name.clone(),
            ..Default::default()
        });

        let container_id = match self.client.create_container(options, container_config).await {
            Ok(resp) => resp.id,
            Err(e) => {
                error!(name = %self.config.name, error = %e, "container creation failed");
                return DockerResult::with_error(DockerError::ContainerCreation(e.to_string()));
            }
        };

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            error!(%container_id, error = %e, "container start failed");
            return DockerResult::with_error(DockerError::ContainerStart(e.to_string()));
        }

        info!(%container_id, name = %self.config.name, "container started");
        DockerResult::success(container_id, "start", "success")
    }

    /// Stop the container, then remove it along with its volumes.
    pub async fn stop(&self, container_id: &str) -> DockerResult {
        info!(%container_id, "stopping container");

        if let Err(e) = self
            .client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
        {
            error!(%container_id, error = %e, "container stop failed");
            return DockerResult::with_error(DockerError::ContainerStop(e.to_string()));
        }

        if let Err(e) = self
            .client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            error!(%container_id, error = %e, "container remove failed");
            return DockerResult::with_error(DockerError::ContainerRemove(e.to_string()));
        }

        info!(%container_id, "container stopped and removed");
        DockerResult::success(container_id.to_string(), "stop", "success")
    }

    pub async fn inspect(&self, container_id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DockerError::ContainerInspect(e.to_string()))
    }
}

/// Extract the host-side port bindings the daemon reported for a running
/// container. Empty until the container is up and inspect has succeeded.
pub fn host_ports_from_inspect(
    resp: &ContainerInspectResponse,
) -> HashMap<String, Vec<PortBinding>> {
    let Some(ports) = resp
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
    else {
        return HashMap::new();
    };

    ports
        .iter()
        .map(|(port, bindings)| {
            let bound = bindings
                .iter()
                .flatten()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.clone().unwrap_or_default(),
                    host_port: b.host_port.clone().unwrap_or_default(),
                })
                .collect();
            (port.clone(), bound)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::secret::NetworkSettings;

    #[test]
    fn host_ports_empty_without_network_settings() {
        let resp = ContainerInspectResponse::default();
        assert!(host_ports_from_inspect(&resp).is_empty());
    }

    #[test]
    fn host_ports_extracted_from_port_map() {
        let mut ports = HashMap::new();
        ports.insert(
            "80/tcp".to_string(),
            Some(vec![bollard::secret::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("49153".to_string()),
            }]),
        );
        ports.insert("443/tcp".to_string(), None);

        let resp = ContainerInspectResponse {
            network_settings: Some(NetworkSettings {
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        };

        let host_ports = host_ports_from_inspect(&resp);
        assert_eq!(host_ports["80/tcp"][0].host_port, "49153");
        assert!(host_ports["443/tcp"].is_empty());
    }
}
