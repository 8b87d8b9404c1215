use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    secret::{HostConfig, PortMap, RestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::runtime::Runtime;
use super::types::{Config, RunOutput, RuntimeError};

const UNIX_SOCKET_TIMEOUT_SECS: u64 = 120;

/// Docker engine client backing the worker's [`Runtime`].
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
}

impl DockerClient {
    /// Connects to `socket` when given, otherwise to the platform default.
    pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        let client = match socket {
            Some(path) => {
                Docker::connect_with_unix(path, UNIX_SOCKET_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        Ok(DockerClient { client })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (repository, tag) = split_image_reference(image);
        info!(image, repository, tag, "pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: repository.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image, %status, "pull progress");
                    }
                }
                Err(e) => {
                    error!(image, error = %e, "error pulling image");
                    return Err(RuntimeError::ImagePull {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn host_port(
        &self,
        container_id: &str,
        exposed_ports: &[String],
    ) -> Result<u16, RuntimeError> {
        let inspected = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Inspect {
                container_id: container_id.to_string(),
                message: e.to_string(),
            })?;

        let ports = inspected.network_settings.and_then(|n| n.ports);
        published_port(ports.as_ref(), exposed_ports).map_err(|message| RuntimeError::Inspect {
            container_id: container_id.to_string(),
            message,
        })
    }

    /// Best-effort removal of a container whose start could not be
    /// completed; the caller never receives its id.
    async fn discard(&self, container_id: &str) {
        warn!(container_id, "discarding container after failed start");
        if let Err(e) = Runtime::remove(self, container_id).await {
            error!(container_id, error = %e, "failed to discard container");
        }
    }

    fn container_config(config: &Config) -> ContainerConfig<String> {
        let host_config = HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(restart_policy_name(&config.restart_policy)),
                maximum_retry_count: None,
            }),
            nano_cpus: (config.cpu > 0.0).then(|| (config.cpu * 1_000_000_000.0) as i64),
            memory: (config.memory > 0).then_some(config.memory),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        ContainerConfig {
            image: Some(config.image.clone()),
            tty: Some(false),
            env: Some(config.env.clone()),
            exposed_ports: Some(
                config
                    .exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Runtime for DockerClient {
    async fn run(&self, config: &Config) -> Result<RunOutput, RuntimeError> {
        self.pull_image(&config.image).await?;

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let container_id = match self
            .client
            .create_container(options, Self::container_config(config))
            .await
        {
            Ok(resp) => resp.id,
            Err(e) => {
                error!(image = %config.image, error = %e, "error creating container");
                return Err(RuntimeError::Create {
                    image: config.image.clone(),
                    message: e.to_string(),
                });
            }
        };
        debug!(%container_id, "container created");

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            error!(%container_id, error = %e, "error starting container");
            return Err(RuntimeError::Start {
                container_id,
                message: e.to_string(),
            });
        }

        let port = match self.host_port(&container_id, &config.exposed_ports).await {
            Ok(port) => port,
            Err(e) => {
                self.discard(&container_id).await;
                return Err(e);
            }
        };

        info!(%container_id, port, name = %config.name, "container started");
        Ok(RunOutput { container_id, port })
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        info!(container_id, "stopping container");

        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Stop {
                container_id: container_id.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    force: false,
                    link: false,
                }),
            )
            .await
            .map_err(|e| RuntimeError::Remove {
                container_id: container_id.to_string(),
                message: e.to_string(),
            })?;

        info!(container_id, "container stopped and removed");
        Ok(())
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    }
}

/// Splits `repo[:tag][@digest]` into the repository and the tag or digest
/// to pull. An untagged reference means `latest`, never "all tags".
fn split_image_reference(image: &str) -> (&str, &str) {
    let (named, digest) = match image.split_once('@') {
        Some((named, digest)) => (named, Some(digest)),
        None => (image, None),
    };

    // a colon before the last slash belongs to a registry host:port
    let name_start = named.rfind('/').map_or(0, |i| i + 1);
    let (repository, tag) = match named[name_start..].rfind(':') {
        Some(i) => (&named[..name_start + i], &named[name_start + i + 1..]),
        None => (named, "latest"),
    };

    (repository, digest.unwrap_or(tag))
}

/// Host port bound to the first exposed container port.
fn published_port(ports: Option<&PortMap>, exposed_ports: &[String]) -> Result<u16, String> {
    let Some(exposed) = exposed_ports.first() else {
        return Ok(0);
    };

    let host_port = ports
        .and_then(|ports| ports.get(exposed))
        .and_then(|bindings| bindings.as_ref())
        .and_then(|bindings| bindings.iter().find_map(|b| b.host_port.as_deref()));

    match host_port {
        Some(port) => port
            .parse()
            .map_err(|e| format!("invalid host port {port:?} for {exposed}: {e}")),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use bollard::secret::PortBinding;

    use super::*;

    fn binding(host_port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(host_port.to_string()),
        }
    }

    #[test]
    fn no_exposed_ports_means_port_zero() {
        assert_eq!(published_port(None, &[]), Ok(0));
    }

    #[test]
    fn reads_first_binding_of_first_exposed_port() {
        let mut ports = PortMap::new();
        ports.insert("80/tcp".to_string(), Some(vec![binding("32768"), binding("32769")]));
        ports.insert("443/tcp".to_string(), Some(vec![binding("32770")]));

        let exposed = vec!["80/tcp".to_string(), "443/tcp".to_string()];
        assert_eq!(published_port(Some(&ports), &exposed), Ok(32768));
    }

    #[test]
    fn unbound_port_is_zero() {
        let mut ports = PortMap::new();
        ports.insert("80/tcp".to_string(), None);

        assert_eq!(published_port(Some(&ports), &["80/tcp".to_string()]), Ok(0));
    }

    #[test]
    fn garbage_host_port_is_an_error() {
        let mut ports = PortMap::new();
        ports.insert("80/tcp".to_string(), Some(vec![binding("http")]));

        assert!(published_port(Some(&ports), &["80/tcp".to_string()]).is_err());
    }

    #[test]
    fn restart_policy_defaults_to_no() {
        assert_eq!(restart_policy_name(""), RestartPolicyNameEnum::NO);
        assert_eq!(restart_policy_name("bogus"), RestartPolicyNameEnum::NO);
        assert_eq!(restart_policy_name("always"), RestartPolicyNameEnum::ALWAYS);
        assert_eq!(
            restart_policy_name("unless-stopped"),
            RestartPolicyNameEnum::UNLESS_STOPPED
        );
    }

    #[test]
    fn container_config_publishes_ports_and_limits() {
        let config = Config {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            cpu: 1.5,
            memory: 128,
            exposed_ports: vec!["80/tcp".to_string()],
            ..Default::default()
        };

        let container = DockerClient::container_config(&config);
        let host = container.host_config.unwrap();
        assert_eq!(container.image.as_deref(), Some("nginx:latest"));
        assert!(container.exposed_ports.unwrap().contains_key("80/tcp"));
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.memory, Some(128));
        assert_eq!(host.publish_all_ports, Some(true));
    }

    #[test]
    fn untagged_image_pulls_latest() {
        assert_eq!(split_image_reference("nginx"), ("nginx", "latest"));
        assert_eq!(split_image_reference("library/img"), ("library/img", "latest"));
    }

    #[test]
    fn explicit_tag_is_kept() {
        assert_eq!(split_image_reference("postgres:13"), ("postgres", "13"));
        assert_eq!(
            split_image_reference("ghcr.io/cube/web:1.2.3"),
            ("ghcr.io/cube/web", "1.2.3")
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(
            split_image_reference("localhost:5000/cube/web"),
            ("localhost:5000/cube/web", "latest")
        );
        assert_eq!(
            split_image_reference("localhost:5000/cube/web:dev"),
            ("localhost:5000/cube/web", "dev")
        );
    }

    #[test]
    fn digest_wins_over_tag() {
        let digest = "sha256:0123456789abcdef";
        assert_eq!(
            split_image_reference(&format!("nginx@{digest}")),
            ("nginx", digest)
        );
        assert_eq!(
            split_image_reference(&format!("localhost:5000/nginx:1.25@{digest}")),
            ("localhost:5000/nginx", digest)
        );
    }

    #[tokio::test]
    async fn failed_inspect_reports_inspect_error_even_if_discard_fails() {
        // nothing listens on port 1, so both inspect and cleanup fail
        let client =
            Docker::connect_with_http("http://127.0.0.1:1", 1, API_DEFAULT_VERSION).unwrap();
        let docker = DockerClient { client };

        let err = docker
            .host_port("c1", &["80/tcp".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Inspect { ref container_id, .. } if container_id == "c1"));

        // cleanup swallows its own failure
        docker.discard("c1").await;
    }
}
