//! Docker implementation of the container runtime interface.
//!
//! Talks to a Docker-compatible daemon over its UNIX socket (or whatever
//! `DOCKER_HOST` points at). Listing is restricted to running containers;
//! the event stream is restricted to container-typed events and the caller
//! filters actions.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::SherpaError;
use crate::source::{ContainerEvent, ContainerInfo, ContainerNetwork, ContainerRuntime};

/// Container runtime backed by a Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (UNIX socket or `DOCKER_HOST`) and
    /// verify the daemon answers.
    pub async fn connect() -> Result<Self, SherpaError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        debug!("connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SherpaError> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else {
                warn!("container summary without id, skipping");
                continue;
            };
            let name = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());

            let mut networks: Vec<ContainerNetwork> = summary
                .network_settings
                .and_then(|settings| settings.networks)
                .unwrap_or_default()
                .into_iter()
                .map(|(network_name, endpoint)| ContainerNetwork {
                    name: network_name,
                    ipv4: endpoint
                        .ip_address
                        .as_deref()
                        .filter(|ip| !ip.is_empty())
                        .and_then(|ip| ip.parse().ok()),
                })
                .collect();
            // Docker reports networks as a map; keep a stable order.
            networks.sort_by(|a, b| a.name.cmp(&b.name));

            containers.push(ContainerInfo {
                id,
                name,
                labels: summary.labels.unwrap_or_default(),
                networks,
            });
        }

        debug!(count = containers.len(), "listed running containers");
        Ok(containers)
    }

    async fn subscribe_events<'a>(
        &'a self,
    ) -> Result<BoxStream<'a, Result<ContainerEvent, SherpaError>>, SherpaError> {
        // Fail fast when the daemon is unreachable instead of handing the
        // caller a stream that errors on first poll.
        self.docker.ping().await?;

        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        let stream = self
            .docker
            .events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }))
            .map(|item| {
                item.map(|message| ContainerEvent {
                    id: message
                        .actor
                        .and_then(|actor| actor.id)
                        .unwrap_or_default(),
                    action: message.action.as_deref().unwrap_or_default().into(),
                })
                .map_err(SherpaError::from)
            })
            .boxed();

        Ok(stream)
    }
}
