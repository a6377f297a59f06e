//! Cluster credential discovery.

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::{debug, info, warn};

use crate::errors::{AgentError, Result};
use crate::settings::{ClusterConfigType, Settings};

/// Resolve the kube `Config` according to `CLUSTER_CONFIG_TYPE`.
///
/// `auto` tries the in-cluster service-account credentials first and falls
/// back to a kubeconfig; the explicit modes fail hard when their source is
/// unavailable.
pub async fn load_cluster_config(settings: &Settings) -> Result<Config> {
    let auto = settings.cluster_config_type == ClusterConfigType::Auto;
    if auto {
        info!("auto-detecting cluster configuration");
    }

    if auto || settings.cluster_config_type == ClusterConfigType::InCluster {
        debug!("trying to initialize in-cluster config");
        match Config::incluster() {
            Ok(config) => {
                info!("detected in-cluster configuration");
                return Ok(config);
            }
            Err(err) => {
                if auto {
                    warn!(error = %err, "could not initialize in-cluster config");
                } else {
                    return Err(AgentError::Config(format!(
                        "in-cluster config unavailable: {err}"
                    )));
                }
            }
        }
    }

    debug!("initializing out-of-cluster config");
    let options = KubeConfigOptions::default();
    let config = match &settings.kubeconfig_path {
        Some(path) => {
            debug!(path, "reading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|err| AgentError::Config(format!("cannot read kubeconfig: {err}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &options).await
        }
        None => {
            debug!("reading kubeconfig from the default location");
            Config::from_kubeconfig(&options).await
        }
    }
    .map_err(|err| AgentError::Config(format!("cannot initialize cluster config: {err}")))?;

    info!("detected out-of-cluster configuration");
    Ok(config)
}
