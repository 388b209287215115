use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};

/// Kubernetes client factory
pub struct KubeClient {
    context: Option<String>,
}

impl KubeClient {
    /// Use the given kubeconfig context, or infer the configuration when `None`
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }

    /// Create a kube::Client
    ///
    /// Without an explicit context the in-cluster service account is tried
    /// first, then the local kubeconfig.
    pub async fn connect(&self) -> Result<kube::Client> {
        let config = match &self.context {
            Some(context_name) => {
                let kubeconfig = Kubeconfig::read()
                    .context("Failed to read kubeconfig. Is kubectl configured?")?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: Some(context_name.clone()),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context_name
                ))?
            }
            None => kube::Config::infer()
                .await
                .context("Failed to infer cluster config (in-cluster or kubeconfig)")?,
        };

        let client = kube::Client::try_from(config).context("Failed to create client")?;
        Self::validate_client(&client).await?;

        tracing::info!(context = ?self.context, "connected to cluster");
        Ok(client)
    }

    /// Validate that the client can make API calls before the agent starts
    async fn validate_client(client: &kube::Client) -> Result<()> {
        let pods: Api<Pod> = Api::all(client.clone());
        // Just try to list with limit 1 to validate auth
        pods.list(&ListParams::default().limit(1))
            .await
            .context("Cluster API is not reachable with the configured credentials")?;
        Ok(())
    }
}
