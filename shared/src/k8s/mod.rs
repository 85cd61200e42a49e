use kube::client::Client;

pub mod api;
pub mod pod;
pub mod service;

pub const ERROR_NOT_FOUND: u16 = 404;
pub const ERROR_CONFLICT: u16 = 409;

/// Thin wrapper around a `kube::Client`, kept as the concrete type behind
/// the mockable `IntoApi<T>`/`Api<T>` traits in [`api`].
#[derive(Clone)]
pub struct KubeImpl {
    client: kube::Client,
}

impl KubeImpl {
    /// Create a new instance of `KubeImpl` from the ambient kubeconfig/
    /// in-cluster config.
    pub async fn new() -> Result<Self, anyhow::Error> {
        Ok(KubeImpl {
            client: Client::try_default().await?,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}
