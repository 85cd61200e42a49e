pub mod annotations;
pub mod artifact_writer;
pub(crate) mod controller_ctx;
pub mod event_mapper;
pub mod events;
pub mod health;
pub mod leader_selector;
pub mod metrics;
pub mod pod_index;
pub mod port_resolver;
pub mod reconciler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    KubeError(#[from] kube::Error),

    #[error("Watcher Error: {0}")]
    WatcherError(#[from] kube::runtime::watcher::Error),

    #[error("port resolution failed: {0}")]
    PortResolution(#[from] port_resolver::PortResolutionError),

    #[error("refusing to write {kind} {name}: owned by a different controller")]
    OwnershipConflict { kind: &'static str, name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
