//! Constants shared by the controller: the annotation/label namespace this
//! system owns, and the defaults it falls back to when an override
//! annotation is absent or malformed.

/// Annotation/label namespace this system owns on Kubernetes objects.
pub const API_NAMESPACE: &str = "leaderslice.io";

/// Value written into the `managed-by` label on every object this system owns.
pub const MANAGED_BY_VALUE: &str = "leaderslice";

/// The platform's own label identifying which Service an EndpointSlice
/// belongs to. Not part of this system's namespace; it is the standard
/// Kubernetes label consumed by kube-proxy and other EndpointSlice readers.
pub const KUBERNETES_SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

pub const LABEL_MANAGED_BY: &str = "leaderslice.io/managed-by";
pub const LABEL_SOURCE_SERVICE: &str = "leaderslice.io/source-service";

pub const ANNOTATION_ENABLED: &str = "leaderslice.io/enabled";
pub const ANNOTATION_LEADER_SERVICE_NAME: &str = "leaderslice.io/leader-service-name";
pub const ANNOTATION_STICKY: &str = "leaderslice.io/sticky";
pub const ANNOTATION_MIN_READY_DURATION: &str = "leaderslice.io/min-ready-duration";

pub const ANNOTATION_LEADER_POD_NAME: &str = "leaderslice.io/leader-pod-name";
pub const ANNOTATION_LEADER_POD_UID: &str = "leaderslice.io/leader-pod-uid";
pub const ANNOTATION_LEADER_LAST_SWITCH_TIME: &str = "leaderslice.io/leader-last-switch-time";

/// Suffix appended to a source Service's name to derive the default leader
/// Service name, when `ANNOTATION_LEADER_SERVICE_NAME` is absent.
pub const DEFAULT_LEADER_SERVICE_SUFFIX: &str = "-leader";

/// GitOps bookkeeping keys stripped from labels/annotations copied onto the
/// leader Service, so this system never fights a continuous-delivery tool
/// over object identity metadata.
pub const GITOPS_LABEL_PREFIXES_TO_STRIP: &[&str] = &[
    "app.kubernetes.io/instance",
    "app.kubernetes.io/version",
    "app.kubernetes.io/part-of",
    "helm.sh/chart",
];
pub const GITOPS_ANNOTATION_PREFIXES_TO_STRIP: &[&str] = &[
    "argocd.argoproj.io/",
    "kubectl.kubernetes.io/last-applied-configuration",
    "fluxcd.io/",
];

pub const FIELD_MANAGER: &str = "leaderslice-controller";
