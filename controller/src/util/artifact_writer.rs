//! Applies the desired leader Service and EndpointSlice via server-side
//! apply, and reaps them on cleanup.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::Resource;
use kube::ResourceExt;
use leaderslice_shared::k8s::api::Api as ApiTrait;
use leaderslice_shared::retry::{retry_with_backoff, RetryPolicy};
use leaderslice_shared::system::{FIELD_MANAGER, LABEL_MANAGED_BY, LABEL_SOURCE_SERVICE, MANAGED_BY_VALUE};

use crate::util::{ControllerError, Result};

fn is_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
        // Transport-level errors (connection reset, timeouts) are always
        // worth a retry; only a well-formed API error rules one out.
        _ => true,
    }
}

/// Checks that `existing`, if present, is either absent or already owned by
/// this controller — refuses to clobber a foreign pre-existing object with
/// the same name (the `leader-service-name` collision open question).
fn check_ownership<T: kube::Resource>(existing: &Option<T>, kind: &'static str) -> Result<()> {
    if let Some(obj) = existing {
        let owned_by_us = obj
            .meta()
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_MANAGED_BY))
            .map(|v| v == MANAGED_BY_VALUE)
            .unwrap_or(false);
        if !owned_by_us {
            return Err(ControllerError::OwnershipConflict {
                kind,
                name: obj.meta().name.clone().unwrap_or_default(),
            });
        }
    }
    Ok(())
}

/// Applies (creates or updates) the leader Service via server-side apply,
/// refusing to overwrite a pre-existing object this controller doesn't own.
pub async fn apply_leader_service(
    api: &dyn ApiTrait<Service>,
    desired: Service,
    policy: RetryPolicy,
) -> Result<Service> {
    let name = desired.name_any();
    let existing = api.get(&name).await?;
    check_ownership(&existing, "Service")?;
    let applied = retry_with_backoff(policy, is_retryable, || {
        let desired = desired.clone();
        async move { api.apply(desired, FIELD_MANAGER).await }
    })
    .await?;
    Ok(applied)
}

/// Applies (creates or updates) the leader EndpointSlice.
pub async fn apply_leader_endpoint_slice(
    api: &dyn ApiTrait<EndpointSlice>,
    desired: EndpointSlice,
    policy: RetryPolicy,
) -> Result<EndpointSlice> {
    let name = desired.name_any();
    let existing = api.get(&name).await?;
    check_ownership(&existing, "EndpointSlice")?;
    let applied = retry_with_backoff(policy, is_retryable, || {
        let desired = desired.clone();
        async move { api.apply(desired, FIELD_MANAGER).await }
    })
    .await?;
    Ok(applied)
}

/// Deletes the leader Service by name. `NotFound` is treated as success.
pub async fn delete_leader_service(
    api: &dyn ApiTrait<Service>,
    name: &str,
    policy: RetryPolicy,
) -> Result<()> {
    delete_if_exists(api, name, policy).await
}

/// Deletes the leader EndpointSlice by name. `NotFound` is treated as
/// success.
pub async fn delete_leader_endpoint_slice(
    api: &dyn ApiTrait<EndpointSlice>,
    name: &str,
    policy: RetryPolicy,
) -> Result<()> {
    delete_if_exists(api, name, policy).await
}

async fn delete_if_exists<T>(api: &dyn ApiTrait<T>, name: &str, policy: RetryPolicy) -> Result<()>
where
    T: Clone + Send + Sync + Resource,
{
    let result = retry_with_backoff(policy, is_retryable, || async move {
        match api.delete(name).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    })
    .await;
    result.map_err(ControllerError::from)
}

/// Filter used by the best-effort orphan sweep: objects labeled with this
/// controller's ownership pair for `source_service_name`.
pub fn orphan_label_selector(source_service_name: &str) -> String {
    format!(
        "{LABEL_MANAGED_BY}={MANAGED_BY_VALUE},{LABEL_SOURCE_SERVICE}={source_service_name}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use leaderslice_shared::k8s::api::MockApi;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn owned_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn foreign_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn apply_creates_when_absent() {
        let mut mock: MockApi<Service> = MockApi::new();
        mock.expect_get().returning(|_| Ok(None));
        mock.expect_apply()
            .returning(|obj, _| Ok(obj));
        let desired = foreign_service("demo-leader");
        let result = apply_leader_service(&mock, desired, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(result.name_any(), "demo-leader");
    }

    #[tokio::test]
    async fn apply_updates_when_owned_by_us() {
        let mut mock: MockApi<Service> = MockApi::new();
        mock.expect_get()
            .returning(|name| Ok(Some(owned_service(name))));
        mock.expect_apply().returning(|obj, _| Ok(obj));
        let desired = owned_service("demo-leader");
        assert!(apply_leader_service(&mock, desired, RetryPolicy::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn apply_refuses_foreign_object() {
        let mut mock: MockApi<Service> = MockApi::new();
        mock.expect_get()
            .returning(|name| Ok(Some(foreign_service(name))));
        let desired = foreign_service("demo-leader");
        let err = apply_leader_service(&mock, desired, RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::OwnershipConflict { kind: "Service", .. }
        ));
    }

    #[tokio::test]
    async fn delete_treats_not_found_as_success() {
        let mut mock: MockApi<Service> = MockApi::new();
        mock.expect_delete().returning(|_| {
            Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            }))
        });
        assert!(delete_leader_service(&mock, "demo-leader", RetryPolicy::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn delete_retries_transient_errors_then_succeeds() {
        let mut mock: MockApi<Service> = MockApi::new();
        let mut call = 0;
        mock.expect_delete().returning(move |_| {
            call += 1;
            if call == 1 {
                Err(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "conflict".to_string(),
                    reason: "Conflict".to_string(),
                    code: 409,
                }))
            } else {
                Ok(either::Either::Right(Default::default()))
            }
        });
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        assert!(delete_leader_service(&mock, "demo-leader", policy)
            .await
            .is_ok());
    }

    #[test]
    fn orphan_selector_carries_both_labels() {
        let selector = orphan_label_selector("my-app");
        assert!(selector.contains(LABEL_MANAGED_BY));
        assert!(selector.contains("my-app"));
    }
}
