//! Scoped acquisition of downgrade leases.
//!
//! A downgrade lease is the one cross-client mutual-exclusion primitive in
//! the system: the authority grants it for a named set of users so that two
//! clients cannot concurrently demote the same privileged members. The
//! combinator here guarantees the lease is cancelled exactly once after the
//! guarded operation returns, success or failure alike. Cancellation
//! failures are logged, never raised; the authority's own expiry bounds the
//! damage of a lost cancel.

use std::future::Future;

use tracing::{debug, warn};

use crate::error::TeamError;
use crate::service::LeaseAuthority;
use crate::types::{DowngradeLease, FreshnessAnchor, TeamId, UserId};

/// Run `op` under a downgrade lease covering `uids`.
///
/// With an empty `uids`, `op` runs directly with no lease and no anchor
/// override. Otherwise a lease is requested first and `op` receives both the
/// lease (for inclusion in the post payload) and the freshness anchor the
/// authority issued with it; the lease is cancelled on every exit path after
/// `op` returns.
pub async fn with_downgrade_lease<F, Fut, T>(
    authority: &dyn LeaseAuthority,
    team_id: TeamId,
    uids: &[UserId],
    op: F,
) -> Result<T, TeamError>
where
    F: FnOnce(Option<DowngradeLease>, Option<FreshnessAnchor>) -> Fut,
    Fut: Future<Output = Result<T, TeamError>>,
{
    if uids.is_empty() {
        return op(None, None).await;
    }

    let (lease, anchor) = authority.request_lease(team_id, uids).await?;
    debug!(team = %team_id, lease = %lease.id, users = uids.len(), "downgrade lease acquired");

    let lease_id = lease.id;
    let result = op(Some(lease), Some(anchor)).await;

    // Safe to cancel even when the guarded post succeeded; the lease's job
    // ends with the post either way.
    if let Err(err) = authority.cancel_lease(lease_id).await {
        warn!(team = %team_id, lease = %lease_id, %err, "failed to cancel downgrade lease");
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::with_downgrade_lease;
    use crate::error::TeamError;
    use crate::service::LeaseAuthority;
    use crate::types::{DowngradeLease, FreshnessAnchor, LeaseId, TeamId, UserId};

    #[derive(Default)]
    struct RecordingAuthority {
        requested: Mutex<Vec<Vec<UserId>>>,
        cancelled: Mutex<Vec<LeaseId>>,
        fail_cancel: bool,
    }

    #[async_trait]
    impl LeaseAuthority for RecordingAuthority {
        async fn request_lease(
            &self,
            _team_id: TeamId,
            uids: &[UserId],
        ) -> Result<(DowngradeLease, FreshnessAnchor), TeamError> {
            self.requested.lock().unwrap().push(uids.to_vec());
            Ok((
                DowngradeLease { id: LeaseId([9; 16]), uids: uids.to_vec() },
                FreshnessAnchor { seqno: 77, root_hash: [1; 32] },
            ))
        }

        async fn cancel_lease(&self, id: LeaseId) -> Result<(), TeamError> {
            self.cancelled.lock().unwrap().push(id);
            if self.fail_cancel {
                return Err(TeamError::Service("cancel rejected".into()));
            }
            Ok(())
        }
    }

    fn team() -> TeamId {
        TeamId([5; 16])
    }

    #[tokio::test]
    async fn empty_set_runs_without_a_lease() {
        let authority = RecordingAuthority::default();

        let out = with_downgrade_lease(&authority, team(), &[], |lease, anchor| async move {
            assert!(lease.is_none());
            assert!(anchor.is_none());
            Ok(1)
        })
        .await
        .unwrap();

        assert_eq!(out, 1);
        assert!(authority.requested.lock().unwrap().is_empty());
        assert!(authority.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_and_anchor_reach_the_operation() {
        let authority = RecordingAuthority::default();
        let uids = [UserId([1; 16]), UserId([2; 16])];

        with_downgrade_lease(&authority, team(), &uids, |lease, anchor| async move {
            let lease = lease.unwrap();
            assert_eq!(lease.uids.len(), 2);
            assert_eq!(anchor.unwrap().seqno, 77);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(authority.cancelled.lock().unwrap().as_slice(), &[LeaseId([9; 16])]);
    }

    #[tokio::test]
    async fn lease_is_cancelled_when_the_operation_fails() {
        let authority = RecordingAuthority::default();
        let uids = [UserId([1; 16])];

        let err = with_downgrade_lease(&authority, team(), &uids, |_, _| async move {
            Err::<(), _>(TeamError::StaleSequence { seqno: 3 })
        })
        .await
        .unwrap_err();

        assert_eq!(err, TeamError::StaleSequence { seqno: 3 });
        assert_eq!(authority.cancelled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_failure_does_not_mask_the_result() {
        let authority = RecordingAuthority { fail_cancel: true, ..Default::default() };
        let uids = [UserId([1; 16])];

        let out =
            with_downgrade_lease(&authority, team(), &uids, |_, _| async move { Ok(42) })
                .await
                .unwrap();

        assert_eq!(out, 42);
        assert_eq!(authority.cancelled.lock().unwrap().len(), 1);
    }
}
