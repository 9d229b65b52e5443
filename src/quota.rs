use crate::config::LimitsConfig;
use crate::identity::Caller;
use crate::state::{self, StatePaths};
use crate::storage::StorageError;

/// Maximum number of live instances the caller may hold concurrently.
///
/// `None` means unlimited: admins are exempt from the quota. For everyone
/// else the ceiling is the persisted `user_instance_limit`, re-read on
/// every call so an admin change applies to the next start.
pub fn concurrent_ceiling(
    caller: &Caller,
    paths: &StatePaths,
    limits: &LimitsConfig,
) -> Result<Option<u64>, StorageError> {
    if caller.is_admin() {
        return Ok(None);
    }
    state::user_instance_limit(paths, limits).map(Some)
}
