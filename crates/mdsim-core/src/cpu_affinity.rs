//! CPU affinity for the feed decode thread.
//!
//! Pinning the single seqlock writer to a dedicated core keeps its receive
//! loop away from scheduler migration. Thin wrapper over `core_affinity`.

use tracing::{info, warn};

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.iter().find(|c| c.id == core_id) {
        Some(core) => {
            let ok = core_affinity::set_for_current(*core);
            if ok {
                info!("[affinity] bound thread to CPU core {core_id}");
            } else {
                warn!("[affinity] failed to bind thread to CPU core {core_id}");
            }
            ok
        }
        None => {
            warn!(
                "[affinity] CPU core {core_id} not available (system has {} cores)",
                core_ids.len()
            );
            false
        }
    }
}

/// Bind the current thread if a core is configured; no-op for `None`.
pub fn maybe_bind(core_id: Option<usize>) -> bool {
    core_id.map(bind_to_core).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_a_no_op() {
        assert!(!maybe_bind(None));
    }

    #[test]
    fn absent_core_is_rejected() {
        assert!(!bind_to_core(usize::MAX));
    }
}
