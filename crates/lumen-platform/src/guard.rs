// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicBool, Ordering};

use crate::WindowError;

static LIVE: AtomicBool = AtomicBool::new(false);

/// Token proving this process currently owns its one window.
#[derive(Debug)]
pub(crate) struct InstanceGuard(());

impl InstanceGuard {
    pub(crate) fn acquire() -> Result<Self, WindowError> {
        LIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(()))
            .map_err(|_| WindowError::AlreadyCreated)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        LIVE.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_instance_is_refused_until_first_drops() {
        let first = InstanceGuard::acquire().unwrap();
        assert!(matches!(
            InstanceGuard::acquire(),
            Err(WindowError::AlreadyCreated)
        ));
        drop(first);
        let again = InstanceGuard::acquire();
        assert!(again.is_ok());
    }
}
