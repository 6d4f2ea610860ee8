//! # Exclusive areas
//!
//! The SPI handler protects its shared bookkeeping with seven exclusive areas. Each area is a
//! global interrupt lock provided by the [critical_section] implementation of the target. The lock
//! is taken when the guard is created and released when it is dropped, so an area can never be
//! left locked on an early return.
use critical_section::RestoreState;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExclusiveArea {
    /// Check and claim the hardware units of a synchronous transmission.
    SyncTransmitEnter = 0,
    /// Release the hardware units of a synchronous transmission.
    SyncTransmitExit = 1,
    ScheduleJob = 2,
    ScheduleNextJob = 3,
    LockJobs = 4,
    UnlockRemainingJobs = 5,
    JobTransferFinished = 6,
}

impl ExclusiveArea {
    /// Enter the exclusive area. It is left when the returned guard is dropped.
    #[inline]
    pub fn enter(self) -> ExclusiveAreaGuard {
        // Safety: The matching release is performed by the guard drop handler, and guards are
        // dropped in reverse order of creation.
        let restore_state = unsafe { critical_section::acquire() };
        log::trace!("enter exclusive area {:?}", self);
        ExclusiveAreaGuard {
            area: self,
            restore_state,
        }
    }
}

/// Guard for an entered [ExclusiveArea].
#[must_use = "the exclusive area is left immediately if the guard is not bound"]
pub struct ExclusiveAreaGuard {
    area: ExclusiveArea,
    restore_state: RestoreState,
}

impl ExclusiveAreaGuard {
    #[inline]
    pub fn area(&self) -> ExclusiveArea {
        self.area
    }
}

impl Drop for ExclusiveAreaGuard {
    #[inline]
    fn drop(&mut self) {
        log::trace!("exit exclusive area {:?}", self.area);
        // Safety: The restore state was returned by the acquire call of this guard.
        unsafe { critical_section::release(self.restore_state) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest() {
        let outer = ExclusiveArea::ScheduleJob.enter();
        {
            let inner = ExclusiveArea::LockJobs.enter();
            assert_eq!(inner.area(), ExclusiveArea::LockJobs);
        }
        assert_eq!(outer.area(), ExclusiveArea::ScheduleJob);
        drop(outer);
        // The lock must be free again.
        critical_section::with(|_| {});
    }
}
