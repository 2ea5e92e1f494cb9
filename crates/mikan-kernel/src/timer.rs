//! Programmable one-shot/periodic timers driven by the virtual clock.

use tracing::error;

use crate::event::ResetType;
use crate::object::{ObjectData, ObjectId};
use crate::{Kernel, TimeoutKey};

#[derive(Debug)]
pub struct Timer {
    pub reset_type: ResetType,
    pub signaled: bool,
    /// Re-fire period; zero means one-shot.
    pub interval_ns: i64,
}

impl Timer {
    pub(crate) fn acquire(&mut self) {
        if self.reset_type == ResetType::OneShot {
            self.signaled = false;
        }
    }
}

impl Kernel {
    /// Caller owns the returned reference.
    pub fn create_timer(&mut self, reset_type: ResetType, name: &str) -> ObjectId {
        self.insert_object(
            name,
            ObjectData::Timer(Timer {
                reset_type,
                signaled: false,
                interval_ns: 0,
            }),
        )
    }

    /// Schedules the first fire after `initial_ns` (zero signals immediately) and re-fires
    /// every `interval_ns` if nonzero. Negative delays are rejected at the syscall layer.
    pub fn set_timer(&mut self, timer: ObjectId, initial_ns: i64, interval_ns: i64) {
        debug_assert!(initial_ns >= 0 && interval_ns >= 0);
        self.timing.cancel(TimeoutKey::TimerFire(timer));
        self.timer_mut(timer).interval_ns = interval_ns;
        if initial_ns == 0 {
            self.signal_timer(timer, 0);
        } else {
            self.timing
                .schedule(initial_ns as u64, TimeoutKey::TimerFire(timer));
        }
    }

    /// Unschedules a pending fire; idempotent.
    pub fn cancel_timer(&mut self, timer: ObjectId) {
        self.timing.cancel(TimeoutKey::TimerFire(timer));
    }

    /// Resets the signaled flag without touching the schedule.
    pub fn clear_timer(&mut self, timer: ObjectId) {
        self.timer_mut(timer).signaled = false;
    }

    pub(crate) fn timer_fired(&mut self, timer: ObjectId, lateness_ns: u64) {
        if !self.objects.contains_key(&timer) {
            error!(timer = timer.0, "timer event fired for a vanished timer");
            return;
        }
        self.signal_timer(timer, lateness_ns);
    }

    fn signal_timer(&mut self, timer: ObjectId, lateness_ns: u64) {
        self.timer_mut(timer).signaled = true;
        self.wakeup_all_waiting_threads(timer);
        if self.timer(timer).reset_type == ResetType::Pulse {
            self.timer_mut(timer).signaled = false;
        }
        let interval = self.timer(timer).interval_ns;
        if interval > 0 {
            // Subtract how late this fire was so periodic timers do not drift.
            let delay = (interval as u64).saturating_sub(lateness_ns);
            self.timing.schedule(delay, TimeoutKey::TimerFire(timer));
        }
    }

    pub(crate) fn timer(&self, id: ObjectId) -> &Timer {
        match &self.object(id).expect("stale timer id").data {
            ObjectData::Timer(timer) => timer,
            _ => panic!("object {id:?} is not a timer"),
        }
    }

    pub(crate) fn timer_mut(&mut self, id: ObjectId) -> &mut Timer {
        match &mut self.object_mut(id).expect("stale timer id").data {
            ObjectData::Timer(timer) => timer,
            _ => panic!("object {id:?} is not a timer"),
        }
    }
}
