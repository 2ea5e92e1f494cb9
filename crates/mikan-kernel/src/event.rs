//! Guest events: a signaled flag with a configurable reset policy.

use crate::object::{ObjectData, ObjectId};
use crate::Kernel;

/// When a signaled object goes back to unsignaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Auto-clears on the first successful wait.
    OneShot,
    /// Stays signaled until explicitly cleared.
    Sticky,
    /// Clears after each wake round.
    Pulse,
}

impl ResetType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ResetType::OneShot),
            1 => Some(ResetType::Sticky),
            2 => Some(ResetType::Pulse),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Event {
    pub reset_type: ResetType,
    pub signaled: bool,
}

impl Event {
    pub(crate) fn acquire(&mut self) {
        if self.reset_type == ResetType::OneShot {
            self.signaled = false;
        }
    }
}

impl Kernel {
    /// Caller owns the returned reference.
    pub fn create_event(&mut self, reset_type: ResetType, name: &str) -> ObjectId {
        self.insert_object(
            name,
            ObjectData::Event(Event {
                reset_type,
                signaled: false,
            }),
        )
    }

    pub fn signal_event(&mut self, event: ObjectId) {
        self.event_mut(event).signaled = true;
        self.wakeup_all_waiting_threads(event);
        if self.event(event).reset_type == ResetType::Pulse {
            self.event_mut(event).signaled = false;
        }
    }

    pub fn clear_event(&mut self, event: ObjectId) {
        self.event_mut(event).signaled = false;
    }

    pub(crate) fn event(&self, id: ObjectId) -> &Event {
        match &self.object(id).expect("stale event id").data {
            ObjectData::Event(event) => event,
            _ => panic!("object {id:?} is not an event"),
        }
    }

    pub(crate) fn event_mut(&mut self, id: ObjectId) -> &mut Event {
        match &mut self.object_mut(id).expect("stale event id").data {
            ObjectData::Event(event) => event,
            _ => panic!("object {id:?} is not an event"),
        }
    }
}
