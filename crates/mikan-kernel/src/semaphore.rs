//! Counting semaphores bounded by a maximum count.

use crate::object::{ObjectData, ObjectId};
use crate::result::{
    ResultCode, ERR_INVALID_COMBINATION_KERNEL, ERR_OUT_OF_RANGE_KERNEL,
};
use crate::Kernel;

#[derive(Debug)]
pub struct Semaphore {
    pub max_count: i32,
    pub available_count: i32,
}

impl Kernel {
    /// Caller owns the returned reference.
    pub fn create_semaphore(
        &mut self,
        initial_count: i32,
        max_count: i32,
        name: &str,
    ) -> Result<ObjectId, ResultCode> {
        if initial_count > max_count {
            return Err(ERR_INVALID_COMBINATION_KERNEL);
        }
        Ok(self.insert_object(
            name,
            ObjectData::Semaphore(Semaphore {
                max_count,
                available_count: initial_count,
            }),
        ))
    }

    /// Frees `release_count` slots, waking up to that many waiters, and returns the count
    /// before the release.
    pub fn release_semaphore(
        &mut self,
        semaphore: ObjectId,
        release_count: i32,
    ) -> Result<i32, ResultCode> {
        let previous = {
            let state = self.semaphore_mut(semaphore);
            if state.max_count - state.available_count < release_count {
                return Err(ERR_OUT_OF_RANGE_KERNEL);
            }
            let previous = state.available_count;
            state.available_count += release_count;
            previous
        };
        self.wakeup_all_waiting_threads(semaphore);
        Ok(previous)
    }

    pub(crate) fn semaphore_mut(&mut self, id: ObjectId) -> &mut Semaphore {
        match &mut self.object_mut(id).expect("stale semaphore id").data {
            ObjectData::Semaphore(semaphore) => semaphore,
            _ => panic!("object {id:?} is not a semaphore"),
        }
    }
}
