//! Per-category resource limits.
//!
//! One limit object exists per category; processes reference the one for their category.
//! Current values are mostly unaccounted (matching hardware observations, most report zero);
//! the limits themselves gate priority authorization and the like.

use tracing::warn;

use crate::object::{ObjectData, ObjectId};
use crate::Kernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimitCategory {
    Application = 0,
    SysApplet = 1,
    LibApplet = 2,
    Other = 3,
}

/// Resource name values used by the limit-query syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResourceType {
    Priority = 0,
    Commit = 1,
    Thread = 2,
    Event = 3,
    Mutex = 4,
    Semaphore = 5,
    Timer = 6,
    SharedMemory = 7,
    AddressArbiter = 8,
    CpuTime = 9,
}

#[derive(Debug)]
pub struct ResourceLimit {
    pub category: ResourceLimitCategory,
    pub max_priority: i64,
    pub max_commit: i64,
    pub max_threads: i64,
    pub max_events: i64,
    pub max_mutexes: i64,
    pub max_semaphores: i64,
    pub max_timers: i64,
    pub max_shared_mems: i64,
    pub max_address_arbiters: i64,
    pub max_cpu_time: i64,
}

impl ResourceLimit {
    pub fn for_category(category: ResourceLimitCategory) -> Self {
        match category {
            ResourceLimitCategory::Application => Self {
                category,
                max_priority: 0x18,
                max_commit: 0x400_0000,
                max_threads: 0x20,
                max_events: 0x20,
                max_mutexes: 0x20,
                max_semaphores: 0x8,
                max_timers: 0x8,
                max_shared_mems: 0x10,
                max_address_arbiters: 0x2,
                max_cpu_time: 0x0,
            },
            ResourceLimitCategory::SysApplet => Self {
                category,
                max_priority: 0x4,
                max_commit: 0x5E0_0000,
                max_threads: 0xE,
                max_events: 0x8,
                max_mutexes: 0x8,
                max_semaphores: 0x4,
                max_timers: 0x4,
                max_shared_mems: 0x8,
                max_address_arbiters: 0x1,
                max_cpu_time: 0x2710,
            },
            ResourceLimitCategory::LibApplet => Self {
                category,
                max_priority: 0x4,
                max_commit: 0x60_0000,
                max_threads: 0xE,
                max_events: 0x8,
                max_mutexes: 0x8,
                max_semaphores: 0x4,
                max_timers: 0x4,
                max_shared_mems: 0x8,
                max_address_arbiters: 0x1,
                max_cpu_time: 0x2710,
            },
            ResourceLimitCategory::Other => Self {
                category,
                max_priority: 0x4,
                max_commit: 0x200_0000,
                max_threads: 0x20,
                max_events: 0x20,
                max_mutexes: 0x20,
                max_semaphores: 0x20,
                max_timers: 0x20,
                max_shared_mems: 0x20,
                max_address_arbiters: 0x20,
                max_cpu_time: 0x3E8,
            },
        }
    }

    pub fn max_value(&self, resource: u32) -> i64 {
        match resource {
            r if r == ResourceType::Priority as u32 => self.max_priority,
            r if r == ResourceType::Commit as u32 => self.max_commit,
            r if r == ResourceType::Thread as u32 => self.max_threads,
            r if r == ResourceType::Event as u32 => self.max_events,
            r if r == ResourceType::Mutex as u32 => self.max_mutexes,
            r if r == ResourceType::Semaphore as u32 => self.max_semaphores,
            r if r == ResourceType::Timer as u32 => self.max_timers,
            r if r == ResourceType::SharedMemory as u32 => self.max_shared_mems,
            r if r == ResourceType::AddressArbiter as u32 => self.max_address_arbiters,
            r if r == ResourceType::CpuTime as u32 => self.max_cpu_time,
            _ => {
                warn!(resource, "unknown resource limit name");
                0
            }
        }
    }

    /// Current usage. Mostly unaccounted, matching observed hardware behaviour.
    pub fn current_value(&self, resource: u32) -> i64 {
        if resource > ResourceType::CpuTime as u32 {
            warn!(resource, "unknown resource limit name");
        }
        0
    }
}

impl Kernel {
    pub(crate) fn init_resource_limits(&mut self) {
        for category in [
            ResourceLimitCategory::Application,
            ResourceLimitCategory::SysApplet,
            ResourceLimitCategory::LibApplet,
            ResourceLimitCategory::Other,
        ] {
            let id = self.insert_object(
                format!("resource_limit_{category:?}"),
                ObjectData::ResourceLimit(ResourceLimit::for_category(category)),
            );
            self.resource_limits.push(id);
        }
    }

    pub fn resource_limit_for_category(&self, category: ResourceLimitCategory) -> ObjectId {
        self.resource_limits[category as usize]
    }

    pub(crate) fn resource_limit(&self, id: ObjectId) -> &ResourceLimit {
        match &self.object(id).expect("stale resource limit id").data {
            ObjectData::ResourceLimit(limit) => limit,
            _ => panic!("object {id:?} is not a resource limit"),
        }
    }
}
