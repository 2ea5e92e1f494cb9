//! Packed 32-bit result codes returned to guest code.
//!
//! Guest-visible failures are always values of this type, never host errors. The layout is
//! the documented one: description in bits 0..10, module in bits 10..18, summary in bits
//! 21..27, level in bits 27..32. A code is an error iff its sign bit is set, which falls out
//! of the level field (levels `Status` and worse have the top bit).

use mikan_mem::MemoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorDescription {
    Success = 0,
    SessionClosedByRemote = 26,
    PortNameTooLong = 30,
    WrongLockingThread = 31,
    NoPendingSessions = 35,
    WrongPermission = 46,
    MaxConnectionsReached = 52,
    CommandBufferTranslation = 54,
    NotAuthorized = 1002,
    InvalidEnumValue = 1005,
    InvalidCombination = 1006,
    MisalignedAddress = 1009,
    MisalignedSize = 1010,
    OutOfMemory = 1011,
    NotImplemented = 1012,
    InvalidAddress = 1013,
    InvalidPointer = 1014,
    InvalidHandle = 1015,
    NotFound = 1018,
    OutOfRange = 1021,
    Timeout = 1022,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorModule {
    Common = 0,
    Kernel = 1,
    Os = 6,
    Fnd = 18,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorSummary {
    Success = 0,
    WouldBlock = 2,
    OutOfResource = 3,
    NotFound = 4,
    InvalidState = 5,
    NotSupported = 6,
    InvalidArgument = 7,
    WrongArgument = 8,
    Canceled = 9,
    StatusChanged = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorLevel {
    Success = 0,
    Info = 1,
    Status = 25,
    Temporary = 26,
    Permanent = 27,
    Usage = 28,
    Fatal = 31,
}

/// A packed guest result code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const fn new(
        description: ErrorDescription,
        module: ErrorModule,
        summary: ErrorSummary,
        level: ErrorLevel,
    ) -> Self {
        Self(
            (description as u32 & 0x3FF)
                | ((module as u32 & 0xFF) << 10)
                | ((summary as u32 & 0x3F) << 21)
                | ((level as u32 & 0x1F) << 27),
        )
    }

    pub const fn is_error(self) -> bool {
        (self.0 as i32) < 0
    }

    pub const fn is_success(self) -> bool {
        !self.is_error()
    }

    pub const fn description(self) -> u32 {
        self.0 & 0x3FF
    }

    pub const fn module(self) -> u32 {
        (self.0 >> 10) & 0xFF
    }

    pub const fn summary(self) -> u32 {
        (self.0 >> 21) & 0x3F
    }

    pub const fn level(self) -> u32 {
        (self.0 >> 27) & 0x1F
    }
}

impl std::fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResultCode({:#010X})", self.0)
    }
}

pub const RESULT_SUCCESS: ResultCode = ResultCode(0);

pub const RESULT_TIMEOUT: ResultCode = ResultCode::new(
    ErrorDescription::Timeout,
    ErrorModule::Os,
    ErrorSummary::StatusChanged,
    ErrorLevel::Info,
);

/// Placeholder the kernel hands back when `ReplyAndReceive` is given no handles and performs
/// no reply; real hardware returns this exact value.
pub const RESULT_NO_PENDING_REPLY: ResultCode = ResultCode(0xE7E3_FFFF);

pub const ERR_OUT_OF_RANGE: ResultCode = ResultCode::new(
    ErrorDescription::OutOfRange,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_OUT_OF_RANGE_KERNEL: ResultCode = ResultCode::new(
    ErrorDescription::OutOfRange,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_HANDLE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidHandle,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_SESSION_CLOSED_BY_REMOTE: ResultCode = ResultCode::new(
    ErrorDescription::SessionClosedByRemote,
    ErrorModule::Os,
    ErrorSummary::Canceled,
    ErrorLevel::Status,
);

pub const ERR_PORT_NAME_TOO_LONG: ResultCode = ResultCode::new(
    ErrorDescription::PortNameTooLong,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_WRONG_LOCKING_THREAD: ResultCode = ResultCode::new(
    ErrorDescription::WrongLockingThread,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_MAX_CONNECTIONS_REACHED: ResultCode = ResultCode::new(
    ErrorDescription::MaxConnectionsReached,
    ErrorModule::Os,
    ErrorSummary::WouldBlock,
    ErrorLevel::Temporary,
);

pub const ERR_NO_PENDING_SESSIONS: ResultCode = ResultCode::new(
    ErrorDescription::NoPendingSessions,
    ErrorModule::Os,
    ErrorSummary::WouldBlock,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_FOUND: ResultCode = ResultCode::new(
    ErrorDescription::NotFound,
    ErrorModule::Kernel,
    ErrorSummary::NotFound,
    ErrorLevel::Permanent,
);

/// Deterministic command-buffer translation failure, delivered to the client.
pub const ERR_TRANSLATION: ResultCode = ResultCode::new(
    ErrorDescription::CommandBufferTranslation,
    ErrorModule::Os,
    ErrorSummary::InvalidState,
    ErrorLevel::Status,
);

pub const ERR_MISALIGNED_ADDRESS: ResultCode = ResultCode::new(
    ErrorDescription::MisalignedAddress,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_MISALIGNED_SIZE: ResultCode = ResultCode::new(
    ErrorDescription::MisalignedSize,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_COMBINATION: ResultCode = ResultCode::new(
    ErrorDescription::InvalidCombination,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_COMBINATION_KERNEL: ResultCode = ResultCode::new(
    ErrorDescription::InvalidCombination,
    ErrorModule::Kernel,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_ENUM_VALUE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidEnumValue,
    ErrorModule::Common,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_ENUM_VALUE_FND: ResultCode = ResultCode::new(
    ErrorDescription::InvalidEnumValue,
    ErrorModule::Fnd,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_AUTHORIZED: ResultCode = ResultCode::new(
    ErrorDescription::NotAuthorized,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_ADDRESS: ResultCode = ResultCode::new(
    ErrorDescription::InvalidAddress,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_ADDRESS_STATE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidAddress,
    ErrorModule::Os,
    ErrorSummary::InvalidState,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_POINTER: ResultCode = ResultCode::new(
    ErrorDescription::InvalidPointer,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_IMPLEMENTED: ResultCode = ResultCode::new(
    ErrorDescription::NotImplemented,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_OUT_OF_MEMORY: ResultCode = ResultCode::new(
    ErrorDescription::OutOfMemory,
    ErrorModule::Kernel,
    ErrorSummary::OutOfResource,
    ErrorLevel::Permanent,
);

pub const ERR_OUT_OF_HANDLES: ResultCode = ResultCode::new(
    ErrorDescription::OutOfMemory,
    ErrorModule::Kernel,
    ErrorSummary::OutOfResource,
    ErrorLevel::Temporary,
);

pub const ERR_WRONG_PERMISSION: ResultCode = ResultCode::new(
    ErrorDescription::WrongPermission,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// Maps a host-side memory error onto the guest result code the kernel reports for it.
pub(crate) fn result_from_memory_error(err: MemoryError) -> ResultCode {
    match err {
        MemoryError::NotMapped { .. } | MemoryError::InvalidAddress { .. } => ERR_INVALID_ADDRESS,
        MemoryError::MisalignedAddress { .. } => ERR_MISALIGNED_ADDRESS,
        MemoryError::MisalignedSize { .. } => ERR_MISALIGNED_SIZE,
        MemoryError::AlreadyMapped { .. } => ERR_INVALID_ADDRESS_STATE,
        MemoryError::OutOfMemory { .. } => ERR_OUT_OF_MEMORY,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn canonical_raw_values_are_pinned() {
        assert_eq!(RESULT_SUCCESS.0, 0);
        assert_eq!(RESULT_TIMEOUT.0, 0x09401BFE);
        assert_eq!(ERR_OUT_OF_RANGE.0, 0xE0E01BFD);
        assert_eq!(ERR_OUT_OF_RANGE_KERNEL.0, 0xD8E007FD);
        assert_eq!(ERR_INVALID_HANDLE.0, 0xD8E007F7);
        assert_eq!(ERR_SESSION_CLOSED_BY_REMOTE.0, 0xC920181A);
        assert_eq!(ERR_NOT_FOUND.0, 0xD88007FA);
        assert_eq!(ERR_TRANSLATION.0, 0xC8A01836);
        assert_eq!(ERR_NOT_AUTHORIZED.0, 0xD9001BEA);
        assert_eq!(ERR_INVALID_ADDRESS.0, 0xE0E01BF5);
        assert_eq!(ERR_MISALIGNED_ADDRESS.0, 0xE0E01BF1);
        assert_eq!(ERR_MISALIGNED_SIZE.0, 0xE0E01BF2);
        assert_eq!(ERR_INVALID_ENUM_VALUE_FND.0, 0xD8E04BED);
    }

    #[test]
    fn error_bit_is_the_sign_bit() {
        assert!(RESULT_SUCCESS.is_success());
        assert!(RESULT_TIMEOUT.is_success());
        assert!(ERR_INVALID_HANDLE.is_error());
        assert!(ERR_SESSION_CLOSED_BY_REMOTE.is_error());
        assert!(RESULT_NO_PENDING_REPLY.is_error());
    }

    #[test]
    fn fields_unpack_from_the_packed_word() {
        let code = ERR_WRONG_LOCKING_THREAD;
        assert_eq!(code.description(), ErrorDescription::WrongLockingThread as u32);
        assert_eq!(code.module(), ErrorModule::Kernel as u32);
        assert_eq!(code.summary(), ErrorSummary::InvalidArgument as u32);
        assert_eq!(code.level(), ErrorLevel::Permanent as u32);
    }
}
