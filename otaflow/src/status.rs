//! Update engine status and error codes.
//!
//! The numeric values are the ones the platform update engine reports over
//! its callback interface and must be preserved exactly. Conversion from a
//! raw code is total: codes the engine may add later map to
//! [`UpdateStatus::Unknown`] instead of failing.

use std::fmt;

use serde::Serialize;

/// Status reported by the update engine through `onStatusUpdate`.
///
/// [`UpdateStatus::Fail`] is not emitted by the engine; the orchestrator
/// synthesizes it when an attempt could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateStatus {
    /// Orchestrator-level failure (`-1`).
    Fail,
    /// Engine is idle (`0`).
    Idle,
    /// Engine is checking for an update (`1`).
    CheckingForUpdate,
    /// An update is available (`2`).
    UpdateAvailable,
    /// Payload is being downloaded or streamed (`3`).
    Downloading,
    /// Payload is being verified (`4`).
    Verifying,
    /// Update is being finalized (`5`).
    Finalizing,
    /// Update applied, reboot pending (`6`).
    UpdatedNeedReboot,
    /// Engine is reporting an error event (`7`).
    ReportingErrorEvent,
    /// Engine is attempting a rollback (`8`).
    AttemptingRollback,
    /// Engine is disabled (`9`).
    Disabled,
    /// Any code outside the known range.
    Unknown(i32),
}

impl UpdateStatus {
    /// Code used for the synthetic failure status.
    pub const FAIL_CODE: i32 = -1;

    /// Map a raw engine code to a status.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Fail,
            0 => Self::Idle,
            1 => Self::CheckingForUpdate,
            2 => Self::UpdateAvailable,
            3 => Self::Downloading,
            4 => Self::Verifying,
            5 => Self::Finalizing,
            6 => Self::UpdatedNeedReboot,
            7 => Self::ReportingErrorEvent,
            8 => Self::AttemptingRollback,
            9 => Self::Disabled,
            other => Self::Unknown(other),
        }
    }

    /// Raw engine code for this status.
    pub fn code(self) -> i32 {
        match self {
            Self::Fail => Self::FAIL_CODE,
            Self::Idle => 0,
            Self::CheckingForUpdate => 1,
            Self::UpdateAvailable => 2,
            Self::Downloading => 3,
            Self::Verifying => 4,
            Self::Finalizing => 5,
            Self::UpdatedNeedReboot => 6,
            Self::ReportingErrorEvent => 7,
            Self::AttemptingRollback => 8,
            Self::Disabled => 9,
            Self::Unknown(code) => code,
        }
    }

    /// Engine-style constant name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Idle => "IDLE",
            Self::CheckingForUpdate => "CHECKING_FOR_UPDATE",
            Self::UpdateAvailable => "UPDATE_AVAILABLE",
            Self::Downloading => "DOWNLOADING",
            Self::Verifying => "VERIFYING",
            Self::Finalizing => "FINALIZING",
            Self::UpdatedNeedReboot => "UPDATED_NEED_REBOOT",
            Self::ReportingErrorEvent => "REPORTING_ERROR_EVENT",
            Self::AttemptingRollback => "ATTEMPTING_ROLLBACK",
            Self::Disabled => "DISABLED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<i32> for UpdateStatus {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Error code delivered by `onPayloadApplicationComplete`.
///
/// Only [`ErrorCode::SUCCESS`] is a success; every other value, named or
/// not, ends the attempt as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const SUCCESS: ErrorCode = ErrorCode(0);
    pub const ERROR: ErrorCode = ErrorCode(1);
    pub const FILESYSTEM_COPIER_ERROR: ErrorCode = ErrorCode(4);
    pub const POST_INSTALL_RUNNER_ERROR: ErrorCode = ErrorCode(5);
    pub const PAYLOAD_MISMATCHED_TYPE_ERROR: ErrorCode = ErrorCode(6);
    pub const INSTALL_DEVICE_OPEN_ERROR: ErrorCode = ErrorCode(7);
    pub const KERNEL_DEVICE_OPEN_ERROR: ErrorCode = ErrorCode(8);
    pub const DOWNLOAD_TRANSFER_ERROR: ErrorCode = ErrorCode(9);
    pub const PAYLOAD_HASH_MISMATCH_ERROR: ErrorCode = ErrorCode(10);
    pub const PAYLOAD_SIZE_MISMATCH_ERROR: ErrorCode = ErrorCode(11);
    pub const DOWNLOAD_PAYLOAD_VERIFICATION_ERROR: ErrorCode = ErrorCode(12);
    /// The previous attempt was canceled by the user.
    pub const USER_CANCELED: ErrorCode = ErrorCode(48);
    pub const PAYLOAD_TIMESTAMP_ERROR: ErrorCode = ErrorCode(51);
    /// Applied, but the new slot was not marked active.
    pub const UPDATED_BUT_NOT_ACTIVE: ErrorCode = ErrorCode(52);
    pub const NOT_ENOUGH_SPACE: ErrorCode = ErrorCode(60);
    pub const DEVICE_CORRUPTED: ErrorCode = ErrorCode(61);

    /// Wrap a raw engine code.
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// Raw engine code.
    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn is_user_canceled(self) -> bool {
        self == Self::USER_CANCELED
    }

    /// Constant name for known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "SUCCESS",
            1 => "ERROR",
            4 => "FILESYSTEM_COPIER_ERROR",
            5 => "POST_INSTALL_RUNNER_ERROR",
            6 => "PAYLOAD_MISMATCHED_TYPE_ERROR",
            7 => "INSTALL_DEVICE_OPEN_ERROR",
            8 => "KERNEL_DEVICE_OPEN_ERROR",
            9 => "DOWNLOAD_TRANSFER_ERROR",
            10 => "PAYLOAD_HASH_MISMATCH_ERROR",
            11 => "PAYLOAD_SIZE_MISMATCH_ERROR",
            12 => "DOWNLOAD_PAYLOAD_VERIFICATION_ERROR",
            48 => "USER_CANCELED",
            51 => "PAYLOAD_TIMESTAMP_ERROR",
            52 => "UPDATED_BUT_NOT_ACTIVE",
            60 => "NOT_ENOUGH_SPACE",
            61 => "DEVICE_CORRUPTED",
            _ => return None,
        };
        Some(name)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "error code {}", self.0),
        }
    }
}
