//! Instance-ID backend contract.

use serde::{Deserialize, Serialize};

use crate::handle::OperationHandle;

/// Error codes reported by instance-id calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum InstanceIdErrorCode {
    None = 0,
    NoAccess = 1,
    Timeout = 2,
    Network = 3,
    OperationInProgress = 4,
    InvalidRequest = 5,
    Unknown = 6,
}

impl InstanceIdErrorCode {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        let value = match code {
            0 => Self::None,
            1 => Self::NoAccess,
            2 => Self::Timeout,
            3 => Self::Network,
            4 => Self::OperationInProgress,
            5 => Self::InvalidRequest,
            6 => Self::Unknown,
            _ => return None,
        };
        Some(value)
    }
}

/// Instance-ID calls exposed by the backend SDK.
pub trait InstanceIdBackend: Send + Sync {
    /// Fetches the installation's instance id. Completes with a text output.
    fn get_id(&self) -> OperationHandle;
}
