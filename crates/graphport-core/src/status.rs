use std::fmt;

use thiserror::Error;

use crate::abi::*;

/// A status code returned by an ONNXIFI entry point.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub OnnxStatus);

impl Status {
    pub const SUCCESS: Status = Status(ONNXIFI_STATUS_SUCCESS);
    pub const FALLBACK: Status = Status(ONNXIFI_STATUS_FALLBACK);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            ONNXIFI_STATUS_SUCCESS => "ONNXIFI_STATUS_SUCCESS",
            ONNXIFI_STATUS_FALLBACK => "ONNXIFI_STATUS_FALLBACK",
            ONNXIFI_STATUS_INVALID_ID => "ONNXIFI_STATUS_INVALID_ID",
            ONNXIFI_STATUS_INVALID_SIZE => "ONNXIFI_STATUS_INVALID_SIZE",
            ONNXIFI_STATUS_INVALID_POINTER => "ONNXIFI_STATUS_INVALID_POINTER",
            ONNXIFI_STATUS_INVALID_PROTOBUF => "ONNXIFI_STATUS_INVALID_PROTOBUF",
            ONNXIFI_STATUS_INVALID_MODEL => "ONNXIFI_STATUS_INVALID_MODEL",
            ONNXIFI_STATUS_INVALID_BACKEND => "ONNXIFI_STATUS_INVALID_BACKEND",
            ONNXIFI_STATUS_INVALID_GRAPH => "ONNXIFI_STATUS_INVALID_GRAPH",
            ONNXIFI_STATUS_INVALID_EVENT => "ONNXIFI_STATUS_INVALID_EVENT",
            ONNXIFI_STATUS_INVALID_STATE => "ONNXIFI_STATUS_INVALID_STATE",
            ONNXIFI_STATUS_INVALID_NAME => "ONNXIFI_STATUS_INVALID_NAME",
            ONNXIFI_STATUS_INVALID_SHAPE => "ONNXIFI_STATUS_INVALID_SHAPE",
            ONNXIFI_STATUS_INVALID_DATATYPE => "ONNXIFI_STATUS_INVALID_DATATYPE",
            ONNXIFI_STATUS_INVALID_MEMORY_TYPE => "ONNXIFI_STATUS_INVALID_MEMORY_TYPE",
            ONNXIFI_STATUS_INVALID_MEMORY_LOCATION => "ONNXIFI_STATUS_INVALID_MEMORY_LOCATION",
            ONNXIFI_STATUS_INVALID_FENCE_TYPE => "ONNXIFI_STATUS_INVALID_FENCE_TYPE",
            ONNXIFI_STATUS_INVALID_PROPERTY => "ONNXIFI_STATUS_INVALID_PROPERTY",
            ONNXIFI_STATUS_UNSUPPORTED_TAG => "ONNXIFI_STATUS_UNSUPPORTED_TAG",
            ONNXIFI_STATUS_UNSUPPORTED_VERSION => "ONNXIFI_STATUS_UNSUPPORTED_VERSION",
            ONNXIFI_STATUS_UNSUPPORTED_OPERATOR => "ONNXIFI_STATUS_UNSUPPORTED_OPERATOR",
            ONNXIFI_STATUS_UNSUPPORTED_ATTRIBUTE => "ONNXIFI_STATUS_UNSUPPORTED_ATTRIBUTE",
            ONNXIFI_STATUS_UNSUPPORTED_SHAPE => "ONNXIFI_STATUS_UNSUPPORTED_SHAPE",
            ONNXIFI_STATUS_UNSUPPORTED_DATATYPE => "ONNXIFI_STATUS_UNSUPPORTED_DATATYPE",
            ONNXIFI_STATUS_UNSUPPORTED_MEMORY_TYPE => "ONNXIFI_STATUS_UNSUPPORTED_MEMORY_TYPE",
            ONNXIFI_STATUS_UNSUPPORTED_FENCE_TYPE => "ONNXIFI_STATUS_UNSUPPORTED_FENCE_TYPE",
            ONNXIFI_STATUS_UNSUPPORTED_PROPERTY => "ONNXIFI_STATUS_UNSUPPORTED_PROPERTY",
            ONNXIFI_STATUS_UNIDENTIFIED_NAME => "ONNXIFI_STATUS_UNIDENTIFIED_NAME",
            ONNXIFI_STATUS_MISMATCHING_SHAPE => "ONNXIFI_STATUS_MISMATCHING_SHAPE",
            ONNXIFI_STATUS_MISMATCHING_DATATYPE => "ONNXIFI_STATUS_MISMATCHING_DATATYPE",
            ONNXIFI_STATUS_NO_SYSTEM_MEMORY => "ONNXIFI_STATUS_NO_SYSTEM_MEMORY",
            ONNXIFI_STATUS_NO_DEVICE_MEMORY => "ONNXIFI_STATUS_NO_DEVICE_MEMORY",
            ONNXIFI_STATUS_NO_SYSTEM_RESOURCES => "ONNXIFI_STATUS_NO_SYSTEM_RESOURCES",
            ONNXIFI_STATUS_NO_DEVICE_RESOURCES => "ONNXIFI_STATUS_NO_DEVICE_RESOURCES",
            ONNXIFI_STATUS_BACKEND_UNAVAILABLE => "ONNXIFI_STATUS_BACKEND_UNAVAILABLE",
            ONNXIFI_STATUS_INTERNAL_ERROR => "ONNXIFI_STATUS_INTERNAL_ERROR",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#06x})", self.0),
            None => write!(f, "unknown status {:#06x}", self.0),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A native call returned a status the caller cannot accept.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{call} failed with {status}")]
pub struct AbiError {
    pub call: &'static str,
    pub status: Status,
}

/// Only success proceeds.
pub fn check(status: OnnxStatus, call: &'static str) -> Result<(), AbiError> {
    let status = Status(status);
    if status.is_success() {
        Ok(())
    } else {
        Err(AbiError { call, status })
    }
}

/// Count phase of a two-phase enumeration: a null buffer legitimately yields FALLBACK.
pub fn check_count_query(status: OnnxStatus, call: &'static str) -> Result<(), AbiError> {
    let status = Status(status);
    if status.is_success() || status == Status::FALLBACK {
        Ok(())
    } else {
        Err(AbiError { call, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_only_passes_count_queries() {
        assert!(check(ONNXIFI_STATUS_SUCCESS, "onnxGetBackendIDs").is_ok());
        assert!(check(ONNXIFI_STATUS_FALLBACK, "onnxGetBackendIDs").is_err());
        assert!(check_count_query(ONNXIFI_STATUS_FALLBACK, "onnxGetBackendIDs").is_ok());
        assert!(check_count_query(ONNXIFI_STATUS_INVALID_POINTER, "onnxGetBackendIDs").is_err());
    }

    #[test]
    fn diagnostic_names_call_and_code() {
        let err = check(ONNXIFI_STATUS_INVALID_GRAPH, "onnxRunGraph").unwrap_err();
        assert_eq!(
            err.to_string(),
            "onnxRunGraph failed with ONNXIFI_STATUS_INVALID_GRAPH (0x0107)"
        );
        assert_eq!(Status(0x7777).to_string(), "unknown status 0x7777");
    }
}
