use thiserror::Error;

use crate::device::ResourceHandle;

pub type Result<T> = std::result::Result<T, ResourceError>;

/// HRESULT-style status code as returned by the driver function table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_ABORT: HResult = HResult(0x8000_4004_u32 as i32);
    pub const E_NOTIMPL: HResult = HResult(0x8000_4001_u32 as i32);
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);

    pub fn is_failure(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Debug for HResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HResult({:#010x})", self.0 as u32)
    }
}

impl std::fmt::Display for HResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

/// Errors surfaced by resource construction, locking and blitting.
///
/// Driver failures are carried verbatim in [`ResourceError::Driver`]; the engine never turns
/// one into success. Staging exhaustion degrades to [`ResourceError::OutOfMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("driver call failed: {0}")]
    Driver(HResult),

    #[error("out of memory (no staging surface available)")]
    OutOfMemory,

    #[error("invalid call: {0}")]
    InvalidCall(&'static str),

    #[error("unknown resource handle {0:?}")]
    UnknownResource(ResourceHandle),

    #[error("sub-resource {index} out of range (resource has {count})")]
    InvalidSubResource { index: u32, count: u32 },

    #[error("operation aborted")]
    Aborted,

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl ResourceError {
    /// Maps the error back onto the HRESULT a DDI caller expects.
    pub fn hresult(self) -> HResult {
        match self {
            ResourceError::Driver(code) => code,
            ResourceError::OutOfMemory => HResult::E_OUTOFMEMORY,
            ResourceError::InvalidCall(_) => HResult::E_FAIL,
            ResourceError::UnknownResource(_) | ResourceError::InvalidSubResource { .. } => {
                HResult::E_INVALIDARG
            }
            ResourceError::Aborted => HResult::E_ABORT,
            ResourceError::Unsupported(_) => HResult::E_NOTIMPL,
        }
    }
}

impl From<HResult> for ResourceError {
    fn from(code: HResult) -> Self {
        if code == HResult::E_OUTOFMEMORY {
            ResourceError::OutOfMemory
        } else {
            ResourceError::Driver(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_codes_round_trip_through_hresult() {
        let err = ResourceError::Driver(HResult(0x8876_086C_u32 as i32));
        assert_eq!(err.hresult(), HResult(0x8876_086C_u32 as i32));
        assert!(err.hresult().is_failure());
        assert!(!HResult::S_OK.is_failure());
    }

    #[test]
    fn out_of_memory_code_maps_to_out_of_memory_variant() {
        assert_eq!(
            ResourceError::from(HResult::E_OUTOFMEMORY),
            ResourceError::OutOfMemory
        );
        assert_eq!(ResourceError::OutOfMemory.hresult(), HResult::E_OUTOFMEMORY);
    }
}
