use bitflags::bitflags;
use std::fmt;

// Synthetic flag values; no native fabric header is linked here, the
// provider behind the `Provider` trait interprets them.
const CAP_MSG: u64 = 1 << 1;
const CAP_RMA: u64 = 1 << 2;
const CAP_TAGGED: u64 = 1 << 3;
const CAP_READ: u64 = 1 << 4;
const CAP_WRITE: u64 = 1 << 5;
const CAP_REMOTE_READ: u64 = 1 << 8;
const CAP_REMOTE_WRITE: u64 = 1 << 9;

bitflags! {
    /// Capabilities requested from, or granted by, a provider.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        /// Send and receive messages or datagrams.
        const MSG = CAP_MSG;
        /// Remote memory read and write operations.
        const RMA = CAP_RMA;
        /// Tagged message transfers.
        const TAGGED = CAP_TAGGED;
        const READ = CAP_READ;
        const WRITE = CAP_WRITE;
        const REMOTE_READ = CAP_REMOTE_READ;
        const REMOTE_WRITE = CAP_REMOTE_WRITE;
    }
}

bitflags! {
    /// Operational mode bits the application agrees to honor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mode: u64 {
        /// Local buffers must be registered before use.
        const LOCAL_MR = 1 << 0;
    }
}

bitflags! {
    /// Memory-registration behavior required by the domain.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MrMode: u64 {
        /// Registrations are bound to a specific endpoint.
        const ENDPOINT = 1 << 0;
        /// Registered regions are addressed by virtual address.
        const VIRT_ADDR = 1 << 1;
        /// Backing memory must be allocated before registration.
        const ALLOCATED = 1 << 2;
        /// The provider chooses the registration key.
        const PROV_KEY = 1 << 3;
        /// Local transfers also require registration.
        const LOCAL = 1 << 4;
    }
}

bitflags! {
    /// Direction flags for binding a completion queue to an endpoint.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BindFlags: u64 {
        const TRANSMIT = 1 << 0;
        const RECV = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointType {
    /// Connection-oriented messaging.
    Msg,
    /// Unreliable datagrams.
    Datagram,
    /// Reliable, unconnected datagrams. The only type this bootstrap requests.
    ReliableDatagram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threading {
    /// Objects may be used concurrently from any thread.
    Safe,
    /// Serialization required per domain.
    Domain,
    /// Serialization required per completion structure.
    Completion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The application drives progress by polling.
    Manual,
    /// The provider makes progress in the background.
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvType {
    /// Addresses resolve to opaque tokens.
    Map,
    /// Addresses resolve to dense indices.
    Table,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CqFormat {
    Context,
    Msg,
    Data,
    /// Completions carry tag information. Required by this bootstrap.
    Tagged,
}

pub const FI_EIO: i32 = -5;
pub const FI_ENOMEM: i32 = -12;
pub const FI_EINVAL: i32 = -22;
pub const FI_ENOSYS: i32 = -38;
pub const FI_ENODATA: i32 = -61;

/// A negative provider error code with a human-readable rendering.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FabricError(i32);

impl FabricError {
    pub fn from_code(code: i32) -> Self {
        // Providers report failures as negated errno values.
        Self(if code > 0 { -code } else { code })
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.0 {
            FI_EIO => Some("I/O error"),
            FI_ENOMEM => Some("Out of memory"),
            FI_EINVAL => Some("Invalid argument"),
            FI_ENOSYS => Some("Operation not supported"),
            FI_ENODATA => Some("No matching provider found"),
            _ => None,
        }
    }
}

impl fmt::Debug for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabricError")
            .field("code", &self.code())
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = self.message().unwrap_or("unknown error");
        write!(f, "{} (code {})", msg, self.0)
    }
}

impl std::error::Error for FabricError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_normalization() {
        assert_eq!(FabricError::from_code(61).code(), -61);
        assert_eq!(FabricError::from_code(-61).code(), -61);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            FabricError::from_code(FI_ENODATA).message(),
            Some("No matching provider found")
        );
        assert_eq!(FabricError::from_code(-9999).message(), None);
    }
}
