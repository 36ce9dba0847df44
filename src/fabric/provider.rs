use anyhow::Result;

use super::bootstrap::EndpointConfig;
use super::types::*;

/// The configuration a provider negotiated from a set of hints.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub provider_name: String,
    pub endpoint_type: EndpointType,
    pub caps: Capabilities,
    pub mode: Mode,
    pub mr_mode: MrMode,
    pub threading: Threading,
    pub control_progress: Progress,
    pub data_progress: Progress,
    /// Bytes of auxiliary data carried per completion entry.
    pub cq_data_size: usize,
    /// Width of a memory-registration key, in bytes.
    pub mr_key_size: usize,
    /// Length of this provider's raw endpoint addresses, in bytes.
    pub addr_len: usize,
}

#[derive(Clone, Debug)]
pub struct CqAttr {
    pub size: usize,
    pub format: CqFormat,
}

#[derive(Clone, Debug)]
pub struct AvAttr {
    pub av_type: AvType,
}

/// The capability negotiator. Given hints, hands back a concrete
/// configuration or an error code, and opens fabrics for configurations
/// it produced.
pub trait Provider: Send + Sync {
    fn negotiate(&self, hints: &EndpointConfig) -> Result<ProviderConfig, FabricError>;

    fn open_fabric(&self, config: &ProviderConfig) -> Result<Box<dyn Fabric>>;
}

/// Top-level handle to a provider's resources. Owns everything created
/// under it; must be closed last.
pub trait Fabric: Send {
    fn open_domain(&mut self) -> Result<Box<dyn Domain>>;

    fn close(&mut self) -> Result<()>;
}

/// A bound hardware/software resource domain under one fabric.
pub trait Domain: Send {
    fn create_endpoint(&mut self) -> Result<Box<dyn Endpoint>>;

    fn create_cq(&mut self, attr: &CqAttr) -> Result<Box<dyn CompletionQueue>>;

    fn create_av(&mut self, attr: &AvAttr) -> Result<Box<dyn AddressVector>>;

    fn close(&mut self) -> Result<()>;
}

/// An addressable communication endpoint. Must be bound to a completion
/// queue and an address vector before `enable`.
pub trait Endpoint: Send {
    fn bind_cq(&mut self, cq: &dyn CompletionQueue, flags: BindFlags) -> Result<()>;

    fn bind_av(&mut self, av: &dyn AddressVector) -> Result<()>;

    fn enable(&mut self) -> Result<()>;

    /// Length of this endpoint's raw address, in bytes.
    fn addr_len(&self) -> usize;

    /// The provider-specific byte encoding naming this endpoint.
    fn raw_addr(&self) -> Result<Vec<u8>>;

    fn close(&mut self) -> Result<()>;
}

/// A bounded ring of completion events.
pub trait CompletionQueue: Send {
    fn capacity(&self) -> usize;

    fn close(&mut self) -> Result<()>;
}

/// Maps raw peer addresses to routable tokens usable in operations.
pub trait AddressVector: Send {
    /// Resolves one raw address, returning the tokens it produced.
    /// Callers requiring a specific count must check the length.
    fn insert(&mut self, raw: &[u8]) -> Result<Vec<u64>>;

    fn close(&mut self) -> Result<()>;
}
