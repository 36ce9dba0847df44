use anyhow::{Result, bail, ensure};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::bootstrap::EndpointConfig;
use super::provider::*;
use super::types::*;

/// Userspace stand-in for a fabric provider. Implements the same surface
/// as a hardware-backed provider but keeps all state in process memory,
/// so tests and single-node demos can run without RDMA hardware.
pub struct SimProvider {
    attrs: SimAttrs,
    shared: Arc<SimShared>,
}

/// Negotiated attributes the simulated provider reports. Tests override
/// individual fields to exercise the bootstrap's validation paths.
#[derive(Clone, Debug)]
pub struct SimAttrs {
    pub provider_name: String,
    pub cq_data_size: usize,
    pub mr_key_size: usize,
    pub addr_len: usize,
}

impl Default for SimAttrs {
    fn default() -> Self {
        Self {
            provider_name: "sim".to_string(),
            cq_data_size: 8,
            mr_key_size: 8,
            addr_len: 16,
        }
    }
}

struct SimShared {
    counters: Arc<ResourceCounters>,
    next_addr: AtomicU64,
    attrs: SimAttrs,
}

/// Open/close tallies per resource kind, for leak checks.
#[derive(Debug, Default)]
pub struct ResourceCounters {
    pub fabrics: ResourceCount,
    pub domains: ResourceCount,
    pub endpoints: ResourceCount,
    pub cqs: ResourceCount,
    pub avs: ResourceCount,
}

#[derive(Debug, Default)]
pub struct ResourceCount {
    opened: AtomicU64,
    closed: AtomicU64,
}

impl ResourceCount {
    fn open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> u64 {
        self.opened() - self.closed()
    }
}

impl ResourceCounters {
    /// Total resources currently open across all kinds.
    pub fn open_now(&self) -> u64 {
        self.fabrics.open_now()
            + self.domains.open_now()
            + self.endpoints.open_now()
            + self.cqs.open_now()
            + self.avs.open_now()
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self::with_attrs(SimAttrs::default())
    }

    pub fn with_attrs(attrs: SimAttrs) -> Self {
        let shared = Arc::new(SimShared {
            counters: Arc::new(ResourceCounters::default()),
            next_addr: AtomicU64::new(0),
            attrs: attrs.clone(),
        });
        Self { attrs, shared }
    }

    pub fn counters(&self) -> Arc<ResourceCounters> {
        self.shared.counters.clone()
    }
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for SimProvider {
    fn negotiate(&self, hints: &EndpointConfig) -> Result<ProviderConfig, FabricError> {
        if let Some(want) = &hints.provider_hint {
            if want != &self.attrs.provider_name {
                return Err(FabricError::from_code(FI_ENODATA));
            }
        }
        if hints.endpoint_type != EndpointType::ReliableDatagram {
            return Err(FabricError::from_code(FI_ENODATA));
        }
        Ok(ProviderConfig {
            provider_name: self.attrs.provider_name.clone(),
            endpoint_type: hints.endpoint_type,
            caps: hints.caps,
            mode: hints.mode,
            mr_mode: hints.mr_mode,
            threading: hints.threading,
            control_progress: hints.control_progress,
            data_progress: hints.data_progress,
            cq_data_size: self.attrs.cq_data_size,
            mr_key_size: self.attrs.mr_key_size,
            addr_len: self.attrs.addr_len,
        })
    }

    fn open_fabric(&self, config: &ProviderConfig) -> Result<Box<dyn Fabric>> {
        ensure!(
            config.provider_name == self.attrs.provider_name,
            "configuration was negotiated by provider {:?}, not {:?}",
            config.provider_name,
            self.attrs.provider_name
        );
        self.shared.counters.fabrics.open();
        Ok(Box::new(SimFabric {
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct SimFabric {
    shared: Arc<SimShared>,
    closed: bool,
}

impl Fabric for SimFabric {
    fn open_domain(&mut self) -> Result<Box<dyn Domain>> {
        ensure!(!self.closed, "fabric used after close");
        self.shared.counters.domains.open();
        Ok(Box::new(SimDomain {
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<()> {
        ensure!(!self.closed, "fabric closed twice");
        self.closed = true;
        self.shared.counters.fabrics.close();
        Ok(())
    }
}

struct SimDomain {
    shared: Arc<SimShared>,
    closed: bool,
}

impl Domain for SimDomain {
    fn create_endpoint(&mut self) -> Result<Box<dyn Endpoint>> {
        ensure!(!self.closed, "domain used after close");
        // Unique per-endpoint address: a counter in the leading bytes,
        // low byte first so short addresses stay distinct.
        let id = self.shared.next_addr.fetch_add(1, Ordering::SeqCst) + 1;
        let mut addr = vec![0u8; self.shared.attrs.addr_len];
        for (slot, byte) in addr.iter_mut().zip(id.to_le_bytes()) {
            *slot = byte;
        }
        self.shared.counters.endpoints.open();
        Ok(Box::new(SimEndpoint {
            counters: self.shared.counters.clone(),
            addr,
            cq_bound: false,
            av_bound: false,
            enabled: false,
            closed: false,
        }))
    }

    fn create_cq(&mut self, attr: &CqAttr) -> Result<Box<dyn CompletionQueue>> {
        ensure!(!self.closed, "domain used after close");
        ensure!(attr.size > 0, "completion queue capacity must be non-zero");
        self.shared.counters.cqs.open();
        Ok(Box::new(SimCq {
            counters: self.shared.counters.clone(),
            capacity: attr.size,
            closed: false,
        }))
    }

    fn create_av(&mut self, attr: &AvAttr) -> Result<Box<dyn AddressVector>> {
        ensure!(!self.closed, "domain used after close");
        if attr.av_type != AvType::Map {
            bail!("simulated provider only supports map-style address vectors");
        }
        self.shared.counters.avs.open();
        Ok(Box::new(SimAv {
            counters: self.shared.counters.clone(),
            tokens: HashMap::new(),
            next_token: 0,
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<()> {
        ensure!(!self.closed, "domain closed twice");
        self.closed = true;
        self.shared.counters.domains.close();
        Ok(())
    }
}

struct SimEndpoint {
    counters: Arc<ResourceCounters>,
    addr: Vec<u8>,
    cq_bound: bool,
    av_bound: bool,
    enabled: bool,
    closed: bool,
}

impl Endpoint for SimEndpoint {
    fn bind_cq(&mut self, _cq: &dyn CompletionQueue, flags: BindFlags) -> Result<()> {
        ensure!(!self.closed, "endpoint used after close");
        ensure!(!self.enabled, "cannot bind to an enabled endpoint");
        ensure!(!flags.is_empty(), "completion queue bind needs a direction");
        self.cq_bound = true;
        Ok(())
    }

    fn bind_av(&mut self, _av: &dyn AddressVector) -> Result<()> {
        ensure!(!self.closed, "endpoint used after close");
        ensure!(!self.enabled, "cannot bind to an enabled endpoint");
        self.av_bound = true;
        Ok(())
    }

    fn enable(&mut self) -> Result<()> {
        ensure!(!self.closed, "endpoint used after close");
        ensure!(
            self.cq_bound && self.av_bound,
            "endpoint enabled before completion queue and address vector were bound"
        );
        self.enabled = true;
        Ok(())
    }

    fn addr_len(&self) -> usize {
        self.addr.len()
    }

    fn raw_addr(&self) -> Result<Vec<u8>> {
        ensure!(!self.closed, "endpoint used after close");
        ensure!(self.enabled, "endpoint address queried before enable");
        Ok(self.addr.clone())
    }

    fn close(&mut self) -> Result<()> {
        ensure!(!self.closed, "endpoint closed twice");
        self.closed = true;
        self.counters.endpoints.close();
        Ok(())
    }
}

struct SimCq {
    counters: Arc<ResourceCounters>,
    capacity: usize,
    closed: bool,
}

impl CompletionQueue for SimCq {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&mut self) -> Result<()> {
        ensure!(!self.closed, "completion queue closed twice");
        self.closed = true;
        self.counters.cqs.close();
        Ok(())
    }
}

struct SimAv {
    counters: Arc<ResourceCounters>,
    tokens: HashMap<Vec<u8>, u64>,
    next_token: u64,
    closed: bool,
}

impl AddressVector for SimAv {
    fn insert(&mut self, raw: &[u8]) -> Result<Vec<u64>> {
        ensure!(!self.closed, "address vector used after close");
        ensure!(!raw.is_empty(), "cannot insert an empty address");
        let token = match self.tokens.get(raw) {
            Some(&token) => token,
            None => {
                let token = self.next_token;
                self.next_token += 1;
                self.tokens.insert(raw.to_vec(), token);
                token
            }
        };
        Ok(vec![token])
    }

    fn close(&mut self) -> Result<()> {
        ensure!(!self.closed, "address vector closed twice");
        self.closed = true;
        self.counters.avs.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_honors_provider_hint() {
        let provider = SimProvider::new();
        let hints = EndpointConfig {
            provider_hint: Some("cxi".to_string()),
            ..EndpointConfig::default()
        };
        let err = provider.negotiate(&hints).unwrap_err();
        assert_eq!(err.code(), FI_ENODATA);

        let hints = EndpointConfig {
            provider_hint: Some("sim".to_string()),
            ..EndpointConfig::default()
        };
        assert!(provider.negotiate(&hints).is_ok());
    }

    fn enabled_endpoint(domain: &mut dyn Domain) -> Box<dyn Endpoint> {
        let mut ep = domain.create_endpoint().unwrap();
        let cq = domain
            .create_cq(&CqAttr {
                size: 16,
                format: CqFormat::Tagged,
            })
            .unwrap();
        let av = domain
            .create_av(&AvAttr {
                av_type: AvType::Map,
            })
            .unwrap();
        ep.bind_cq(cq.as_ref(), BindFlags::TRANSMIT | BindFlags::RECV)
            .unwrap();
        ep.bind_av(av.as_ref()).unwrap();
        ep.enable().unwrap();
        ep
    }

    #[test]
    fn test_endpoints_get_distinct_addresses() {
        let provider = SimProvider::new();
        let config = provider.negotiate(&EndpointConfig::default()).unwrap();
        let mut fabric = provider.open_fabric(&config).unwrap();
        let mut domain = fabric.open_domain().unwrap();
        let a = enabled_endpoint(domain.as_mut());
        let b = enabled_endpoint(domain.as_mut());
        assert_eq!(a.addr_len(), config.addr_len);
        assert_ne!(a.raw_addr().unwrap(), b.raw_addr().unwrap());
    }

    #[test]
    fn test_enable_requires_both_bindings() {
        let provider = SimProvider::new();
        let config = provider.negotiate(&EndpointConfig::default()).unwrap();
        let mut fabric = provider.open_fabric(&config).unwrap();
        let mut domain = fabric.open_domain().unwrap();
        let mut ep = domain.create_endpoint().unwrap();
        assert!(ep.enable().is_err());
        let cq = domain
            .create_cq(&CqAttr {
                size: 16,
                format: CqFormat::Tagged,
            })
            .unwrap();
        ep.bind_cq(cq.as_ref(), BindFlags::TRANSMIT | BindFlags::RECV)
            .unwrap();
        // Still missing the address vector.
        assert!(ep.enable().is_err());
    }

    #[test]
    fn test_av_resolves_same_bytes_to_same_token() {
        let provider = SimProvider::new();
        let config = provider.negotiate(&EndpointConfig::default()).unwrap();
        let mut fabric = provider.open_fabric(&config).unwrap();
        let mut domain = fabric.open_domain().unwrap();
        let mut av = domain
            .create_av(&AvAttr {
                av_type: AvType::Map,
            })
            .unwrap();
        let first = av.insert(b"peer-a").unwrap();
        let second = av.insert(b"peer-b").unwrap();
        let again = av.insert(b"peer-a").unwrap();
        assert_eq!(first.len(), 1);
        assert_ne!(first, second);
        assert_eq!(first, again);
    }

    #[test]
    fn test_double_close_is_an_error() {
        let provider = SimProvider::new();
        let config = provider.negotiate(&EndpointConfig::default()).unwrap();
        let mut fabric = provider.open_fabric(&config).unwrap();
        fabric.close().unwrap();
        assert!(fabric.close().is_err());
        assert_eq!(provider.counters().fabrics.closed(), 1);
    }
}
