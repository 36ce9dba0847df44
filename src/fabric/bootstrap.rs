use anyhow::{Context, Result, ensure};
use tracing::info;

use super::provider::*;
use super::types::*;

/// Completion queue capacity, in entries.
pub const MAX_CQ_ENTRIES: usize = 4096;

/// Caller-supplied hints handed to the capability negotiator.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Preferred provider name; `None` accepts any provider.
    pub provider_hint: Option<String>,
    pub endpoint_type: EndpointType,
    pub caps: Capabilities,
    pub mode: Mode,
    pub mr_mode: MrMode,
    pub threading: Threading,
    pub control_progress: Progress,
    pub data_progress: Progress,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            provider_hint: None,
            endpoint_type: EndpointType::ReliableDatagram,
            caps: Capabilities::RMA | Capabilities::TAGGED,
            mode: Mode::LOCAL_MR,
            mr_mode: MrMode::ENDPOINT
                | MrMode::VIRT_ADDR
                | MrMode::ALLOCATED
                | MrMode::PROV_KEY
                | MrMode::LOCAL,
            threading: Threading::Safe,
            control_progress: Progress::Manual,
            data_progress: Progress::Manual,
        }
    }
}

/// One bootstrapped endpoint and the resources it depends on.
/// Dropping this without calling [`EndpointHandle::shutdown`] leaks the
/// provider resources; teardown order matters, so it is explicit.
pub struct EndpointHandle {
    config: ProviderConfig,
    fabric: Box<dyn Fabric>,
    domain: Box<dyn Domain>,
    endpoint: Box<dyn Endpoint>,
    cq: Box<dyn CompletionQueue>,
    av: Box<dyn AddressVector>,
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EndpointHandle {
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &dyn Endpoint {
        self.endpoint.as_ref()
    }

    pub fn cq(&self) -> &dyn CompletionQueue {
        self.cq.as_ref()
    }

    pub fn av_mut(&mut self) -> &mut dyn AddressVector {
        self.av.as_mut()
    }

    /// Closes every resource in the exact reverse of creation order.
    /// Later-created resources hold references into earlier ones, so the
    /// first failure is propagated rather than skipped.
    pub fn shutdown(mut self) -> Result<()> {
        self.endpoint.close().context("closing endpoint")?;
        self.cq.close().context("closing completion queue")?;
        self.av.close().context("closing address vector")?;
        self.domain.close().context("closing domain")?;
        self.fabric.close().context("closing fabric")?;
        Ok(())
    }
}

/// Stands up one endpoint: negotiate, validate, then fabric -> domain ->
/// endpoint -> completion queue -> address vector -> bind -> enable.
///
/// Any intermediate failure is returned as-is; a half-initialized fabric
/// resource chain is not unwound, matching the providers' own semantics
/// that a failed create leaves nothing recoverable.
pub fn bootstrap(provider: &dyn Provider, hints: &EndpointConfig) -> Result<EndpointHandle> {
    let config = provider
        .negotiate(hints)
        .context("negotiating fabric capabilities")?;
    log_negotiated(hints, &config);

    // Two hard requirements of the rest of the system: enough auxiliary
    // completion data for a sequence number, and registration keys that
    // fit in a u64. A provider missing either is unusable for this
    // workload, so fail before creating anything.
    ensure!(
        config.cq_data_size >= 4,
        "completion queue data size {} is below the required 4 bytes",
        config.cq_data_size
    );
    ensure!(
        config.mr_key_size <= 8,
        "memory registration key size {} exceeds 8 bytes",
        config.mr_key_size
    );

    let mut fabric = provider.open_fabric(&config).context("opening fabric")?;
    let mut domain = fabric.open_domain().context("opening domain")?;
    let mut endpoint = domain.create_endpoint().context("creating endpoint")?;
    let cq = domain
        .create_cq(&CqAttr {
            size: MAX_CQ_ENTRIES,
            format: CqFormat::Tagged,
        })
        .context("opening completion queue")?;
    endpoint
        .bind_cq(cq.as_ref(), BindFlags::TRANSMIT | BindFlags::RECV)
        .context("binding completion queue to endpoint")?;
    let av = domain
        .create_av(&AvAttr {
            av_type: AvType::Map,
        })
        .context("opening address vector")?;
    endpoint
        .bind_av(av.as_ref())
        .context("binding address vector to endpoint")?;
    endpoint.enable().context("enabling endpoint")?;

    Ok(EndpointHandle {
        config,
        fabric,
        domain,
        endpoint,
        cq,
        av,
    })
}

/// Operator-visible dump of what the negotiator granted. Observability
/// only; nothing parses this.
fn log_negotiated(hints: &EndpointConfig, config: &ProviderConfig) {
    info!("provider name: {}", config.provider_name);
    info!("mr mode hints: [{:?}]", hints.mr_mode);
    info!("mr mode provided: [{:?}]", config.mr_mode);
    info!("thread mode: {:?}", config.threading);
    info!("control progress mode: {:?}", config.control_progress);
    info!("data progress mode: {:?}", config.data_progress);
    info!("capabilities: {:?}", config.caps);
    info!("mode: {:?}", config.mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::sim::SimProvider;

    #[test]
    fn test_default_config_requests_manual_progress() {
        let config = EndpointConfig::default();
        assert_eq!(config.endpoint_type, EndpointType::ReliableDatagram);
        assert_eq!(config.control_progress, Progress::Manual);
        assert_eq!(config.data_progress, Progress::Manual);
        assert!(config.caps.contains(Capabilities::RMA | Capabilities::TAGGED));
    }

    #[test]
    fn test_bootstrap_creates_full_chain() {
        let provider = SimProvider::new();
        let handle = bootstrap(&provider, &EndpointConfig::default()).unwrap();
        assert_eq!(handle.cq().capacity(), MAX_CQ_ENTRIES);
        assert!(handle.endpoint().raw_addr().is_ok());
        handle.shutdown().unwrap();
    }
}
