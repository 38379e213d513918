//! Presence broadcasting.

use std::sync::Arc;

use pagesync_core::{DiscoveryPayload, ServiceDescriptor};
use pagesync_net::{AdvertiseBackend, Result as NetResult};
use tracing::{debug, info};

/// Advertises the local node under a descriptor, with a payload attached.
pub struct DiscoveryAdvertiser {
    backend: Arc<dyn AdvertiseBackend>,
    current: Option<(ServiceDescriptor, DiscoveryPayload)>,
}

impl DiscoveryAdvertiser {
    pub fn new(backend: Arc<dyn AdvertiseBackend>) -> Self {
        Self {
            backend,
            current: None,
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.current.is_some()
    }

    /// Start advertising.
    ///
    /// A no-op when already advertising the same descriptor and payload.
    /// Any other advertisement is stopped first.
    pub async fn start(
        &mut self,
        descriptor: &ServiceDescriptor,
        payload: &DiscoveryPayload,
    ) -> NetResult<()> {
        if let Some((d, p)) = &self.current {
            if d == descriptor && p == payload {
                debug!(descriptor = %descriptor, "already advertising");
                return Ok(());
            }
            self.stop().await;
        }

        self.backend.start(descriptor, payload).await?;
        info!(
            descriptor = %descriptor,
            page_count = ?payload.page_count(),
            "advertising"
        );
        self.current = Some((descriptor.clone(), payload.clone()));
        Ok(())
    }

    /// Stop advertising. Safe at any time.
    pub async fn stop(&mut self) {
        if self.current.take().is_some() {
            self.backend.stop().await;
            debug!("advertising stopped");
        }
    }
}
