use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{DeviceInfo, Transport};

/// Process-wide transport runtime lifecycle.
///
/// The top-level application initializes this once and passes it to every
/// [`crate::Camera`] it opens; there is no ambient global state. Dropping
/// the last reference shuts the transport down.
pub struct Runtime {
    transport: Arc<dyn Transport>,
}

impl Runtime {
    /// Start the transport runtime.
    ///
    /// Startup is idempotent at the transport level, so repeated
    /// initialization of the same transport is safe.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use gencam::Runtime;
    /// use gencam::transport::sim::SimTransport;
    ///
    /// let runtime = Runtime::init(Arc::new(SimTransport::new())).unwrap();
    /// ```
    pub fn init(transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        Self::init_with_config(transport, None)
    }

    /// Start the transport runtime with an explicit configuration path
    /// (search paths for transport layer libraries, vendor config files).
    pub fn init_with_config(
        transport: Arc<dyn Transport>,
        config_path: Option<&Path>,
    ) -> Result<Arc<Self>> {
        transport.startup(config_path)?;
        debug!("transport runtime started");
        Ok(Arc::new(Runtime { transport }))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Enumerate cameras known to the transport.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.transport.enumerate_devices()?;
        if devices.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(devices)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}
