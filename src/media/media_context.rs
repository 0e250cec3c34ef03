use std::{net::Ipv4Addr, sync::Arc};

use crate::{
    audio::shared_capture::SharedCapture,
    config::MediaSettings,
    log::log_sink::LogSink,
    net::{port_allocator::PortAllocator, udp::resolve_local_ipv4},
    sink_info,
};

use super::{
    media_devices::{MediaDevices, SystemDevices},
    media_error::Result,
};

/// Everything the managers share within one process: logger, devices, the
/// port pool, the shared microphone and the settings.
pub struct MediaContext {
    logger: Arc<dyn LogSink>,
    devices: Arc<dyn MediaDevices>,
    ports: Arc<PortAllocator>,
    capture: Arc<SharedCapture>,
    settings: MediaSettings,
    local_ip: Ipv4Addr,
}

impl MediaContext {
    /// # Errors
    /// An invalid port range in `settings`.
    pub fn new(
        settings: MediaSettings,
        devices: Arc<dyn MediaDevices>,
        logger: Arc<dyn LogSink>,
    ) -> Result<Arc<Self>> {
        let ports = Arc::new(PortAllocator::new(
            settings.rtp_port_start,
            settings.rtp_port_end,
            settings.scan_window,
        )?);
        let capture = SharedCapture::new(Arc::clone(&devices), Arc::clone(&logger));
        let local_ip = resolve_local_ipv4(settings.local_ip);
        sink_info!(
            logger,
            "[MediaContext] local ip {}, rtp ports {}..{}",
            local_ip,
            settings.rtp_port_start,
            settings.rtp_port_end
        );
        Ok(Arc::new(Self {
            logger,
            devices,
            ports,
            capture,
            settings,
            local_ip,
        }))
    }

    /// Context over the machine's real devices.
    ///
    /// # Errors
    /// See [`MediaContext::new`].
    pub fn with_system_devices(
        settings: MediaSettings,
        logger: Arc<dyn LogSink>,
    ) -> Result<Arc<Self>> {
        let devices: Arc<dyn MediaDevices> = Arc::new(SystemDevices::new(Arc::clone(&logger)));
        Self::new(settings, devices, logger)
    }

    #[must_use]
    pub fn logger(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.logger)
    }

    #[must_use]
    pub fn devices(&self) -> Arc<dyn MediaDevices> {
        Arc::clone(&self.devices)
    }

    #[must_use]
    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    #[must_use]
    pub fn capture(&self) -> &Arc<SharedCapture> {
        &self.capture
    }

    #[must_use]
    pub fn settings(&self) -> &MediaSettings {
        &self.settings
    }

    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }
}
