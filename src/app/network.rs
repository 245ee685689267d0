use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::app::registry::{
    Session, SessionRegistry, HARDWARE_SOURCE_ID, MAX_FRAMES_PER_TICK, MAX_SESSIONS,
};
use crate::app::stats::{Statistics, StatisticsSnapshot};
use crate::domain::api::{ApiFrame, CanMode, BITRATE_NONE, NAME_MAX_LEN};
use crate::domain::frame::{frame_kind, CanFrame, FrameArray, FrameKind};
use crate::error::NetworkError;
use crate::ports::interface::{CanInterface, InterfaceError, InterfaceFeatures};

/// Default dispatch period in milliseconds.
pub const DISPATCH_PERIOD_MS: u64 = 20;
/// Default statistics period in milliseconds.
pub const STATISTICS_PERIOD_MS: u64 = 1000;
/// Nominal bit-rate of a freshly created network.
pub const DEFAULT_BITRATE: i32 = 500_000;

/// Mutable settings of one network.
#[derive(Debug, Clone)]
struct NetworkConfig {
    name: String,
    host: IpAddr,
    port: u16,
    nominal_bitrate: i32,
    data_bitrate: i32,
    /// Bus-load normalization constant derived from the nominal bit-rate.
    bits_per_second: u64,
    error_frames_enabled: bool,
    fast_data_enabled: bool,
    listen_only_enabled: bool,
    dispatch_period_ms: u64,
    statistics_period_ms: u64,
}

struct Shared {
    id: u8,
    registry: Mutex<SessionRegistry>,
    interface: Mutex<Option<Box<dyn CanInterface>>>,
    config: Mutex<NetworkConfig>,
    enabled: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    stats_tx: broadcast::Sender<StatisticsSnapshot>,
}

/// One virtual CAN network.
///
/// Clients connect to the network's TCP endpoint and exchange fixed-width
/// frames; every frame is fanned out to all other participants, including
/// an optionally attached hardware interface. A periodic tick drives both
/// the I/O polling and the statistics.
pub struct CanNetwork {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl CanNetwork {
    pub(crate) fn new(id: u8, port: u16) -> Self {
        let (stats_tx, _) = broadcast::channel(64);
        let config = NetworkConfig {
            name: format!("CAN {id}"),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            nominal_bitrate: DEFAULT_BITRATE,
            data_bitrate: BITRATE_NONE,
            bits_per_second: DEFAULT_BITRATE as u64,
            error_frames_enabled: true,
            fast_data_enabled: false,
            listen_only_enabled: false,
            dispatch_period_ms: DISPATCH_PERIOD_MS,
            statistics_period_ms: STATISTICS_PERIOD_MS,
        };
        Self {
            shared: Arc::new(Shared {
                id,
                registry: Mutex::new(SessionRegistry::new(MAX_SESSIONS)),
                interface: Mutex::new(None),
                config: Mutex::new(config),
                enabled: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                stats_tx,
            }),
            task: None,
        }
    }

    pub fn id(&self) -> u8 {
        self.shared.id
    }

    pub fn name(&self) -> String {
        self.shared.config.lock().unwrap().name.clone()
    }

    /// Set the display name, truncated to what a NAME frame can carry.
    pub fn set_name(&self, name: &str) {
        let mut truncated = name;
        while truncated.len() > NAME_MAX_LEN {
            let mut end = truncated.len() - 1;
            while !truncated.is_char_boundary(end) {
                end -= 1;
            }
            truncated = &truncated[..end];
        }
        self.shared.config.lock().unwrap().name = truncated.to_string();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Address the listener is actually bound to, once enabled.
    pub fn server_address(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.lock().unwrap().len()
    }

    pub fn nominal_bitrate(&self) -> i32 {
        self.shared.config.lock().unwrap().nominal_bitrate
    }

    pub fn data_bitrate(&self) -> i32 {
        self.shared.config.lock().unwrap().data_bitrate
    }

    /// Each observer gets its own receiver; slow observers lag and drop
    /// snapshots without affecting the dispatcher.
    pub fn subscribe_statistics(&self) -> broadcast::Receiver<StatisticsSnapshot> {
        self.shared.stats_tx.subscribe()
    }

    /// Change the bind address. Only permitted while the network is
    /// disabled; returns whether the change was applied.
    pub fn set_server_address(&self, host: IpAddr) -> bool {
        if self.is_enabled() {
            return false;
        }
        self.shared.config.lock().unwrap().host = host;
        true
    }

    /// Change the dispatch period. Only permitted while disabled.
    pub fn set_dispatch_period(&self, period_ms: u64) -> bool {
        if self.is_enabled() {
            return false;
        }
        self.shared.config.lock().unwrap().dispatch_period_ms = period_ms.max(1);
        true
    }

    /// Change the statistics period. Only permitted while disabled.
    pub fn set_statistics_period(&self, period_ms: u64) -> bool {
        if self.is_enabled() {
            return false;
        }
        self.shared.config.lock().unwrap().statistics_period_ms = period_ms.max(1);
        true
    }

    /// Change the session limit. Only permitted while disabled.
    pub fn set_max_sessions(&self, limit: usize) -> bool {
        if self.is_enabled() {
            return false;
        }
        self.shared.registry.lock().unwrap().set_max_sessions(limit);
        true
    }

    /// Error-frame support: a bare virtual bus supports them; with hardware
    /// attached the device decides.
    pub fn has_error_frames_support(&self) -> bool {
        self.shared.has_feature(InterfaceFeatures::ERROR_FRAMES, true)
    }

    /// CAN FD support: a bare virtual bus supports it.
    pub fn has_fast_data_support(&self) -> bool {
        self.shared.has_feature(InterfaceFeatures::CAN_FD, true)
    }

    /// Listen-only support: a bare virtual bus cannot be listen-only.
    pub fn has_listen_only_support(&self) -> bool {
        self.shared.has_feature(InterfaceFeatures::LISTEN_ONLY, false)
    }

    pub fn error_frames_enabled(&self) -> bool {
        self.shared.config.lock().unwrap().error_frames_enabled
    }

    pub fn set_error_frames_enabled(&self, enable: bool) {
        let supported = self.has_error_frames_support();
        self.shared.config.lock().unwrap().error_frames_enabled = enable && supported;
    }

    pub fn fast_data_enabled(&self) -> bool {
        self.shared.config.lock().unwrap().fast_data_enabled
    }

    pub fn set_fast_data_enabled(&self, enable: bool) {
        let supported = self.has_fast_data_support();
        self.shared.config.lock().unwrap().fast_data_enabled = enable && supported;
    }

    pub fn listen_only_enabled(&self) -> bool {
        self.shared.config.lock().unwrap().listen_only_enabled
    }

    pub fn set_listen_only_enabled(&self, enable: bool) {
        let supported = self.has_listen_only_support();
        self.shared.config.lock().unwrap().listen_only_enabled = enable && supported;
    }

    /// Store new bit-rates and reconfigure an attached interface by the
    /// stop → set-bitrate → start sequence.
    ///
    /// The nominal rate is stored unconditionally; the data rate only when
    /// FD is enabled on this network. A hardware failure is surfaced but
    /// the stored values are not rolled back.
    pub fn set_bitrate(&self, nominal: i32, data: i32) -> Result<(), NetworkError> {
        let mut interface = self.shared.interface.lock().unwrap();
        match interface.as_deref_mut() {
            Some(iface) => apply_bitrate(&self.shared.config, Some(iface), nominal, data),
            None => apply_bitrate(&self.shared.config, None, nominal, data),
        }
        .map_err(NetworkError::from)
    }

    /// Attach a hardware interface. The slot is occupied only if
    /// connect → set-bitrate → start all succeed; otherwise the call fails
    /// with the slot untouched and the device released.
    pub fn add_interface(&self, mut interface: Box<dyn CanInterface>) -> Result<(), NetworkError> {
        let mut slot = self.shared.interface.lock().unwrap();
        if slot.is_some() {
            return Err(NetworkError::InterfaceBusy);
        }
        interface.connect()?;
        let (nominal, data) = {
            let cfg = self.shared.config.lock().unwrap();
            (cfg.nominal_bitrate, cfg.data_bitrate)
        };
        if let Err(e) = interface.set_bitrate(nominal, data) {
            interface.disconnect();
            return Err(e.into());
        }
        if let Err(e) = interface.set_mode(CanMode::Start) {
            interface.disconnect();
            return Err(e.into());
        }
        info!(net = self.shared.id, "hardware interface attached");
        *slot = Some(interface);
        Ok(())
    }

    /// Detach the hardware interface, releasing the device if connected.
    pub fn remove_interface(&self) {
        let mut slot = self.shared.interface.lock().unwrap();
        if let Some(interface) = slot.as_deref_mut() {
            if interface.connected() {
                interface.disconnect();
            }
            info!(net = self.shared.id, "hardware interface removed");
        }
        *slot = None;
    }

    pub fn has_interface(&self) -> bool {
        self.shared.interface.lock().unwrap().is_some()
    }

    /// Start the acceptor and the dispatch tick.
    pub async fn enable(&mut self) -> Result<(), NetworkError> {
        if self.is_enabled() {
            return Err(NetworkError::AlreadyEnabled);
        }
        let addr = {
            let cfg = self.shared.config.lock().unwrap();
            SocketAddr::new(cfg.host, cfg.port)
        };
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        let local_addr = listener.local_addr().ok();
        *self.shared.local_addr.lock().unwrap() = local_addr;
        self.shared.enabled.store(true, Ordering::SeqCst);
        info!(net = self.shared.id, addr = ?local_addr, "network enabled");

        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(run_network(shared, listener)));
        Ok(())
    }

    /// Stop the tick and close the listener. Existing sessions stay in the
    /// registry but are no longer serviced; in-flight frames are discarded.
    pub fn disable(&mut self) {
        if !self.shared.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.take() {
            // The network task only yields between dispatch passes, so the
            // abort cannot tear a pass or poison the registry mutex.
            task.abort();
        }
        *self.shared.local_addr.lock().unwrap() = None;
        info!(net = self.shared.id, "network disabled");
    }
}

impl Drop for CanNetwork {
    fn drop(&mut self) {
        self.disable();
        self.remove_interface();
    }
}

impl Shared {
    fn has_feature(&self, feature: InterfaceFeatures, default: bool) -> bool {
        match self.interface.lock().unwrap().as_deref() {
            Some(interface) => interface.supported_features().contains(feature),
            None => default,
        }
    }
}

/// Known nominal bit-rates and their bus-load normalization constants.
/// Other values leave the constant unchanged.
fn bits_per_second(nominal: i32) -> Option<u64> {
    match nominal {
        10_000 | 20_000 | 50_000 | 100_000 | 125_000 | 250_000 | 500_000 | 800_000 | 1_000_000 => {
            Some(nominal as u64)
        }
        _ => None,
    }
}

/// Bit-rate change shared by the public setter and the in-band BITRATE
/// handler (which already holds the interface lock).
fn apply_bitrate(
    config: &Mutex<NetworkConfig>,
    interface: Option<&mut dyn CanInterface>,
    nominal: i32,
    data: i32,
) -> Result<(), InterfaceError> {
    let data = {
        let mut cfg = config.lock().unwrap();
        cfg.nominal_bitrate = nominal;
        cfg.data_bitrate = if cfg.fast_data_enabled {
            data
        } else {
            BITRATE_NONE
        };
        if let Some(bps) = bits_per_second(nominal) {
            cfg.bits_per_second = bps;
        }
        cfg.data_bitrate
    };
    if let Some(interface) = interface {
        interface.set_mode(CanMode::Stop)?;
        interface.set_bitrate(nominal, data)?;
        interface.set_mode(CanMode::Start)?;
    }
    Ok(())
}

/// The per-network event loop: one task drives the acceptor and the
/// dispatch tick cooperatively.
async fn run_network(shared: Arc<Shared>, listener: TcpListener) {
    let (dispatch_ms, reload) = {
        let cfg = shared.config.lock().unwrap();
        let reload = (cfg.statistics_period_ms / cfg.dispatch_period_ms) as u32;
        (cfg.dispatch_period_ms, reload)
    };
    let mut stats = Statistics::new(reload, shared.stats_tx.clone());
    let mut tick = time::interval(Duration::from_millis(dispatch_ms));
    // Re-arm relative to the end of each pass, like a single-shot timer.
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept_session(&shared, stream, peer),
                Err(e) => warn!(net = shared.id, error = %e, "accept failed"),
            },
            _ = tick.tick() => dispatch_pass(&shared, &mut stats),
        }
    }
}

/// Register a new client and send it the connection preamble: the network
/// name, then the current bit-rate. These are the first bytes the client
/// will ever see.
fn accept_session(shared: &Shared, stream: TcpStream, peer: SocketAddr) {
    let preamble: [FrameArray; 2] = {
        let cfg = shared.config.lock().unwrap();
        [
            ApiFrame::Name(cfg.name.clone()).encode(),
            ApiFrame::Bitrate {
                nominal: cfg.nominal_bitrate,
                data: cfg.data_bitrate,
            }
            .encode(),
        ]
    };
    let mut registry = shared.registry.lock().unwrap();
    match registry.append(Session::new(stream, peer)) {
        Ok(index) => {
            let session = registry.session_mut(index);
            for frame in &preamble {
                session.try_send(frame);
            }
            info!(net = shared.id, %peer, index, count = registry.len(), "client connected");
        }
        Err(e) => {
            // Dropping the stream closes the socket without sending anything.
            warn!(net = shared.id, %peer, limit = registry.max_sessions(), error = %e, "client rejected");
        }
    }
}

/// One dispatch pass: drain the hardware, then every session in index
/// order, decode and route each complete frame, then purge closed sessions
/// and advance the statistics tick. The registry lock is held for the whole
/// pass so source ids stay stable.
fn dispatch_pass(shared: &Shared, stats: &mut Statistics) {
    let error_frames_enabled = shared.config.lock().unwrap().error_frames_enabled;
    let mut registry = shared.registry.lock().unwrap();
    let mut interface = shared.interface.lock().unwrap();

    if let Some(iface) = interface.as_deref_mut() {
        for _ in 0..MAX_FRAMES_PER_TICK {
            match iface.read() {
                Ok(Some(raw)) => {
                    // Frames from the hardware never go back to it, so the
                    // interface slot is not needed while routing these.
                    route_frame(
                        shared,
                        &mut registry,
                        None,
                        stats,
                        error_frames_enabled,
                        HARDWARE_SOURCE_ID,
                        &raw,
                    );
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(net = shared.id, error = %e, "hardware read failed");
                    break;
                }
            }
        }
    }

    for index in 0..registry.len() {
        let frames = registry.session_mut(index).drain_frames();
        for raw in &frames {
            match interface.as_deref_mut() {
                Some(iface) => route_frame(
                    shared,
                    &mut registry,
                    Some(iface),
                    stats,
                    error_frames_enabled,
                    index,
                    raw,
                ),
                None => route_frame(
                    shared,
                    &mut registry,
                    None,
                    stats,
                    error_frames_enabled,
                    index,
                    raw,
                ),
            }
        }
    }

    registry.purge_closed();
    drop(interface);
    drop(registry);

    let bits_per_second = shared.config.lock().unwrap().bits_per_second;
    stats.tick(bits_per_second);
}

/// Classify one received frame array and route it.
fn route_frame(
    shared: &Shared,
    registry: &mut SessionRegistry,
    interface: Option<&mut dyn CanInterface>,
    stats: &mut Statistics,
    error_frames_enabled: bool,
    source: usize,
    raw: &FrameArray,
) {
    match frame_kind(raw) {
        FrameKind::Can => {
            let frame = match CanFrame::decode(raw) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(net = shared.id, source, error = %e, "malformed CAN frame discarded");
                    return;
                }
            };
            trace!(net = shared.id, source, frame = %frame, "dispatch");
            // A session's CAN frame also goes out on the wire.
            if source != HARDWARE_SOURCE_ID {
                if let Some(interface) = interface {
                    if let Err(e) = interface.write(&frame) {
                        warn!(net = shared.id, error = %e, "hardware write failed");
                    }
                }
            }
            let delivered = registry.fan_out(source, raw);
            if source == HARDWARE_SOURCE_ID || delivered {
                stats.count_can(frame.bit_count());
            }
        }
        FrameKind::Error => {
            if !error_frames_enabled {
                return;
            }
            let delivered = registry.fan_out(source, raw);
            if source == HARDWARE_SOURCE_ID || delivered {
                stats.count_err();
            }
        }
        FrameKind::Api => {
            // Control frames coming out of the hardware are not interpreted.
            if source == HARDWARE_SOURCE_ID {
                return;
            }
            stats.count_api();
            match ApiFrame::decode(raw) {
                Ok(ApiFrame::Bitrate { nominal, data }) => {
                    debug!(net = shared.id, source, nominal, data, "in-band bit-rate change");
                    if let Err(e) = apply_bitrate(&shared.config, interface, nominal, data) {
                        warn!(net = shared.id, error = %e, "hardware bit-rate reconfiguration failed");
                    }
                }
                // Recognized but reserved for extension in the core.
                Ok(_) => {}
                Err(e) => debug!(net = shared.id, source, error = %e, "api frame dropped"),
            }
        }
        FrameKind::Unknown => {
            debug!(net = shared.id, source, byte0 = raw[0], "unknown frame category discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_table_covers_the_standard_rates() {
        assert_eq!(bits_per_second(125_000), Some(125_000));
        assert_eq!(bits_per_second(500_000), Some(500_000));
        assert_eq!(bits_per_second(1_000_000), Some(1_000_000));
        assert_eq!(bits_per_second(123_456), None);
        assert_eq!(bits_per_second(BITRATE_NONE), None);
    }

    #[test]
    fn data_bitrate_is_forced_to_none_without_fd() {
        let network = CanNetwork::new(1, 0);
        network.set_bitrate(250_000, 2_000_000).unwrap();
        assert_eq!(network.nominal_bitrate(), 250_000);
        assert_eq!(network.data_bitrate(), BITRATE_NONE);

        network.set_fast_data_enabled(true);
        network.set_bitrate(500_000, 2_000_000).unwrap();
        assert_eq!(network.data_bitrate(), 2_000_000);
    }

    #[test]
    fn virtual_network_feature_defaults() {
        let network = CanNetwork::new(1, 0);
        assert!(network.has_error_frames_support());
        assert!(network.has_fast_data_support());
        assert!(!network.has_listen_only_support());
        // Listen-only cannot be enabled without hardware support.
        network.set_listen_only_enabled(true);
        assert!(!network.listen_only_enabled());
    }

    #[test]
    fn name_setter_truncates_to_wire_capacity() {
        let network = CanNetwork::new(1, 0);
        network.set_name(&"x".repeat(200));
        assert_eq!(network.name().len(), NAME_MAX_LEN);
    }

    #[tokio::test]
    async fn bind_address_is_locked_while_enabled() {
        let mut network = CanNetwork::new(1, 0);
        assert!(network.set_server_address(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        network.enable().await.unwrap();
        assert!(!network.set_server_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert!(!network.set_dispatch_period(5));
        network.disable();
        assert!(network.set_server_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
    }

    #[tokio::test]
    async fn enable_twice_fails() {
        let mut network = CanNetwork::new(1, 0);
        network.set_server_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        network.enable().await.unwrap();
        assert!(matches!(
            network.enable().await,
            Err(NetworkError::AlreadyEnabled)
        ));
        network.disable();
    }
}
