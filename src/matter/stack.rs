use super::clusters::{
    BOOLEAN_STATE, RELATIVE_HUMIDITY, SensorCell, SensorCluster, SensorClusterHandler,
    TEMPERATURE_MEASUREMENT,
};
use super::device_types::{
    DEV_TYPE_CONTACT_SENSOR, DEV_TYPE_HUMIDITY_SENSOR, DEV_TYPE_TEMPERATURE_SENSOR,
};
use super::netif::{FilteredNetifs, detect_interface, interface_addrs};
use crate::node::{DeviceKind, NodeOptions};
use embassy_futures::select::{select, select4};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use log::{error, info, warn};
use rs_matter::dm::IMBuffer;
use rs_matter::dm::clusters::basic_info::BasicInfoConfig;
use rs_matter::dm::clusters::desc::{self, ClusterHandler as _};
use rs_matter::dm::clusters::net_comm::NetworkType;
use rs_matter::dm::devices::test::TEST_DEV_ATT;
use rs_matter::dm::endpoints;
use rs_matter::dm::subscriptions::DefaultSubscriptions;
use rs_matter::dm::{
    Async, AsyncHandler, AsyncMetadata, DataModel, Dataver, EmptyHandler, Endpoint, EpClMatcher,
    Node,
};
use rs_matter::error::{Error, ErrorCode};
use rs_matter::pairing::DiscoveryCapabilities;
use rs_matter::pairing::qr::QrTextType;
use rs_matter::persist::{NO_NETWORKS, Psm};
use rs_matter::respond::DefaultResponder;
use rs_matter::transport::network::mdns::builtin::{BuiltinMdnsResponder, Host};
use rs_matter::transport::network::mdns::{
    MDNS_IPV4_BROADCAST_ADDR, MDNS_IPV6_BROADCAST_ADDR, MDNS_SOCKET_DEFAULT_BIND_ADDR,
};
use rs_matter::utils::init::InitMaybeUninit;
use rs_matter::utils::select::Coalesce;
use rs_matter::utils::storage::pooled::PooledBuffers;
use rs_matter::{BasicCommData, Matter, clusters, devices};
use socket2::{Domain, Protocol, Socket, Type};
use static_cell::StaticCell;
use std::fs;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Static cells for Matter resources (required for 'static lifetime)
static MATTER: StaticCell<Matter> = StaticCell::new();
static BUFFERS: StaticCell<PooledBuffers<10, NoopRawMutex, IMBuffer>> = StaticCell::new();
static SUBSCRIPTIONS: StaticCell<DefaultSubscriptions> = StaticCell::new();
static PSM: StaticCell<Psm<4096>> = StaticCell::new();

static HOSTNAME: OnceLock<String> = OnceLock::new();
static NETIFS: OnceLock<FilteredNetifs> = OnceLock::new();

const COMM_WINDOW_TIMEOUT_SECS: u16 = 900;

/// Endpoint id of the single sensor endpoint
pub const SENSOR_ENDPOINT_ID: u16 = 1;

const CONTACT_NODE: Node<'static> = Node {
    id: 0,
    endpoints: &[
        endpoints::root_endpoint(NetworkType::Ethernet),
        Endpoint {
            id: SENSOR_ENDPOINT_ID,
            device_types: devices!(DEV_TYPE_CONTACT_SENSOR),
            clusters: clusters!(desc::DescHandler::CLUSTER, BOOLEAN_STATE.cluster),
        },
    ],
};

const TEMPERATURE_NODE: Node<'static> = Node {
    id: 0,
    endpoints: &[
        endpoints::root_endpoint(NetworkType::Ethernet),
        Endpoint {
            id: SENSOR_ENDPOINT_ID,
            device_types: devices!(DEV_TYPE_TEMPERATURE_SENSOR),
            clusters: clusters!(desc::DescHandler::CLUSTER, TEMPERATURE_MEASUREMENT.cluster),
        },
    ],
};

const HUMIDITY_NODE: Node<'static> = Node {
    id: 0,
    endpoints: &[
        endpoints::root_endpoint(NetworkType::Ethernet),
        Endpoint {
            id: SENSOR_ENDPOINT_ID,
            device_types: devices!(DEV_TYPE_HUMIDITY_SENSOR),
            clusters: clusters!(desc::DescHandler::CLUSTER, RELATIVE_HUMIDITY.cluster),
        },
    ],
};

fn node_for(kind: DeviceKind) -> Node<'static> {
    match kind {
        DeviceKind::ContactSensor => CONTACT_NODE,
        DeviceKind::TemperatureSensor => TEMPERATURE_NODE,
        DeviceKind::HumiditySensor => HUMIDITY_NODE,
    }
}

fn cluster_for(kind: DeviceKind) -> &'static SensorCluster {
    match kind {
        DeviceKind::ContactSensor => &BOOLEAN_STATE,
        DeviceKind::TemperatureSensor => &TEMPERATURE_MEASUREMENT,
        DeviceKind::HumiditySensor => &RELATIVE_HUMIDITY,
    }
}

/// Everything the stack thread needs.
pub struct StackParams {
    pub options: NodeOptions,
    pub kind: DeviceKind,
    pub sensor: Arc<SensorCell>,
    pub storage_dir: PathBuf,
    pub interface: Option<String>,
}

fn persist_path(storage_dir: &Path, node_id: &str) -> PathBuf {
    let name: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    storage_dir.join(format!("node-{}.bin", name))
}

/// BasicInformation values. Matter keeps references for the process lifetime.
fn leak_basic_info(options: &NodeOptions) -> &'static BasicInfoConfig<'static> {
    let product = &options.product;
    Box::leak(Box::new(BasicInfoConfig {
        vid: product.vendor_id,
        pid: product.product_id,
        hw_ver: 1,
        hw_ver_str: "1",
        sw_ver: 1,
        sw_ver_str: env!("CARGO_PKG_VERSION"),
        serial_no: product.serial_number.clone().leak(),
        device_name: product.node_label.clone().leak(),
        product_name: product.product_name.clone().leak(),
        vendor_name: product.vendor_name.clone().leak(),
        ..BasicInfoConfig::new()
    }))
}

fn io_error(what: &str, e: std::io::Error) -> Error {
    error!("[Matter] {}: {}", what, e);
    ErrorCode::StdIoError.into()
}

/// Build the data model handler: descriptor plus the one sensor cluster.
fn dm_handler<'a>(
    matter: &'a Matter<'a>,
    node: Node<'static>,
    netifs: &'a FilteredNetifs,
    sensor: &'a SensorClusterHandler,
) -> impl AsyncMetadata + AsyncHandler + 'a {
    (
        node,
        endpoints::with_eth(
            &(),
            netifs,
            matter.rand(),
            endpoints::with_sys(
                &false,
                matter.rand(),
                EmptyHandler
                    .chain(
                        EpClMatcher::new(
                            Some(SENSOR_ENDPOINT_ID),
                            Some(desc::DescHandler::CLUSTER.id),
                        ),
                        Async(desc::DescHandler::new(Dataver::new_rand(matter.rand())).adapt()),
                    )
                    .chain(
                        EpClMatcher::new(Some(SENSOR_ENDPOINT_ID), Some(sensor.cluster_id())),
                        Async(sensor),
                    ),
            ),
        ),
    )
}

/// Run the Matter stack until it fails or `stop` is cancelled.
///
/// Must run on a dedicated thread (`futures_lite::future::block_on`); the
/// static cells allow one stack per process.
pub async fn run_matter_stack(params: StackParams, stop: CancellationToken) -> Result<(), Error> {
    info!("[Matter] Initializing Matter stack...");

    let commissioning = &params.options.commissioning;
    let dev_det = leak_basic_info(&params.options);
    let dev_comm = BasicCommData {
        password: commissioning.passcode,
        discriminator: commissioning.discriminator,
    };

    let matter = MATTER.uninit().init_with(Matter::init(
        dev_det,
        dev_comm,
        &TEST_DEV_ATT,
        rs_matter::utils::epoch::sys_epoch,
        rs_matter::utils::rand::sys_rand,
        commissioning.port,
    ));
    matter.initialize_transport_buffers()?;

    // Bind to the address we advertise so responses leave from the same source
    let interface_name: &'static str = detect_interface(params.interface.as_deref())?.leak();
    let Some(addrs) = interface_addrs(interface_name) else {
        error!("[Matter] Interface '{}' not found", interface_name);
        return Err(ErrorCode::NoNetworkInterface.into());
    };
    let Some(ipv4_addr) = addrs.ipv4.first().copied() else {
        error!("[Matter] No IPv4 address found on interface '{}'", interface_name);
        return Err(ErrorCode::NoNetworkInterface.into());
    };
    let ipv6_addr = addrs.ipv6.first().copied().unwrap_or_else(|| {
        info!(
            "[Matter] No global IPv6 address on '{}', using unspecified",
            interface_name
        );
        Ipv6Addr::UNSPECIFIED
    });
    let netifs = NETIFS.get_or_init(|| FilteredNetifs::new(interface_name));
    info!(
        "[Matter] Using interface '{}' (index {}) with {} and {}",
        interface_name, addrs.index, ipv4_addr, ipv6_addr
    );

    let raw_socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| io_error("Failed to create UDP socket", e))?;
    raw_socket
        .set_reuse_address(true)
        .map_err(|e| io_error("Failed to set SO_REUSEADDR", e))?;
    raw_socket
        .set_only_v6(false)
        .map_err(|e| io_error("Failed to set IPV6_V6ONLY=false", e))?;
    raw_socket
        .set_nonblocking(true)
        .map_err(|e| io_error("Failed to set non-blocking", e))?;
    let bind_addr = SocketAddr::new(IpAddr::V6(ipv6_addr), commissioning.port);
    raw_socket
        .bind(&bind_addr.into())
        .map_err(|e| io_error("Failed to bind UDP socket", e))?;
    let socket = async_io::Async::<UdpSocket>::new(raw_socket.into())
        .map_err(|e| io_error("Failed to create async socket", e))?;
    info!("[Matter] UDP socket bound to {:?}", bind_addr);

    // Fabrics and ACLs survive restarts
    let persist_path = persist_path(&params.storage_dir, &params.options.id);
    if let Some(parent) = persist_path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        error!("[Matter] Failed to create {:?}: {}", parent, e);
    }
    let psm = PSM.uninit().init_with(Psm::init());
    if let Err(e) = psm.load(&persist_path, matter, NO_NETWORKS) {
        warn!(
            "[Matter] Failed to load persisted state from {:?}: {:?}",
            persist_path, e
        );
    }

    if matter.is_commissioned() {
        info!("[Matter] Already commissioned, skipping commissioning window");
        info!("[Matter]   (Use --storage-clear to reset commissioning)");
    } else {
        info!(
            "[Matter] Opening commissioning window for {} seconds...",
            COMM_WINDOW_TIMEOUT_SECS
        );
        matter.open_basic_comm_window(COMM_WINDOW_TIMEOUT_SECS)?;
        if let Err(e) = matter.print_standard_qr_text(DiscoveryCapabilities::IP) {
            error!("[Matter] Failed to print QR text: {:?}", e);
        }
        if let Err(e) =
            matter.print_standard_qr_code(QrTextType::Unicode, DiscoveryCapabilities::IP)
        {
            error!("[Matter] Failed to print QR code: {:?}", e);
        }
    }

    let buffers = BUFFERS.uninit().init_with(PooledBuffers::init(0));
    let subscriptions = SUBSCRIPTIONS
        .uninit()
        .init_with(DefaultSubscriptions::init());

    let sensor = SensorClusterHandler::new(
        cluster_for(params.kind),
        Dataver::new_rand(matter.rand()),
        params.sensor.clone(),
    );
    let handler = dm_handler(matter, node_for(params.kind), netifs, &sensor);
    let dm = DataModel::new(matter, buffers, subscriptions, handler);
    let responder = DefaultResponder::new(&dm);

    let mut transport = pin!(matter.run(&socket, &socket));

    let mdns_socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| io_error("Failed to create mDNS socket", e))?;
    mdns_socket
        .set_reuse_address(true)
        .map_err(|e| io_error("Failed to set SO_REUSEADDR on mDNS socket", e))?;
    mdns_socket
        .set_only_v6(false)
        .map_err(|e| io_error("Failed to set IPV6_V6ONLY=false on mDNS socket", e))?;
    mdns_socket
        .set_nonblocking(true)
        .map_err(|e| io_error("Failed to set non-blocking on mDNS socket", e))?;
    mdns_socket
        .bind(&MDNS_SOCKET_DEFAULT_BIND_ADDR.into())
        .map_err(|e| io_error("Failed to bind mDNS socket", e))?;
    let mdns_socket = async_io::Async::<UdpSocket>::new_nonblocking(mdns_socket.into())
        .map_err(|e| io_error("Failed to create async mDNS socket", e))?;
    mdns_socket
        .get_ref()
        .join_multicast_v6(&MDNS_IPV6_BROADCAST_ADDR, addrs.index)
        .map_err(|e| io_error("Failed to join IPv6 multicast group", e))?;
    mdns_socket
        .get_ref()
        .join_multicast_v4(&MDNS_IPV4_BROADCAST_ADDR, &ipv4_addr)
        .map_err(|e| io_error("Failed to join IPv4 multicast group", e))?;

    let hostname =
        HOSTNAME.get_or_init(|| gethostname::gethostname().to_string_lossy().into_owned());
    let host = Host {
        id: 0,
        hostname,
        ip: ipv4_addr.octets().into(),
        ipv6: ipv6_addr.octets().into(),
    };
    let mdns_responder = BuiltinMdnsResponder::new(matter);
    let mut mdns = pin!(mdns_responder.run(
        &mdns_socket,
        &mdns_socket,
        &host,
        Some(ipv4_addr.octets().into()),
        Some(addrs.index),
    ));

    let mut respond = pin!(responder.run::<4, 4>());
    let mut dm_job = pin!(dm.run());
    let mut persist = pin!(psm.run(&persist_path, matter, NO_NETWORKS));
    let mut stopped = pin!(async {
        stop.cancelled().await;
        info!("[Matter] Stop requested");
        Ok::<(), Error>(())
    });

    info!("[Matter] Stack running. Waiting for controller connections...");

    let result = select4(
        &mut transport,
        &mut mdns,
        select(&mut respond, &mut dm_job).coalesce(),
        select(&mut persist, &mut stopped).coalesce(),
    )
    .coalesce()
    .await;

    if let Err(e) = &result {
        error!("[Matter] Stack error: {:?}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_path_is_per_node() {
        assert_eq!(
            persist_path(Path::new("/data"), "gpio-contact-node"),
            PathBuf::from("/data/node-gpio-contact-node.bin")
        );
        assert_eq!(
            persist_path(Path::new("/data"), "a/b"),
            PathBuf::from("/data/node-a_b.bin")
        );
    }

    #[test]
    fn test_node_metadata_matches_kind() {
        let node = node_for(DeviceKind::HumiditySensor);
        assert_eq!(node.endpoints[1].device_types[0].dtype, 0x0307);
        assert_eq!(node.endpoints[1].clusters[1].id, 0x0405);
        assert_eq!(
            cluster_for(DeviceKind::HumiditySensor).cluster.id,
            node.endpoints[1].clusters[1].id
        );
    }
}
