//! The top-level service: a handle table keyed by [`IfHandle`], network
//! registry keyed by name, and a `dispatch` entry point implementing the
//! full §6.1 `Request`/`Response` message set (original
//! `SrvIntNetR0ServiceRequest`'s big dispatch switch).
//!
//! There is no real IPC/XPC transport here — `dispatch` *is* the transport
//! boundary. A real deployment would put this behind a socket or driver
//! ioctl; that plumbing is explicitly out of scope (see the crate's
//! `intnetd-ctl` binary, which calls `dispatch` in-process as a stand-in).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use intnet_backend::{Sg, TrunkDst, TrunkInterfacePort};
use intnet_proto::{
    IfHandle, IntNetError, InterfaceOpenFlags, NetworkOpenFlags, Request, Response, TrunkType,
};
use intnet_switch::{If, Network, Trunk, TrunkReconnectFactory};
use intnet_wire::Mac;

/// Stand-in trunk backend for trunk types this service can't actually wire
/// to a NIC filter, host adapter, or NAT engine (all out of scope per the
/// crate's Non-goals). It accepts every transmit and reports itself always
/// idle, which is enough to exercise the switch's trunk-aware code paths —
/// cross-leg forwarding, GSO fallback, MAC sharing — without a real network
/// underneath.
#[derive(Debug, Default)]
pub struct NullTrunkBackend;

impl TrunkInterfacePort for NullTrunkBackend {
    fn xmit(&self, _sg: &Sg<'_>, _dst: TrunkDst) -> bool {
        true
    }

    fn set_promiscuous_mode(&self, _promiscuous: bool) {}

    fn wait_for_idle(&self, _millies: u32) -> bool {
        true
    }

    fn disconnect_and_release(&self) {}
}

fn null_trunk_factory() -> TrunkReconnectFactory {
    Arc::new(|| Some(Box::new(NullTrunkBackend) as Box<dyn TrunkInterfacePort>))
}

struct IfEntry {
    network: Arc<Network>,
    iface: Arc<If>,
}

/// Session-scoped handle table plus the single registry of live networks.
/// `create_mutex` is this object's own big mutex (spec §5): held only
/// around the structural open/close transitions, released before anything
/// that can block.
pub struct Service {
    networks: RwLock<HashMap<String, Arc<Network>>>,
    ifs: RwLock<HashMap<IfHandle, IfEntry>>,
    create_mutex: Mutex<()>,
}

impl Service {
    pub fn new() -> Self {
        Self {
            networks: RwLock::new(HashMap::new()),
            ifs: RwLock::new(HashMap::new()),
            create_mutex: Mutex::new(()),
        }
    }

    /// Number of interfaces currently open across every network, exposed
    /// for `intnetd-ctl`'s status output.
    pub fn open_interface_count(&self) -> usize {
        self.ifs.read().unwrap().len()
    }

    /// Direct access to an open interface's ring pair. Stands in for the
    /// buffer hand-off a real client gets from `IfGetBufferPtrs` — there is
    /// no separate client process here to map the rings into, so
    /// `intnetd-ctl` reaches through the service instead.
    pub fn interface(&self, handle: IfHandle) -> Option<Arc<If>> {
        self.ifs.read().unwrap().get(&handle).map(|e| e.iface.clone())
    }

    pub fn dispatch(&self, req: Request) -> Response {
        match req {
            Request::Open {
                network,
                trunk_type,
                trunk_name,
                network_flags,
                if_flags,
                recv_buf_size,
                send_buf_size,
            } => self.open(
                network,
                trunk_type,
                trunk_name,
                network_flags,
                if_flags,
                recv_buf_size,
                send_buf_size,
            ),
            Request::IfClose { handle } => self.close(handle),
            Request::IfGetBufferPtrs { handle } => self.get_buffer_ptrs(handle),
            Request::IfSetPromiscuous { handle, promiscuous } => {
                self.set_promiscuous(handle, promiscuous)
            }
            Request::IfSetMacAddress { handle, mac } => self.set_mac_address(handle, mac),
            Request::IfSetActive { handle, active } => self.set_active(handle, active),
            Request::IfSend { handle } => self.send(handle),
            Request::IfWait { handle, timeout_ms } => self.wait(handle, timeout_ms),
            Request::IfAbortWait { handle, no_more_waits } => self.abort_wait(handle, no_more_waits),
        }
    }

    fn open(
        &self,
        network: String,
        trunk_type: TrunkType,
        trunk_name: Option<String>,
        network_flags: NetworkOpenFlags,
        if_flags: InterfaceOpenFlags,
        recv_buf_size: u32,
        send_buf_size: u32,
    ) -> Response {
        if let Err(e) = network_flags.validate() {
            return Response::Error(e);
        }
        if let Err(e) = if_flags.validate() {
            return Response::Error(e);
        }

        let _guard = self.create_mutex.lock().unwrap();
        let net = match self.join_or_create_network(
            &network,
            trunk_type,
            trunk_name,
            network_flags,
            if_flags,
        ) {
            Ok(net) => net,
            Err(e) => return Response::Error(e),
        };

        let handle = IfHandle::next();
        let iface = Arc::new(If::new(
            handle,
            Mac::DUMMY,
            if_flags,
            recv_buf_size,
            send_buf_size,
        ));
        if let Err(e) = net.add_if(iface.clone()) {
            return Response::Error(e);
        }
        tracing::info!(%network, if_handle = handle.as_u64(), "interface opened");

        self.ifs.write().unwrap().insert(
            handle,
            IfEntry {
                network: net,
                iface: iface.clone(),
            },
        );
        Response::Open {
            handle,
            mac: iface.mac(),
        }
    }

    fn join_or_create_network(
        &self,
        name: &str,
        trunk_type: TrunkType,
        trunk_name: Option<String>,
        network_flags: NetworkOpenFlags,
        if_flags: InterfaceOpenFlags,
    ) -> intnet_proto::Result<Arc<Network>> {
        let mut networks = self.networks.write().unwrap();
        if let Some(existing) = networks.get(name) {
            match existing.trunk() {
                Some(trunk) if !trunk_type.is_wildcard_on_join() && trunk.trunk_type != trunk_type => {
                    return Err(IntNetError::IncompatibleTrunk);
                }
                None if !matches!(trunk_type, TrunkType::None) && !trunk_type.is_wildcard_on_join() => {
                    return Err(IntNetError::IncompatibleTrunk);
                }
                _ => {}
            }
            existing.merge_open_flags(network_flags, if_flags)?;
            return Ok(existing.clone());
        }

        let net = Network::new(name.to_string(), network_flags);
        if !matches!(trunk_type, TrunkType::None) {
            let backend: Box<dyn TrunkInterfacePort> = Box::new(NullTrunkBackend);
            let name = trunk_name.unwrap_or_else(|| format!("{name}-trunk"));
            let trunk = Arc::new(Trunk::new(name, trunk_type, backend));
            net.attach_trunk(trunk.clone(), Some(null_trunk_factory()));
            trunk.set_active(true);
        }
        tracing::info!(network = %name, ?trunk_type, "network created");
        networks.insert(net.name.clone(), net.clone());
        Ok(net)
    }

    fn lookup(&self, handle: IfHandle) -> intnet_proto::Result<(Arc<Network>, Arc<If>)> {
        self.ifs
            .read()
            .unwrap()
            .get(&handle)
            .map(|e| (e.network.clone(), e.iface.clone()))
            .ok_or(IntNetError::InvalidHandle)
    }

    fn close(&self, handle: IfHandle) -> Response {
        let _guard = self.create_mutex.lock().unwrap();
        match self.ifs.write().unwrap().remove(&handle) {
            Some(entry) => {
                entry.iface.abort_wait(true);
                entry.network.remove_if(handle);
                tracing::info!(network = %entry.network.name, if_handle = handle.as_u64(), "interface closed");
                Response::IfClose
            }
            None => Response::Error(IntNetError::InvalidHandle),
        }
    }

    fn get_buffer_ptrs(&self, handle: IfHandle) -> Response {
        match self.lookup(handle) {
            Ok((_, iface)) => Response::IfGetBufferPtrs {
                recv_ring_bytes: iface.buf.recv.capacity_bytes(),
                send_ring_bytes: iface.buf.send.capacity_bytes(),
            },
            Err(e) => Response::Error(e),
        }
    }

    fn set_promiscuous(&self, handle: IfHandle, promiscuous: bool) -> Response {
        match self.lookup(handle) {
            Ok((net, iface)) => {
                let allowed = !promiscuous
                    || iface.open_flags().wants_promiscuous()
                    || net.flags().clients_may_go_promiscuous();
                if !allowed {
                    return Response::Error(IntNetError::IncompatibleFlags);
                }
                net.set_promiscuous(handle, promiscuous);
                Response::IfSetPromiscuous
            }
            Err(e) => Response::Error(e),
        }
    }

    fn set_mac_address(&self, handle: IfHandle, mac: Mac) -> Response {
        match self.lookup(handle) {
            Ok((net, iface)) => {
                iface.set_mac(mac);
                net.mac_tab.learn(mac, handle);
                Response::IfSetMacAddress
            }
            Err(e) => Response::Error(e),
        }
    }

    fn set_active(&self, handle: IfHandle, active: bool) -> Response {
        match self.lookup(handle) {
            Ok((net, _)) => {
                net.set_active(handle, active);
                Response::IfSetActive
            }
            Err(e) => Response::Error(e),
        }
    }

    fn send(&self, handle: IfHandle) -> Response {
        match self.lookup(handle) {
            Ok((net, _)) => match net.pump_send(handle) {
                Ok(()) => Response::IfSend,
                Err(e) => Response::Error(e),
            },
            Err(e) => Response::Error(e),
        }
    }

    fn wait(&self, handle: IfHandle, timeout_ms: Option<u32>) -> Response {
        use intnet_switch::WaitOutcome;
        match self.lookup(handle) {
            Ok((_, iface)) => {
                let timeout = timeout_ms.map(|ms| Duration::from_millis(u64::from(ms)));
                match iface.wait_for_recv(timeout) {
                    WaitOutcome::FrameAvailable => Response::IfWait { frame_available: true },
                    WaitOutcome::Timeout => Response::IfWait { frame_available: false },
                    WaitOutcome::Destroyed => Response::Error(IntNetError::SemDestroyed),
                }
            }
            Err(e) => Response::Error(e),
        }
    }

    fn abort_wait(&self, handle: IfHandle, no_more_waits: bool) -> Response {
        match self.lookup(handle) {
            Ok((_, iface)) => {
                iface.abort_wait(no_more_waits);
                Response::IfAbortWait
            }
            Err(e) => Response::Error(e),
        }
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}
