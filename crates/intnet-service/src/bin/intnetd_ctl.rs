//! `intnetd-ctl`: a small CLI that drives [`intnet_service::Service`]
//! in-process. There is no real IPC/XPC transport to exercise — this binary
//! stands in for one, wiring `clap`-parsed arguments straight into
//! `Service::dispatch` calls the way a real client process would make them
//! over a socket.

use clap::{Parser, ValueEnum};
use intnet_proto::{
    IfHandle, InterfaceOpenFlags, NetworkOpenFlags, Request, Response, TrunkType,
};
use intnet_service::Service;
use intnet_wire::Mac;

#[derive(Parser, Debug)]
#[command(name = "intnetd-ctl", about = "Drive an in-process intnet switch")]
struct Args {
    /// Network name both demo interfaces join.
    #[arg(long, default_value = "demo")]
    network: String,

    /// Trunk kind to attach to the network, if any.
    #[arg(long, value_enum, default_value_t = CliTrunkType::None)]
    trunk: CliTrunkType,

    /// Receive/send ring capacity per interface, in bytes.
    #[arg(long, default_value_t = 65536)]
    ring_bytes: u32,

    /// How long the receiving interface waits for the frame, in
    /// milliseconds.
    #[arg(long, default_value_t = 1000)]
    wait_ms: u32,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliTrunkType {
    None,
    NetFlt,
    NetAdp,
    SrvNat,
}

impl From<CliTrunkType> for TrunkType {
    fn from(value: CliTrunkType) -> Self {
        match value {
            CliTrunkType::None => TrunkType::None,
            CliTrunkType::NetFlt => TrunkType::NetFlt,
            CliTrunkType::NetAdp => TrunkType::NetAdp,
            CliTrunkType::SrvNat => TrunkType::SrvNat,
        }
    }
}

fn open_interface(service: &Service, args: &Args) -> IfHandle {
    match service.dispatch(Request::Open {
        network: args.network.clone(),
        trunk_type: args.trunk.into(),
        trunk_name: None,
        network_flags: NetworkOpenFlags::empty(),
        if_flags: InterfaceOpenFlags::empty(),
        recv_buf_size: args.ring_bytes,
        send_buf_size: args.ring_bytes,
    }) {
        Response::Open { handle, .. } => handle,
        other => panic!("unexpected Open response: {other:?}"),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let service = Service::new();

    let sender = open_interface(&service, &args);
    let receiver = open_interface(&service, &args);

    service.dispatch(Request::IfSetActive {
        handle: sender,
        active: true,
    });
    service.dispatch(Request::IfSetActive {
        handle: receiver,
        active: true,
    });

    let sender_mac = Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    service.dispatch(Request::IfSetMacAddress {
        handle: sender,
        mac: sender_mac,
    });

    let mut frame = vec![0u8; 60];
    frame[0..6].copy_from_slice(Mac::BROADCAST.as_bytes());
    frame[6..12].copy_from_slice(sender_mac.as_bytes());
    // A trivial IPv4/UDP-ish payload so snooping has something to chew on;
    // the switching decision itself only looks at the Ethernet header.
    frame[12] = 0x08;
    frame[13] = 0x00;

    write_to_send_ring(&service, sender, &frame);

    match service.dispatch(Request::IfSend { handle: sender }) {
        Response::IfSend => {}
        other => panic!("unexpected IfSend response: {other:?}"),
    }

    let wait_resp = service.dispatch(Request::IfWait {
        handle: receiver,
        timeout_ms: Some(args.wait_ms),
    });

    match wait_resp {
        Response::IfWait { frame_available: true } => {
            println!(
                "network {:?}: broadcast delivered to the other interface",
                args.network
            );
        }
        Response::IfWait { frame_available: false } => {
            println!(
                "network {:?}: timed out after {}ms waiting for the frame",
                args.network, args.wait_ms
            );
            std::process::exit(1);
        }
        other => panic!("unexpected IfWait response: {other:?}"),
    }

    service.dispatch(Request::IfClose { handle: sender });
    service.dispatch(Request::IfClose { handle: receiver });
}

fn write_to_send_ring(service: &Service, handle: IfHandle, frame: &[u8]) {
    // `intnetd-ctl` has no separate client process to hand the ring
    // pointers to, so it reaches straight into the service's own handle
    // table. A real client gets these bytes via `IfGetBufferPtrs` and maps
    // the ring itself; this is the in-process stand-in for that hand-off.
    let iface = service
        .interface(handle)
        .expect("just-opened handle must still be valid");
    let mut reservation = iface
        .buf
        .send
        .allocate_frame(frame.len())
        .expect("fresh ring has room for one small frame");
    reservation.payload_mut().copy_from_slice(frame);
    iface.buf.send.commit(reservation);
}
