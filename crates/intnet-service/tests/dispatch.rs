//! End-to-end scenarios driven purely through `Service::dispatch`, the way
//! a real client would see the system: two guests joining a network,
//! learning each other's MAC, and a policy conflict surfacing as an error
//! response instead of a panic.

use intnet_proto::{
    IfHandle, InterfaceOpenFlags, NetworkOpenFlags, Request, Response, TrunkType,
};
use intnet_service::Service;
use intnet_wire::Mac;

fn open(service: &Service, network: &str, if_flags: InterfaceOpenFlags) -> IfHandle {
    match service.dispatch(Request::Open {
        network: network.to_string(),
        trunk_type: TrunkType::None,
        trunk_name: None,
        network_flags: NetworkOpenFlags::empty(),
        if_flags,
        recv_buf_size: 16384,
        send_buf_size: 16384,
    }) {
        Response::Open { handle, .. } => handle,
        other => panic!("unexpected response: {other:?}"),
    }
}

fn activate(service: &Service, handle: IfHandle) {
    assert!(matches!(
        service.dispatch(Request::IfSetActive { handle, active: true }),
        Response::IfSetActive
    ));
}

fn push_frame(service: &Service, handle: IfHandle, frame: &[u8]) {
    let iface = service.interface(handle).unwrap();
    let mut reservation = iface.buf.send.allocate_frame(frame.len()).unwrap();
    reservation.payload_mut().copy_from_slice(frame);
    iface.buf.send.commit(reservation);
}

fn eth_frame(dst: Mac, src: Mac) -> Vec<u8> {
    let mut frame = vec![0u8; 60];
    frame[0..6].copy_from_slice(dst.as_bytes());
    frame[6..12].copy_from_slice(src.as_bytes());
    frame
}

#[test]
fn two_guests_learn_each_other_and_exchange_unicast_traffic() {
    let service = Service::new();
    let a = open(&service, "lan", InterfaceOpenFlags::empty());
    let b = open(&service, "lan", InterfaceOpenFlags::empty());
    activate(&service, a);
    activate(&service, b);

    let a_mac = Mac([2, 0, 0, 0, 0, 0xA]);
    let b_mac = Mac([2, 0, 0, 0, 0, 0xB]);
    service.dispatch(Request::IfSetMacAddress { handle: a, mac: a_mac });
    service.dispatch(Request::IfSetMacAddress { handle: b, mac: b_mac });

    // a -> b: both MACs were assigned explicitly above, so this is a plain
    // exact unicast match against the MAC table.
    push_frame(&service, a, &eth_frame(b_mac, a_mac));
    service.dispatch(Request::IfSend { handle: a });
    let resp = service.dispatch(Request::IfWait {
        handle: b,
        timeout_ms: Some(200),
    });
    assert!(matches!(resp, Response::IfWait { frame_available: true }));

    // b -> a: now that a has been learned, the reply is an exact unicast.
    push_frame(&service, b, &eth_frame(a_mac, b_mac));
    service.dispatch(Request::IfSend { handle: b });
    let resp = service.dispatch(Request::IfWait {
        handle: a,
        timeout_ms: Some(200),
    });
    assert!(matches!(resp, Response::IfWait { frame_available: true }));
}

#[test]
fn promiscuous_request_without_network_policy_support_is_rejected() {
    let service = Service::new();
    let a = open(&service, "locked-down", InterfaceOpenFlags::empty());
    let resp = service.dispatch(Request::IfSetPromiscuous {
        handle: a,
        promiscuous: true,
    });
    assert!(matches!(resp, Response::Error(_)));
}

#[test]
fn abort_wait_unblocks_a_waiting_interface_with_no_frame() {
    let service = Service::new();
    let a = open(&service, "solo", InterfaceOpenFlags::empty());
    activate(&service, a);

    let aborter = std::thread::spawn({
        let iface = service.interface(a).unwrap();
        move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            iface.abort_wait(false);
        }
    });

    let resp = service.dispatch(Request::IfWait {
        handle: a,
        timeout_ms: None,
    });
    aborter.join().unwrap();
    assert!(matches!(resp, Response::IfWait { frame_available: false }));
}

#[test]
fn closing_an_interface_forgets_its_handle() {
    let service = Service::new();
    let a = open(&service, "ephemeral", InterfaceOpenFlags::empty());
    assert!(matches!(
        service.dispatch(Request::IfClose { handle: a }),
        Response::IfClose
    ));
    assert!(matches!(
        service.dispatch(Request::IfGetBufferPtrs { handle: a }),
        Response::Error(intnet_proto::IntNetError::InvalidHandle)
    ));
}
