//! Service request/response flows between two nodes on a shared segment.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use polycyphal::core::{NodeId, Priority, ServiceId, TransferId};
use polycyphal::media::memory::MemoryResources;
use polycyphal::session::{
    RequestRxParams, RequestTxParams, ResponseRxParams, ResponseTxParams, ServiceRxTransfer,
    ServiceTransferMetadata, TransferMetadata,
};
use polycyphal::time::Instant;
use polycyphal::transport::UdpTransport;

use common::{MediaState, MockMedia};

const CLIENT: NodeId = NodeId::new(0x0c).unwrap();
const SERVER: NodeId = NodeId::new(0x0d).unwrap();
const SERVICE: ServiceId = ServiceId::new(5).unwrap();

struct Network {
    client: UdpTransport,
    server: UdpTransport,
    client_state: Rc<MediaState>,
    server_state: Rc<MediaState>,
}

fn make_network(mtu: usize) -> Network {
    let resources = MemoryResources::default();
    let ((client_media, client_state), (server_media, server_state)) =
        MockMedia::linked_pair(resources.payload.clone());
    client_state.mtu.set(mtu);
    server_state.mtu.set(mtu);

    let client = UdpTransport::new(resources.clone(), vec![client_media], 16).unwrap();
    let server = UdpTransport::new(resources, vec![server_media], 16).unwrap();
    client.set_local_node_id(CLIENT).unwrap();
    server.set_local_node_id(SERVER).unwrap();

    Network {
        client,
        server,
        client_state,
        server_state,
    }
}

#[test]
fn test_request_response_correlation() {
    let _guard = common::time_lock();
    let network = make_network(polycyphal::media::socket::DEFAULT_MTU);

    // Server side: requests in, echoed responses out.
    let request_rx = network
        .server
        .make_request_rx_session(RequestRxParams {
            extent_bytes: 64,
            service_id: SERVICE,
        })
        .unwrap();
    let response_tx = Rc::new(
        network
            .server
            .make_response_tx_session(ResponseTxParams { service_id: SERVICE })
            .unwrap(),
    );
    let server_seen: Rc<RefCell<Vec<(TransferId, Priority, NodeId)>>> =
        Rc::new(RefCell::new(Vec::new()));

    let responder = response_tx.clone();
    let seen = server_seen.clone();
    request_rx.set_on_receive(move |request: ServiceRxTransfer| {
        seen.borrow_mut().push((
            request.metadata.base.transfer_id,
            request.metadata.base.priority,
            request.metadata.remote_node_id,
        ));
        // Echo the payload back, correlating by the request's transfer id.
        let mut echoed: Vec<u8> = request.payload.to_vec();
        echoed.reverse();
        responder
            .send(
                &ServiceTransferMetadata {
                    base: TransferMetadata {
                        transfer_id: request.metadata.base.transfer_id,
                        timestamp: Instant::now(),
                        priority: request.metadata.base.priority,
                    },
                    remote_node_id: request.metadata.remote_node_id,
                },
                &[&echoed],
            )
            .unwrap();
    });

    // Client side.
    let request_tx = network
        .client
        .make_request_tx_session(RequestTxParams {
            service_id: SERVICE,
            server_node_id: SERVER,
        })
        .unwrap();
    let response_rx = network
        .client
        .make_response_rx_session(ResponseRxParams {
            extent_bytes: 64,
            service_id: SERVICE,
            server_node_id: SERVER,
        })
        .unwrap();
    let responses: Rc<RefCell<Vec<ServiceRxTransfer>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = responses.clone();
    response_rx.set_on_receive(move |transfer| sink.borrow_mut().push(transfer));

    request_tx
        .send(
            &TransferMetadata {
                transfer_id: TransferId::new(7),
                timestamp: Instant::now(),
                priority: Priority::Fast,
            },
            &[&[1, 2, 3]],
        )
        .unwrap();

    network.client.run(Instant::now()).unwrap(); // request hits the wire
    network.server.run(Instant::now()).unwrap(); // request in, response queued
    network.server.run(Instant::now()).unwrap(); // response hits the wire
    network.client.run(Instant::now()).unwrap(); // response in

    assert_eq!(&*server_seen.borrow(), &[(TransferId::new(7), Priority::Fast, CLIENT)]);

    let responses = responses.borrow();
    assert_eq!(responses.len(), 1);
    assert_eq!(&responses[0].payload[..], &[3, 2, 1]);
    assert_eq!(responses[0].metadata.base.transfer_id, TransferId::new(7));
    assert_eq!(responses[0].metadata.base.priority, Priority::Fast);
    assert_eq!(responses[0].metadata.remote_node_id, SERVER);
}

#[test]
fn test_two_frame_request_reassembles_once() {
    let _guard = common::time_lock();
    // MTU 8: a 12-byte request plus its 4 CRC bytes fragments into two frames.
    let network = make_network(8);

    let request_rx = network
        .server
        .make_request_rx_session(RequestRxParams {
            extent_bytes: 64,
            service_id: SERVICE,
        })
        .unwrap();
    let received: Rc<RefCell<Vec<ServiceRxTransfer>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    request_rx.set_on_receive(move |transfer| sink.borrow_mut().push(transfer));

    let request_tx = network
        .client
        .make_request_tx_session(RequestTxParams {
            service_id: SERVICE,
            server_node_id: SERVER,
        })
        .unwrap();

    let payload: Vec<u8> = (100u8..112).collect();
    request_tx
        .send(
            &TransferMetadata {
                transfer_id: TransferId::new(3),
                timestamp: Instant::now(),
                priority: Priority::Nominal,
            },
            &[&payload],
        )
        .unwrap();

    network.client.run(Instant::now()).unwrap();
    assert_eq!(network.client_state.sent.borrow().len(), 2);

    network.server.run(Instant::now()).unwrap();

    // Exactly one callback with the concatenated payload.
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(&received[0].payload[..], &payload[..]);
    assert_eq!(received[0].metadata.base.transfer_id, TransferId::new(3));
}

#[test]
fn test_duplicate_request_session_rejected_until_dropped() {
    let _guard = common::time_lock();
    let network = make_network(polycyphal::media::socket::DEFAULT_MTU);

    let params = RequestRxParams {
        extent_bytes: 64,
        service_id: SERVICE,
    };
    let first = network.server.make_request_rx_session(params).unwrap();
    assert!(network.server.make_request_rx_session(params).is_err());

    drop(first);
    let _second = network.server.make_request_rx_session(params).unwrap();
}

#[test]
fn test_requests_for_other_nodes_are_ignored() {
    let _guard = common::time_lock();
    let network = make_network(polycyphal::media::socket::DEFAULT_MTU);

    let request_rx = network
        .server
        .make_request_rx_session(RequestRxParams {
            extent_bytes: 64,
            service_id: SERVICE,
        })
        .unwrap();
    let count = Rc::new(RefCell::new(0usize));
    let sink = count.clone();
    request_rx.set_on_receive(move |_| *sink.borrow_mut() += 1);

    // A request addressed to a third node still reaches the shared segment.
    let request_tx = network
        .client
        .make_request_tx_session(RequestTxParams {
            service_id: SERVICE,
            server_node_id: NodeId::new(0x0e).unwrap(),
        })
        .unwrap();
    request_tx
        .send(
            &TransferMetadata {
                transfer_id: TransferId::new(0),
                timestamp: Instant::now(),
                priority: Priority::Nominal,
            },
            &[&[1]],
        )
        .unwrap();

    network.client.run(Instant::now()).unwrap();
    network.server.run(Instant::now()).unwrap();

    assert_eq!(*count.borrow(), 0);
    // The datagram did reach the server's medium.
    assert!(network.server_state.rx_feed.borrow().is_empty());
    assert_eq!(network.client_state.sent.borrow().len(), 1);
}

#[test]
fn test_redundant_media_deliver_once() {
    let _guard = common::time_lock();
    // Two media on each side, cross-wired pairwise: every transfer arrives twice.
    let resources = MemoryResources::default();
    let ((client_a, _), (server_a, server_state_a)) =
        MockMedia::linked_pair(resources.payload.clone());
    let ((client_b, _), (server_b, server_state_b)) =
        MockMedia::linked_pair(resources.payload.clone());

    let client =
        UdpTransport::new(resources.clone(), vec![client_a, client_b], 16).unwrap();
    let server = UdpTransport::new(resources, vec![server_a, server_b], 16).unwrap();
    client.set_local_node_id(CLIENT).unwrap();
    server.set_local_node_id(SERVER).unwrap();

    let request_rx = server
        .make_request_rx_session(RequestRxParams {
            extent_bytes: 64,
            service_id: SERVICE,
        })
        .unwrap();
    let count = Rc::new(RefCell::new(0usize));
    let sink = count.clone();
    request_rx.set_on_receive(move |_| *sink.borrow_mut() += 1);

    let request_tx = client
        .make_request_tx_session(RequestTxParams {
            service_id: SERVICE,
            server_node_id: SERVER,
        })
        .unwrap();
    request_tx
        .send(
            &TransferMetadata {
                transfer_id: TransferId::new(11),
                timestamp: Instant::now(),
                priority: Priority::Nominal,
            },
            &[&[1, 2]],
        )
        .unwrap();

    client.run(Instant::now()).unwrap();
    // The transfer went out over both media.
    assert_eq!(server_state_a.rx_feed.borrow().len(), 1);
    assert_eq!(server_state_b.rx_feed.borrow().len(), 1);

    server.run(Instant::now()).unwrap();
    // Both copies arrived; the framer suppressed the duplicate.
    assert_eq!(*count.borrow(), 1);
}
