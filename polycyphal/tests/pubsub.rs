//! Publish/subscribe round trips over a loopback medium.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use polycyphal::core::{NodeId, Priority, SubjectId, TransferId};
use polycyphal::media::memory::MemoryResources;
use polycyphal::session::{
    MessageRxParams, MessageRxTransfer, MessageTxParams, TransferMetadata,
};
use polycyphal::time::Instant;
use polycyphal::transport::UdpTransport;

use common::{MockMedia, TrackingMemory};

const NODE_ID: NodeId = NodeId::new(42).unwrap();
const SUBJECT: SubjectId = SubjectId::new(1234).unwrap();

fn make_loopback_transport(
    resources: MemoryResources,
) -> (UdpTransport, Rc<common::MediaState>) {
    let (media, state) = MockMedia::loopback(resources.payload.clone());
    let transport = UdpTransport::new(resources, vec![media], 16).unwrap();
    transport.set_local_node_id(NODE_ID).unwrap();
    (transport, state)
}

#[test]
fn test_message_round_trip() {
    let _guard = common::time_lock();
    let (transport, _state) = make_loopback_transport(MemoryResources::default());

    let publisher = transport
        .make_message_tx_session(MessageTxParams { subject_id: SUBJECT })
        .unwrap();
    let subscriber = transport
        .make_message_rx_session(MessageRxParams {
            extent_bytes: 64,
            subject_id: SUBJECT,
        })
        .unwrap();

    let received: Rc<RefCell<Vec<MessageRxTransfer>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    subscriber.set_on_receive(move |transfer| sink.borrow_mut().push(transfer));

    let metadata = TransferMetadata {
        transfer_id: TransferId::new(5),
        timestamp: Instant::now(),
        priority: Priority::High,
    };
    publisher.send(&metadata, &[&[0xde, 0xad], &[0xbe, 0xef]]).unwrap();

    // One tick: TX drain loops the datagram back, RX pump delivers it.
    transport.run(Instant::now()).unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let transfer = &received[0];
    assert_eq!(&transfer.payload[..], &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(transfer.metadata.base.transfer_id, TransferId::new(5));
    assert_eq!(transfer.metadata.base.priority, Priority::High);
    assert_eq!(transfer.metadata.publisher, Some(NODE_ID));
}

#[test]
fn test_multi_frame_message_round_trip() {
    let _guard = common::time_lock();
    let resources = MemoryResources::default();
    let (media, state) = MockMedia::loopback(resources.payload.clone());
    state.mtu.set(16);
    let transport = UdpTransport::new(resources, vec![media], 16).unwrap();
    transport.set_local_node_id(NODE_ID).unwrap();

    let publisher = transport
        .make_message_tx_session(MessageTxParams { subject_id: SUBJECT })
        .unwrap();
    let subscriber = transport
        .make_message_rx_session(MessageRxParams {
            extent_bytes: 128,
            subject_id: SUBJECT,
        })
        .unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    subscriber.set_on_receive(move |transfer: MessageRxTransfer| {
        sink.borrow_mut().push(transfer)
    });

    let payload: Vec<u8> = (0u8..40).collect();
    let metadata = TransferMetadata {
        transfer_id: TransferId::new(0),
        timestamp: Instant::now(),
        priority: Priority::Nominal,
    };
    publisher.send(&metadata, &[&payload]).unwrap();
    transport.run(Instant::now()).unwrap();

    // 40 payload bytes + 4 CRC bytes at MTU 16 = 3 frames on the wire.
    assert_eq!(state.sent.borrow().len(), 3);
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(&received[0].payload[..], &payload[..]);
}

#[test]
fn test_subscription_survives_unrelated_subjects() {
    let _guard = common::time_lock();
    let (transport, _state) = make_loopback_transport(MemoryResources::default());

    let publisher = transport
        .make_message_tx_session(MessageTxParams {
            subject_id: SubjectId::new(77).unwrap(),
        })
        .unwrap();
    let subscriber = transport
        .make_message_rx_session(MessageRxParams {
            extent_bytes: 64,
            subject_id: SUBJECT,
        })
        .unwrap();

    let received = Rc::new(RefCell::new(0usize));
    let sink = received.clone();
    subscriber.set_on_receive(move |_| *sink.borrow_mut() += 1);

    let metadata = TransferMetadata {
        transfer_id: TransferId::new(0),
        timestamp: Instant::now(),
        priority: Priority::Nominal,
    };
    publisher.send(&metadata, &[&[1]]).unwrap();
    transport.run(Instant::now()).unwrap();

    assert_eq!(*received.borrow(), 0);
}

#[test]
fn test_duplicate_subscription_rejected_until_first_dropped() {
    let _guard = common::time_lock();
    let (transport, _state) = make_loopback_transport(MemoryResources::default());

    let params = MessageRxParams {
        extent_bytes: 64,
        subject_id: SUBJECT,
    };
    let first = transport.make_message_rx_session(params).unwrap();
    assert!(transport.make_message_rx_session(params).is_err());

    drop(first);
    let _second = transport.make_message_rx_session(params).unwrap();
}

#[test]
fn test_dropped_subscription_receives_nothing() {
    let _guard = common::time_lock();
    let (transport, _state) = make_loopback_transport(MemoryResources::default());

    let publisher = transport
        .make_message_tx_session(MessageTxParams { subject_id: SUBJECT })
        .unwrap();
    let subscriber = transport
        .make_message_rx_session(MessageRxParams {
            extent_bytes: 64,
            subject_id: SUBJECT,
        })
        .unwrap();

    let received = Rc::new(RefCell::new(0usize));
    let sink = received.clone();
    subscriber.set_on_receive(move |_| *sink.borrow_mut() += 1);
    drop(subscriber);

    let metadata = TransferMetadata {
        transfer_id: TransferId::new(0),
        timestamp: Instant::now(),
        priority: Priority::Nominal,
    };
    publisher.send(&metadata, &[&[1]]).unwrap();
    transport.run(Instant::now()).unwrap();

    assert_eq!(*received.borrow(), 0);
}

#[test]
fn test_all_buffers_returned_on_teardown() {
    let _guard = common::time_lock();
    let tracker = Rc::new(TrackingMemory::default());
    let resources = MemoryResources::all_general(tracker.clone());

    {
        let (transport, _state) = make_loopback_transport(resources);
        let publisher = transport
            .make_message_tx_session(MessageTxParams { subject_id: SUBJECT })
            .unwrap();
        let subscriber = transport
            .make_message_rx_session(MessageRxParams {
                extent_bytes: 64,
                subject_id: SUBJECT,
            })
            .unwrap();
        subscriber.set_on_receive(|_| {});

        let metadata = TransferMetadata {
            transfer_id: TransferId::new(0),
            timestamp: Instant::now(),
            priority: Priority::Nominal,
        };
        publisher.send(&metadata, &[&[1, 2, 3]]).unwrap();
        transport.run(Instant::now()).unwrap();

        // One more transfer left queued to exercise the teardown flush.
        publisher.send(&metadata, &[&[4, 5, 6]]).unwrap();
    }

    assert!(tracker.total() > 0);
    assert_eq!(tracker.live(), 0);
}
