//! Stream multiplexing: rotation across pending peers, faults, timeouts.

use std::cell::RefCell;
use std::rc::Rc;

use ltem::config::EngineConfig;
use ltem::error::{Error, ResultCode};
use ltem::ports::Notification;
use ltem::protocols::sockets::{Socket, SocketProtocol};
use ltem::stream::StreamPeer;
use ltem::StreamStatus;

use crate::mock_hw::{Rig, builder, rig};

type Inbox = Rc<RefCell<Vec<u8>>>;

fn socket(context: u8, inbox: &Inbox) -> Socket<impl FnMut(u8, &[u8])> {
    let inbox = Rc::clone(inbox);
    Socket::new(context, SocketProtocol::Tcp, move |_, data: &[u8]| {
        inbox.borrow_mut().extend_from_slice(data);
    })
}

/// Step `service_streams` until a drain finishes. Returns the final status.
fn service_until_done(r: &mut Rig, peers: &mut [&mut dyn StreamPeer]) -> StreamStatus {
    for _ in 0..200 {
        let status = r.engine.service_streams(peers);
        match status {
            StreamStatus::Draining { .. } | StreamStatus::Busy => r.advance(1),
            done => return done,
        }
    }
    panic!("drain never finished");
}

#[test]
fn two_pending_peers_are_serviced_in_rotation() {
    let mut r = rig();
    let (inbox0, inbox2): (Inbox, Inbox) = Default::default();
    let mut s0 = socket(0, &inbox0);
    let mut s2 = socket(2, &inbox2);
    r.engine.streams_mut().register(0);
    r.engine.streams_mut().register(2);

    r.expect("AT+QIRD=0,1500\r", b"AT+QIRD=0,1500\r\r\n+QIRD: 3\r\nabc\r\nOK\r\n");
    r.expect("AT+QIRD=2,1500\r", b"AT+QIRD=2,1500\r\r\n+QIRD: 2\r\nxy\r\nOK\r\n");
    r.expect("AT+QIRD=0,1500\r", b"+QIRD: 0\r\n\r\nOK\r\n");
    r.expect("AT+QIRD=2,1500\r", b"+QIRD: 0\r\n\r\nOK\r\n");

    r.deliver(b"+QIURC: \"recv\",2\r\n+QIURC: \"recv\",0\r\n");
    r.engine.do_work();
    r.advance(5);
    r.engine.do_work();
    assert!(r.engine.streams().is_pending(0));
    assert!(r.engine.streams().is_pending(2));

    let mut order = Vec::new();
    for _ in 0..4 {
        let mut peers: [&mut dyn StreamPeer; 2] = [&mut s0, &mut s2];
        match service_until_done(&mut r, &mut peers) {
            StreamStatus::Complete { context } => order.push(context),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!r.engine.is_open(), "drain releases the lock");
    }

    assert_eq!(order, vec![0, 2, 0, 2]);
    assert_eq!(inbox0.borrow().as_slice(), b"abc");
    assert_eq!(inbox2.borrow().as_slice(), b"xy");
    assert!(!r.engine.streams().any_pending());

    let mut peers: [&mut dyn StreamPeer; 2] = [&mut s0, &mut s2];
    assert_eq!(r.engine.service_streams(&mut peers), StreamStatus::Idle);
}

#[test]
fn error_reply_faults_the_drain_and_notifies() {
    let mut r = rig();
    let inbox: Inbox = Rc::default();
    let mut s1 = socket(1, &inbox);
    r.engine.streams_mut().register(1);
    r.engine.streams_mut().mark_pending(1);
    r.expect("AT+QIRD=1,1500\r", b"AT+QIRD=1,1500\r\r\nERROR\r\n");

    let mut peers: [&mut dyn StreamPeer; 1] = [&mut s1];
    assert_eq!(
        service_until_done(&mut r, &mut peers),
        StreamStatus::Fault { context: 1 }
    );
    assert!(!r.engine.is_open());
    assert_eq!(r.notes(), vec![Notification::StreamFault { context: 1 }]);
    assert_eq!(
        r.engine.last_failure().map(|d| d.code),
        Some(ResultCode::INTERNAL_ERROR)
    );
}

#[test]
fn silent_modem_times_out_the_drain() {
    let config = EngineConfig {
        stream_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let mut r = builder().config(config).build();
    let inbox: Inbox = Rc::default();
    let mut s3 = socket(3, &inbox);
    r.engine.streams_mut().register(3);
    r.engine.streams_mut().mark_pending(3);

    let mut peers: [&mut dyn StreamPeer; 1] = [&mut s3];
    assert_eq!(
        service_until_done(&mut r, &mut peers),
        StreamStatus::Fault { context: 3 }
    );
    assert_eq!(r.notes(), vec![Notification::StreamFault { context: 3 }]);
    assert_eq!(
        r.engine.last_failure().map(|d| d.code),
        Some(ResultCode::TIMEOUT)
    );
}

#[test]
fn open_command_action_defers_stream_service() {
    let mut r = rig();
    let inbox: Inbox = Rc::default();
    let mut s0 = socket(0, &inbox);
    r.engine.streams_mut().register(0);
    r.engine.streams_mut().mark_pending(0);
    r.engine.try_invoke("AT+QPING=1,\"8.8.8.8\"").unwrap();

    let mut peers: [&mut dyn StreamPeer; 1] = [&mut s0];
    assert_eq!(r.engine.service_streams(&mut peers), StreamStatus::Busy);
    assert!(r.engine.streams().is_pending(0), "still queued");
}

#[test]
fn stream_mode_holds_the_lock_and_blocks_parsing() {
    let mut r = rig();
    r.deliver(b"OK\r\n");
    r.engine.acquire_lock("AT+QIRD=4,1500", 0).unwrap();
    r.engine.invoke("AT+QIRD=4,1500", None, None).unwrap();
    r.engine.enter_stream(4).unwrap();

    for _ in 0..5 {
        assert_eq!(r.engine.poll(false), ResultCode::PENDING);
        r.advance(1);
    }
    assert_eq!(r.engine.acquire_lock("AT", 0), Err(Error::Busy));
    assert_eq!(
        r.engine.leave_stream(5),
        Err(Error::StreamMismatch {
            active: Some(4),
            requested: 5
        })
    );
    r.engine.leave_stream(4).unwrap();
    assert!(!r.engine.is_open());
}

#[test]
fn stream_mode_await_times_out_within_the_action_budget() {
    let mut r = rig();
    r.engine.acquire_lock("AT+QIRD=4,1500", 0).unwrap();
    r.engine.invoke("AT+QIRD=4,1500", Some(100), None).unwrap();
    r.engine.enter_stream(4).unwrap();

    assert_eq!(r.engine.await_result(true), ResultCode::TIMEOUT);
    assert!(!r.engine.is_open());
    assert_eq!(r.engine.streams().active(), None);
    assert_eq!(r.notes(), vec![Notification::StreamFault { context: 4 }]);
    assert_eq!(
        r.engine.last_failure().map(|d| d.code),
        Some(ResultCode::TIMEOUT)
    );
}

#[test]
fn stream_mode_is_entered_only_under_the_lock() {
    let mut r = rig();
    r.engine.streams_mut().register(0);
    assert_eq!(r.engine.enter_stream(0), Err(Error::StreamNotLocked));
    assert_eq!(r.engine.streams().active(), None);
    assert!(r.engine.leave_stream(0).is_err());
    assert!(!r.engine.is_open());
}
