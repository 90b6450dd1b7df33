//! Socket and file consumers driving the engine end to end.

use std::cell::RefCell;
use std::rc::Rc;

use ltem::ResultCode;
use ltem::StreamStatus;
use ltem::protocols::files;
use ltem::protocols::sockets::{Socket, SocketProtocol};
use ltem::stream::StreamPeer;

use crate::mock_hw::{builder, rig};

fn noop_socket(context: u8) -> Socket<impl FnMut(u8, &[u8])> {
    Socket::new(context, SocketProtocol::Tcp, |_, _: &[u8]| {})
}

// ── Sockets ───────────────────────────────────────────────────

#[test]
fn socket_open_registers_context() {
    let mut r = rig();
    r.expect(
        "AT+QIOPEN=1,1,\"TCP\",\"example.com\",80,0,0\r",
        b"AT+QIOPEN=1,1,\"TCP\",\"example.com\",80,0,0\r\r\nOK\r\n\r\n+QIOPEN: 1,0\r\n",
    );
    let mut sock = noop_socket(1);
    assert_eq!(sock.open(&mut r.engine, "example.com", 80), ResultCode::SUCCESS);
    assert!(r.engine.streams().is_registered(1));
    assert!(!r.engine.is_open());
}

#[test]
fn socket_open_failure_is_a_service_code() {
    let mut r = rig();
    r.expect("AT+QIOPEN", b"OK\r\n\r\n+QIOPEN: 1,565\r\n");
    let mut sock = noop_socket(1);
    let code = sock.open(&mut r.engine, "unresolvable.invalid", 443);
    assert_eq!(code, ResultCode::service(565));
    assert!(!r.engine.streams().is_registered(1));
    assert_eq!(r.engine.last_failure().map(|d| d.code), Some(code));
}

#[test]
fn socket_send_waits_for_prompt_then_send_ok() {
    let mut r = rig();
    r.expect("AT+QISEND=1,5\r", b"AT+QISEND=1,5\r\r\n> ");
    r.expect("hello", b"\r\nSEND OK\r\n");
    let mut sock = noop_socket(1);

    assert_eq!(sock.send(&mut r.engine, b"hello"), ResultCode::SUCCESS);
    assert!(!r.engine.is_open());
    assert_eq!(r.written(), b"AT+QISEND=1,5\rhello");
}

#[test]
fn oversized_send_is_rejected_before_the_modem() {
    let mut r = rig();
    let mut sock = noop_socket(1);
    let payload = vec![0u8; 2000];
    assert!(sock.send(&mut r.engine, &payload).is_error());
    assert!(r.written().is_empty());
}

#[test]
fn recv_urc_to_delivered_bytes() {
    let mut r = rig();
    let inbox: Rc<RefCell<Vec<u8>>> = Rc::default();
    let sink = Rc::clone(&inbox);
    let mut sock = Socket::new(0, SocketProtocol::Tcp, move |_, data: &[u8]| {
        sink.borrow_mut().extend_from_slice(data);
    });
    r.expect("AT+QIOPEN", b"OK\r\n\r\n+QIOPEN: 0,0\r\n");
    assert!(sock.open(&mut r.engine, "10.0.0.2", 5000).is_success());

    r.expect("AT+QIRD=0,1500\r", b"\r\n+QIRD: 4\r\nping\r\nOK\r\n");
    r.deliver(b"\r\n+QIURC: \"recv\",0\r\n");
    for _ in 0..10 {
        r.engine.do_work();
        r.advance(1);
    }
    assert!(r.engine.streams().is_pending(0));

    let mut last = StreamStatus::Idle;
    for _ in 0..20 {
        let mut peers: [&mut dyn StreamPeer; 1] = [&mut sock];
        last = r.engine.service_streams(&mut peers);
        if matches!(last, StreamStatus::Complete { .. }) {
            break;
        }
        r.advance(1);
    }
    assert_eq!(last, StreamStatus::Complete { context: 0 });
    assert_eq!(sock.received(), 4);
    drop(sock);
    assert_eq!(inbox.borrow().as_slice(), b"ping");
}

// ── Files ─────────────────────────────────────────────────────

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn file_read_spanning_the_ring_end_arrives_intact() {
    let mut r = rig();
    let data = payload(3000);
    let mut reply = b"AT+QFREAD=1,3000\r\r\nCONNECT 3000\r\n".to_vec();
    reply.extend_from_slice(&data);
    reply.extend_from_slice(b"\r\nOK\r\n");
    r.expect("AT+QFREAD=1,3000\r", &reply);

    let mut got = Vec::new();
    let mut blocks = 0;
    let (code, n) = files::read(&mut r.engine, 1, 3000, &mut |block| {
        blocks += 1;
        got.extend_from_slice(block);
    });

    assert_eq!(code, ResultCode::SUCCESS);
    assert_eq!(n, 3000);
    assert_eq!(got, data);
    assert!(blocks >= 2, "wrap forces at least two blocks");
    assert!(!r.engine.is_open());
    assert_eq!(r.engine.rx().occupied(), 0);
}

#[test]
fn short_file_read_reports_announced_length() {
    let mut r = rig();
    r.expect("AT+QFREAD=2,64\r", b"CONNECT 5\r\nabcde\r\nOK\r\n");
    let mut got = Vec::new();
    let (code, n) = files::read(&mut r.engine, 2, 64, &mut |b| got.extend_from_slice(b));
    assert_eq!(code, ResultCode::SUCCESS);
    assert_eq!(n, 5);
    assert_eq!(got, b"abcde");
}

#[test]
fn cancelled_file_read_keeps_delivered_bytes() {
    let mut r = builder().cancel_after_yields(30).build();
    let mut reply = b"CONNECT 500\r\n".to_vec();
    reply.extend_from_slice(&payload(100));
    r.expect("AT+QFREAD=1,500\r", &reply);

    let mut got = Vec::new();
    let (code, n) = files::read(&mut r.engine, 1, 500, &mut |b| got.extend_from_slice(b));
    assert_eq!(code, ResultCode::CANCELLED);
    assert_eq!(n, 100);
    assert_eq!(got, payload(100));
    assert!(!r.engine.is_open());
}

#[test]
fn malformed_trailer_is_an_internal_error() {
    let mut r = rig();
    r.expect("AT+QFREAD=1,3\r", b"CONNECT 3\r\nxyzGARBAGE\r\n");
    let (code, n) = files::read(&mut r.engine, 1, 3, &mut |_| {});
    assert_eq!(code, ResultCode::INTERNAL_ERROR);
    assert_eq!(n, 3);
}
