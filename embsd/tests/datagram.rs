mod common;

use common::{UDP_MTU, any_port, outcome, setup, sock_addr, v4};
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};
use embsd::addr::SockAddr;
use embsd::core::{Family, MsgFlags, SockType};
use embsd::error::Error;
use embsd::options::{Ioctl, SockOpt};
use embsd::stack::{Config, Stack};
use embsd_driver::engine::UdpParams;
use embsd_driver::link::Datagram;
use futures_executor::{LocalPool, block_on};
use futures_task::LocalSpawn;
use static_cell::StaticCell;
use std::boxed::Box;

const LOCAL: IpAddr = IpAddr::V4(common::LOCAL_IP);

fn datagram(source: SocketAddr, payload: &[u8]) -> Datagram<'_> {
    Datagram {
        source,
        destination: LOCAL,
        payload,
    }
}

#[test]
fn test_datagram_truncation() {
    let (stack, sockets, link) = setup();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    sockets.bind(sock, &any_port(4000)).unwrap();
    let engine_socket = stack.engine().udp_on_port(4000);

    let peer = v4(10, 0, 0, 5, 6000);
    link.udp_data(engine_socket, &datagram(peer, b"0123456789"));
    link.udp_data(engine_socket, &datagram(peer, b"second"));

    let mut buf = [0u8; 4];
    let (len, source) = block_on(sockets.recvfrom(sock, &mut buf, MsgFlags::PEEK)).unwrap();
    assert_eq!((len, source), (4, sock_addr(peer)));
    // The rest of a truncated datagram is discarded
    let len = block_on(sockets.recv(sock, &mut buf, MsgFlags::NONE)).unwrap();
    assert_eq!(&buf[..len], b"0123");
    let mut buf = [0u8; 16];
    let len = block_on(sockets.recv(sock, &mut buf, MsgFlags::NONE)).unwrap();
    assert_eq!(&buf[..len], b"second");
    assert_eq!(
        block_on(sockets.recv(sock, &mut buf, MsgFlags::DONTWAIT)),
        Err(Error::WouldBlock)
    );
}

#[test]
fn test_recvmsg_scatter() {
    let (stack, sockets, link) = setup();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    sockets.setsockopt(sock, SockOpt::RecvDstAddr(true)).unwrap();
    sockets.bind(sock, &any_port(4000)).unwrap();
    let engine_socket = stack.engine().udp_on_port(4000);

    let peer = v4(10, 0, 0, 5, 6000);
    link.udp_data(engine_socket, &datagram(peer, b"abcdefgh"));
    link.udp_data(engine_socket, &datagram(peer, b"xyz"));

    let (mut head, mut tail) = ([0u8; 3], [0u8; 3]);
    let msg = block_on(sockets.recvmsg(sock, &mut [&mut head[..], &mut tail[..]], MsgFlags::NONE)).unwrap();
    assert_eq!(msg.len, 6);
    assert_eq!((&head, &tail), (b"abc", b"def"));
    assert!(msg.flags.contains(MsgFlags::TRUNC));
    assert_eq!(msg.source, sock_addr(peer));
    assert_eq!(msg.destination, Some(LOCAL));

    let msg = block_on(sockets.recvmsg(sock, &mut [&mut head[..], &mut tail[..]], MsgFlags::NONE)).unwrap();
    assert_eq!(msg.len, 3);
    assert!(msg.flags.is_empty());

    let stream = sockets.socket(Family::Inet, SockType::Stream, 0).unwrap();
    assert_eq!(
        block_on(sockets.recvmsg(stream, &mut [&mut head[..]], MsgFlags::NONE)),
        Err(Error::NotSupported)
    );
    assert_eq!(
        block_on(sockets.sendmsg(stream, &[&b"x"[..]], None, MsgFlags::NONE)),
        Err(Error::NotSupported)
    );
}

#[test]
fn test_udp_filter_scenario() {
    let (stack, sockets, link) = setup();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    let peer_a = v4(10, 0, 0, 1, 7000);
    let peer_b = v4(10, 0, 0, 2, 7000);

    block_on(sockets.connect(sock, &sock_addr(peer_a))).unwrap();
    assert_eq!(sockets.getpeername(sock), Ok(sock_addr(peer_a)));
    let port = sockets.getsockname(sock).unwrap().to_socket_addr().unwrap().port();
    let engine_socket = stack.engine().udp_on_port(port);

    link.udp_data(engine_socket, &datagram(peer_b, b"from b"));
    link.udp_data(engine_socket, &datagram(peer_a, b"from a"));
    let mut buf = [0u8; 16];
    let (len, source) = block_on(sockets.recvfrom(sock, &mut buf, MsgFlags::DONTWAIT)).unwrap();
    assert_eq!((&buf[..len], source), (&b"from a"[..], sock_addr(peer_a)));
    assert_eq!(
        block_on(sockets.recv(sock, &mut buf, MsgFlags::DONTWAIT)),
        Err(Error::WouldBlock)
    );

    // Filter peer is the implicit destination and the only allowed one
    assert_eq!(block_on(sockets.send(sock, b"ping", MsgFlags::NONE)), Ok(4));
    assert_eq!(
        block_on(sockets.sendto(sock, b"ping", MsgFlags::NONE, Some(&sock_addr(peer_b)))),
        Err(Error::IsConnected)
    );
    assert_eq!(sockets.bind(sock, &any_port(9000)), Err(Error::IsConnected));

    block_on(sockets.connect(sock, &any_port(0))).unwrap();
    assert_eq!(sockets.getpeername(sock), Err(Error::NotConnected));
    link.udp_data(engine_socket, &datagram(peer_b, b"from b"));
    let (len, source) = block_on(sockets.recvfrom(sock, &mut buf, MsgFlags::DONTWAIT)).unwrap();
    assert_eq!((&buf[..len], source), (&b"from b"[..], sock_addr(peer_b)));

    assert_eq!(
        stack.engine().udp_sent(engine_socket),
        vec![(peer_a, b"ping".to_vec())]
    );
}

#[test]
fn test_sendto_checks() {
    let (stack, sockets, _) = setup();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    let peer = sock_addr(v4(10, 0, 0, 1, 53));

    assert_eq!(
        block_on(sockets.send(sock, b"x", MsgFlags::NONE)),
        Err(Error::DestAddrRequired)
    );
    assert_eq!(
        block_on(sockets.sendto(sock, b"x", MsgFlags::NONE, Some(&any_port(53)))),
        Err(Error::Invalid)
    );
    let oversized = vec![0u8; UDP_MTU + 1];
    assert_eq!(
        block_on(sockets.sendto(sock, &oversized, MsgFlags::NONE, Some(&peer))),
        Err(Error::MsgSize)
    );
    assert_eq!(
        block_on(sockets.sendmsg(sock, &[&b"query "[..], &b"body"[..]], Some(&peer), MsgFlags::NONE)),
        Ok(10)
    );

    // Sending binds implicitly
    let local = sockets.getsockname(sock).unwrap().to_socket_addr().unwrap();
    let engine_socket = stack.engine().udp_on_port(local.port());
    let sent = stack.engine().udp_sent(engine_socket);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, b"query body");
}

#[test]
fn test_send_retry() {
    let mut executor = LocalPool::new();
    let spawner = executor.spawner();
    let (stack, sockets, link) = setup();
    let engine = stack.engine();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    sockets.bind(sock, &any_port(4000)).unwrap();
    let engine_socket = engine.udp_on_port(4000);
    let peer = v4(10, 0, 0, 1, 53);

    // Non-blocking sockets do not retry
    engine.with(|state| state.udp[usize::from(engine_socket.into_u8())].refuse = 1);
    assert_eq!(
        block_on(sockets.sendto(sock, b"x", MsgFlags::DONTWAIT, Some(&sock_addr(peer)))),
        Err(Error::WouldBlock)
    );

    // One retry after the delay
    engine.with(|state| state.udp[usize::from(engine_socket.into_u8())].refuse = 1);
    let sent = outcome();
    spawner
        .spawn_local_obj(
            Box::new(async move {
                let res = sockets
                    .sendto(sock, b"retry", MsgFlags::NONE, Some(&sock_addr(peer)))
                    .await;
                *sent.lock().unwrap() = Some(res);
            })
            .into(),
        )
        .unwrap();
    executor.run_until_stalled();
    assert!(sent.lock().unwrap().is_none());
    link.tick();
    executor.run_until_stalled();
    assert!(sent.lock().unwrap().is_none());
    link.tick();
    executor.run_until_stalled();
    assert_eq!(sent.lock().unwrap().take(), Some(Ok(5)));

    // Send readiness cuts the delay short, a second failure is final
    engine.with(|state| state.udp[usize::from(engine_socket.into_u8())].refuse = 2);
    let sent = outcome();
    spawner
        .spawn_local_obj(
            Box::new(async move {
                let res = sockets
                    .sendto(sock, b"lost", MsgFlags::NONE, Some(&sock_addr(peer)))
                    .await;
                *sent.lock().unwrap() = Some(res);
            })
            .into(),
        )
        .unwrap();
    executor.run_until_stalled();
    link.udp_send_ready(engine_socket);
    executor.run_until_stalled();
    assert_eq!(sent.lock().unwrap().take(), Some(Err(Error::NoMemory)));
    assert_eq!(engine.udp_sent(engine_socket).len(), 1);
}

#[test]
fn test_receive_on_unbound_socket() {
    let (_, sockets, _) = setup();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(
        block_on(sockets.recv(sock, &mut buf, MsgFlags::NONE)),
        Err(Error::Invalid)
    );
    assert_eq!(
        sockets.ioctlsocket(sock, Ioctl::FlowControl(true)),
        Err(Error::NotSupported)
    );
    assert_eq!(sockets.ioctlsocket(sock, Ioctl::NonBlocking(true)), Ok(()));
}

#[test]
fn test_ipv6_socket_sees_mapped_sources() {
    let (stack, sockets, link) = setup();
    let sock = sockets.socket(Family::Inet6, SockType::Dgram, 0).unwrap();
    let any6 = SockAddr::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 4000, 0, 0));
    sockets.bind(sock, &any6).unwrap();
    assert_eq!(sockets.setsockopt(sock, SockOpt::Ipv6Only(true)), Err(Error::Invalid));
    assert_eq!(sockets.setsockopt(sock, SockOpt::IpTtl(3)), Err(Error::NotSupported));
    let engine_socket = stack.engine().udp_on_port(4000);

    let peer = v4(10, 0, 0, 5, 6000);
    link.udp_data(engine_socket, &datagram(peer, b"v4"));
    let mut buf = [0u8; 4];
    let (len, source) = block_on(sockets.recvfrom(sock, &mut buf, MsgFlags::NONE)).unwrap();
    assert_eq!(len, 2);
    let mapped = Ipv4Addr::new(10, 0, 0, 5).to_ipv6_mapped();
    assert_eq!(source, SockAddr::from(SocketAddrV6::new(mapped, 6000, 0, 0)));
}

#[test]
fn test_ipv6_only_drops_ipv4() {
    let (stack, sockets, link) = setup();
    let sock = sockets.socket(Family::Inet6, SockType::Dgram, 0).unwrap();
    sockets.setsockopt(sock, SockOpt::Ipv6Only(true)).unwrap();
    assert_eq!(sockets.bind(sock, &any_port(4000)), Err(Error::Invalid));
    let any6 = SockAddr::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 4000, 0, 0));
    sockets.bind(sock, &any6).unwrap();
    let engine_socket = stack.engine().udp_on_port(4000);

    link.udp_data(engine_socket, &datagram(v4(10, 0, 0, 5, 6000), b"v4"));
    let mut buf = [0u8; 4];
    assert_eq!(
        block_on(sockets.recv(sock, &mut buf, MsgFlags::DONTWAIT)),
        Err(Error::WouldBlock)
    );
}

#[test]
fn test_options_reach_open_association() {
    let (stack, sockets, _) = setup();
    let engine = stack.engine();
    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    sockets.setsockopt(sock, SockOpt::IpTtl(5)).unwrap();
    sockets.bind(sock, &any_port(4000)).unwrap();
    let engine_socket = engine.udp_on_port(4000);
    assert_eq!(engine.udp_params(engine_socket), Some(UdpParams { tos: 0, ttl: 5 }));

    sockets.setsockopt(sock, SockOpt::IpTos(0x20)).unwrap();
    sockets.setsockopt(sock, SockOpt::IpTtl(9)).unwrap();
    assert_eq!(engine.udp_params(engine_socket), Some(UdpParams { tos: 0x20, ttl: 9 }));
}

#[test]
fn test_statically_allocated_stack() {
    static STACK: StaticCell<common::TestStack> = StaticCell::new();
    let stack: &'static common::TestStack =
        STACK.init(Stack::new(common::MockEngine::new(), Config::default()));
    let (sockets, link) = stack.split();

    let sock = sockets.socket(Family::Inet, SockType::Dgram, 0).unwrap();
    sockets.bind(sock, &any_port(5353)).unwrap();
    let engine_socket = stack.engine().udp_on_port(5353);
    link.udp_data(engine_socket, &datagram(v4(10, 0, 0, 5, 5353), b"query"));

    let mut buf = [0u8; 8];
    let len = block_on(sockets.recv(sock, &mut buf, MsgFlags::NONE)).unwrap();
    assert_eq!(&buf[..len], b"query");
}
