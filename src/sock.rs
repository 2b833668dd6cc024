//! UDP 소켓 생성 헬퍼
//!
//! 블라스트 구간의 버스트를 버틸 수 있도록 송수신 버퍼를
//! 양쪽 모두 4 MiB로 키운 뒤 tokio 소켓으로 변환한다.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::SOCKET_BUFFER_SIZE;

/// 버퍼를 키운 UDP 소켓 생성
pub(crate) fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    // 버퍼 확장은 최선 노력. 실패해도 동작에는 지장 없음
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// 호스트 이름과 포트를 소켓 주소로 해석
pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

/// 대상 주소와 같은 패밀리의 임의 포트 로컬 주소
pub(crate) fn wildcard_for(addr: SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}
