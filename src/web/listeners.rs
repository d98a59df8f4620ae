use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;

// Pending connections the kernel queues while the worker is busy with a request
const LISTEN_BACKLOG: i32 = 1024;

/// Binds the worker's listener.
///
/// `host == "*"` listens on every interface, preferring an IPv6 dual-stack
/// socket. A port that cannot be bound is returned as an error; callers
/// treat it as fatal.
pub async fn create_listener(host: &str, port: u16) -> std::io::Result<(String, TcpListener)> {
    if host == "*" {
        return create_wildcard_listener(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind worker to {}...", addr);

    let listener = TcpListener::bind((host, port)).await?;
    let local_addr = listener.local_addr()?.to_string();

    Ok((local_addr, listener))
}

fn create_wildcard_listener(port: u16) -> std::io::Result<(String, TcpListener)> {
    let ipv6_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    tracing::info!(
        "Attempting to bind worker to {}... (IPv6 + IPv4 dual-stack)",
        ipv6_addr
    );

    match bind_socket(Domain::IPV6, ipv6_addr) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!("Failed to bind IPv6 listener: {}. Attempting IPv4 only.", e);

            let ipv4_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            tracing::info!("Attempting to bind worker to {}... (IPv4)", ipv4_addr);
            bind_socket(Domain::IPV4, ipv4_addr)
        }
    }
}

fn bind_socket(domain: Domain, addr: SocketAddr) -> std::io::Result<(String, TcpListener)> {
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if domain == Domain::IPV6 {
        // Some systems refuse dual-stack mode; an IPv6-only socket is still usable
        if let Err(e) = socket.set_only_v6(false) {
            tracing::warn!(
                "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
                e
            );
        }
    }

    // Lets a restarted worker reclaim its port while old connections sit in TIME_WAIT.
    // This does not allow two live listeners on one port.
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener)?;
    let local_addr = listener.local_addr()?.to_string();

    Ok((local_addr, listener))
}
