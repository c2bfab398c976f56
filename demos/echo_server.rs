//! A minimal non-blocking echo server built on `wsengine`.
//!
//! Demonstrates the pieces an embedder has to supply: a `mio` event loop,
//! an HTTP/1.1 upgrade parser (`httparse`), and a `WebSocketHandler` that
//! echoes every finished message back to its sender via a small
//! connection-id registry (the handler only ever sees a `ConnectionId` on
//! the data callback, so it looks the live handle up itself).

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use wsengine::{
    build_response, validate_upgrade, Connection, ConnectionId, DataPayload, MessageWriter,
    Method, Readiness, ServerConfig, UpgradeRequest, WeakConnectionHandle, WebSocketHandler,
};

const LISTENER: Token = Token(0);
const WAKE: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

struct EchoHandler {
    connections: Mutex<HashMap<ConnectionId, WeakConnectionHandle>>,
    chunk_size: usize,
}

impl EchoHandler {
    fn new(chunk_size: usize) -> Self {
        Self { connections: Mutex::new(HashMap::new()), chunk_size }
    }
}

impl WebSocketHandler for EchoHandler {
    fn handle_websocket_upgrade(
        &self,
        connection_id: ConnectionId,
        connection: WeakConnectionHandle,
        headers: &HashMap<String, String>,
    ) {
        info!("connection {} upgraded, headers: {:?}", connection_id.value(), headers);
        self.connections.lock().unwrap().insert(connection_id, connection);
    }

    fn handle_websocket_data(
        &self,
        payload: DataPayload,
        _message_starting: bool,
        message_finished: bool,
        connection_id: ConnectionId,
    ) {
        if !message_finished {
            return;
        }
        let handle = match self.connections.lock().unwrap().get(&connection_id) {
            Some(weak) => weak.upgrade(),
            None => None,
        };
        let Some(handle) = handle else { return };
        let writer = match payload {
            DataPayload::Text(s) => MessageWriter::text(s, self.chunk_size),
            DataPayload::Binary(b) => MessageWriter::binary(b, self.chunk_size),
        };
        handle.send_websocket_message(writer);
    }

    fn handle_websocket_close(&self, connection_id: ConnectionId) {
        info!("connection {} closed", connection_id.value());
        self.connections.lock().unwrap().remove(&connection_id);
    }
}

enum Peer {
    Handshaking { stream: TcpStream, buf: Vec<u8> },
    Open { stream: TcpStream, conn: Connection },
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(128);

    let addr = "127.0.0.1:9000".parse().unwrap();
    let mut listener = TcpListener::bind(addr)?;
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

    let config = ServerConfig::default();
    let handler = Arc::new(EchoHandler::new(config.web_socket_config.send_chunk_size));
    let waker = Arc::new(mio::Waker::new(poll.registry(), WAKE)?);

    let mut peers: HashMap<Token, Peer> = HashMap::new();
    let mut next_token = FIRST_CONN_TOKEN;

    info!("echo server listening on {}", addr);

    loop {
        poll.poll(&mut events, None)?;

        for event in events.iter() {
            match event.token() {
                LISTENER => accept_all(&mut listener, &mut poll, &mut peers, &mut next_token),
                WAKE => {}
                token => drive_peer(
                    &mut poll,
                    token,
                    &mut peers,
                    &config,
                    handler.clone(),
                    waker.clone(),
                    event.is_readable(),
                    event.is_writable(),
                ),
            }
        }
    }
}

fn accept_all(
    listener: &mut TcpListener,
    poll: &mut Poll,
    peers: &mut HashMap<Token, Peer>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if poll.registry().register(&mut stream, token, Interest::READABLE).is_ok() {
                    peers.insert(token, Peer::Handshaking { stream, buf: Vec::new() });
                    info!("accepted {} as {:?}", addr, token);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("accept failed: {}", e);
                break;
            }
        }
    }
}

fn drive_peer(
    poll: &mut Poll,
    token: Token,
    peers: &mut HashMap<Token, Peer>,
    config: &ServerConfig,
    handler: Arc<EchoHandler>,
    waker: Arc<mio::Waker>,
    readable: bool,
    writable: bool,
) {
    let Some(peer) = peers.remove(&token) else { return };

    let next_peer = match peer {
        Peer::Handshaking { mut stream, mut buf } => {
            if readable {
                let mut chunk = [0u8; 4096];
                match stream.read(&mut chunk) {
                    Ok(0) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(_) => return,
                }
            }

            match find_header_end(&buf) {
                None => Some(Peer::Handshaking { stream, buf }),
                Some(end) => match parse_and_respond(&mut stream, &buf[..end]) {
                    Ok(headers) => {
                        let _ = stream.set_nodelay(true);
                        let (mut conn, _handle) = Connection::new(
                            config.web_socket_config.clone(),
                            handler,
                            Box::new(waker),
                        );
                        let readiness = conn.complete_upgrade(&headers);
                        let interest = interest_for(readiness).unwrap_or(Interest::READABLE);
                        let _ = poll.registry().reregister(&mut stream, token, interest);
                        Some(Peer::Open { stream, conn })
                    }
                    Err(e) => {
                        warn!("rejecting upgrade: {}", e);
                        None
                    }
                },
            }
        }
        Peer::Open { mut stream, mut conn } => {
            let mut readiness = Readiness::Read;
            if readable {
                readiness = conn.on_readable(&mut stream);
            }
            if writable || readiness == Readiness::ReadWrite {
                readiness = conn.on_writable(&mut stream);
            }
            match interest_for(readiness) {
                Some(interest) => {
                    let _ = poll.registry().reregister(&mut stream, token, interest);
                    Some(Peer::Open { stream, conn })
                }
                None => None,
            }
        }
    };

    if let Some(peer) = next_peer {
        peers.insert(token, peer);
    }
}

fn interest_for(readiness: Readiness) -> Option<Interest> {
    match readiness {
        Readiness::Read => Some(Interest::READABLE),
        Readiness::Write => Some(Interest::WRITABLE),
        Readiness::ReadWrite => Some(Interest::READABLE | Interest::WRITABLE),
        Readiness::Done => None,
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_and_respond(
    stream: &mut TcpStream,
    head: &[u8],
) -> Result<HashMap<String, String>, wsengine::Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut header_storage);
    req.parse(head)?;

    let mut headers = HashMap::new();
    for h in req.headers.iter() {
        headers.insert(h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).to_string());
    }
    let method = match req.method {
        Some("GET") => Method::Get,
        _ => Method::Other,
    };
    let upgrade_req = UpgradeRequest { method, headers: headers.clone() };
    let accept = validate_upgrade(&upgrade_req)?;
    let response = build_response(&accept);
    let _ = stream.write_all(response.as_bytes());
    Ok(headers)
}
