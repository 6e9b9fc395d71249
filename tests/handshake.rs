//! End-to-end handshakes over in-memory streams: a client writes a full
//! request on one end of a duplex pipe, the engine authenticates and
//! dispatches the other end.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use trojan_ingress::{
    derive_key, Address, CloseCallback, Command, DecodeResult, FallbackHandler, InboundHandler,
    PacketStream, Service, SessionMeta, TransportStream, UdpFrame,
};

fn source_addr() -> SocketAddr {
    "198.51.100.42:50111".parse().unwrap()
}

fn request_bytes(password: &str, command: u8, addr: &Address, tail: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(&derive_key(password));
    buf.put_slice(b"\r\n");
    buf.put_u8(command);
    addr.encode(&mut buf).unwrap();
    buf.put_slice(b"\r\n");
    buf.put_slice(tail);
    buf.to_vec()
}

/// Relays everything back to the client, byte-for-byte or frame-for-frame.
struct EchoHandler {
    closes: AtomicUsize,
}

impl EchoHandler {
    fn new() -> Self {
        Self {
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InboundHandler<String> for EchoHandler {
    async fn handle_tcp(
        &self,
        _meta: SessionMeta<String>,
        mut stream: TransportStream,
        on_close: CloseCallback,
    ) {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        on_close();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle_packet(
        &self,
        _meta: SessionMeta<String>,
        mut packets: PacketStream<TransportStream>,
        on_close: CloseCallback,
    ) {
        while let Ok((addr, payload)) = packets.read_packet().await {
            if packets.write_packet(&payload, &addr).await.is_err() {
                break;
            }
        }
        on_close();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle_mux(
        &self,
        _meta: SessionMeta<String>,
        _stream: TransportStream,
        on_close: CloseCallback,
    ) {
        on_close();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Plays the part of the disguise web server: records what it reads and
/// answers with a fixed banner.
struct BannerFallback {
    seen: Mutex<Option<Vec<u8>>>,
}

const BANNER: &[u8] = b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n";

#[async_trait]
impl FallbackHandler<String> for BannerFallback {
    async fn handle_fallback(
        &self,
        _meta: SessionMeta<String>,
        mut stream: TransportStream,
        on_close: CloseCallback,
    ) {
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        let _ = stream.write_all(BANNER).await;
        let _ = stream.flush().await;
        *self.seen.lock().unwrap() = Some(seen);
        on_close();
    }
}

fn echo_service(handler: Arc<EchoHandler>, fallback: Option<Arc<BannerFallback>>) -> Service<String> {
    let mut builder = Service::builder().handler(handler as Arc<dyn InboundHandler<String>>);
    if let Some(fallback) = fallback {
        builder = builder.fallback(fallback as Arc<dyn FallbackHandler<String>>);
    }
    let service = builder.build();
    service
        .update_users(
            vec!["alice".to_string(), "bob".to_string()],
            vec!["alice-secret".to_string(), "bob-secret".to_string()],
        )
        .unwrap();
    service
}

#[tokio::test]
async fn tcp_session_relays_both_directions() {
    trojan_ingress::logger::init_logger("trojan_ingress=debug");

    let handler = Arc::new(EchoHandler::new());
    let service = Arc::new(echo_service(Arc::clone(&handler), None));

    let (mut client, server) = tokio::io::duplex(8192);
    let svc = Arc::clone(&service);
    let engine = tokio::spawn(async move {
        svc.handle_connection(server, source_addr(), Box::new(|| {}))
            .await
    });

    let destination = Address::Domain("upstream.example".to_string(), 443);
    let request = request_bytes("bob-secret", Command::TCP, &destination, b"hello upstream");
    client.write_all(&request).await.unwrap();

    let mut echoed = [0u8; 14];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello upstream");

    client.shutdown().await.unwrap();
    drop(client);
    engine.await.unwrap().unwrap();
    assert_eq!(handler.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn udp_session_roundtrips_datagrams() {
    let handler = Arc::new(EchoHandler::new());
    let service = Arc::new(echo_service(Arc::clone(&handler), None));

    let (mut client, server) = tokio::io::duplex(8192);
    let svc = Arc::clone(&service);
    let engine = tokio::spawn(async move {
        svc.handle_connection(server, source_addr(), Box::new(|| {}))
            .await
    });

    let associate = Address::IPv4([0, 0, 0, 0], 0);
    let datagram_dst = Address::Domain("dns.example".to_string(), 53);
    let mut tail = BytesMut::new();
    UdpFrame::encode(&datagram_dst, b"datagram one", &mut tail).unwrap();

    let request = request_bytes("alice-secret", Command::UDP, &associate, &tail);
    client.write_all(&request).await.unwrap();

    // the echo handler frames the same payload back to the same address
    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    let frame = loop {
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0, "stream closed before a full frame arrived");
        response.extend_from_slice(&buf[..n]);
        match UdpFrame::decode(&response) {
            DecodeResult::Ok(frame, _) => break frame,
            DecodeResult::NeedMoreData => continue,
            DecodeResult::Invalid(msg) => panic!("invalid frame: {}", msg),
        }
    };
    assert_eq!(frame.addr, datagram_dst);
    assert_eq!(frame.payload.as_ref(), b"datagram one");

    client.shutdown().await.unwrap();
    drop(client);
    engine.await.unwrap().unwrap();
}

#[tokio::test]
async fn probe_with_unknown_credential_gets_banner_and_full_replay() {
    let handler = Arc::new(EchoHandler::new());
    let fallback = Arc::new(BannerFallback {
        seen: Mutex::new(None),
    });
    let service = Arc::new(echo_service(Arc::clone(&handler), Some(Arc::clone(&fallback))));

    let (mut client, server) = tokio::io::duplex(8192);
    let svc = Arc::clone(&service);
    let engine = tokio::spawn(async move {
        svc.handle_connection(server, source_addr(), Box::new(|| {}))
            .await
    });

    // a probe that happens to send 56+ bytes of something else entirely
    let probe = b"GET / HTTP/1.1\r\nHost: innocuous.example\r\nUser-Agent: curl/8.0.0\r\n\r\n";
    assert!(probe.len() > 56);
    client.write_all(probe).await.unwrap();
    client.shutdown().await.unwrap();

    let mut banner = Vec::new();
    client.read_to_end(&mut banner).await.unwrap();
    assert_eq!(banner, BANNER);

    engine.await.unwrap().unwrap();

    // the fallback saw the probe from byte zero, including the 56 bytes the
    // engine consumed for the key check
    let seen = fallback.seen.lock().unwrap();
    assert_eq!(seen.as_deref(), Some(&probe[..]));
    assert_eq!(handler.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn numeric_identity_service_resolves_ids() {
    struct NullHandler {
        resolved: Mutex<Option<i64>>,
    }

    #[async_trait]
    impl InboundHandler<i64> for NullHandler {
        async fn handle_tcp(
            &self,
            meta: SessionMeta<i64>,
            _stream: TransportStream,
            on_close: CloseCallback,
        ) {
            *self.resolved.lock().unwrap() = meta.user;
            on_close();
        }

        async fn handle_packet(
            &self,
            _meta: SessionMeta<i64>,
            _packets: PacketStream<TransportStream>,
            on_close: CloseCallback,
        ) {
            on_close();
        }

        async fn handle_mux(
            &self,
            _meta: SessionMeta<i64>,
            _stream: TransportStream,
            on_close: CloseCallback,
        ) {
            on_close();
        }
    }

    let handler = Arc::new(NullHandler {
        resolved: Mutex::new(None),
    });
    let service: Service<i64> = Service::builder()
        .handler(Arc::clone(&handler) as Arc<dyn InboundHandler<i64>>)
        .build();
    service
        .update_users(vec![7001], vec!["panel-issued".to_string()])
        .unwrap();

    let (mut client, server) = tokio::io::duplex(4096);
    let request = request_bytes(
        "panel-issued",
        Command::TCP,
        &Address::IPv4([192, 0, 2, 8], 443),
        b"",
    );
    client.write_all(&request).await.unwrap();

    service
        .handle_connection(server, source_addr(), Box::new(|| {}))
        .await
        .unwrap();

    assert_eq!(*handler.resolved.lock().unwrap(), Some(7001));
}
