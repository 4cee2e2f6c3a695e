//! End-to-end reconnect against a loopback server that drops the first link.

use peerlink_session::{Network, NetworkConfig, PeerId};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MARK: u64 = 0x0807_0605_0403_0201;

fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut hdr = [0u8; 4];
    stream.read_exact(&mut hdr)?;
    let mut payload = vec![0u8; u32::from_le_bytes(hdr) as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Accepts twice. The first link is closed 200ms after its first frame; the
/// second must carry the mark followed by one more packet.
fn run_server(listener: TcpListener, ok: Arc<AtomicBool>, second: Arc<std::sync::Mutex<Vec<u8>>>) {
    let Ok((mut client, _)) = listener.accept() else {
        return;
    };
    match read_frame(&mut client) {
        Ok(first) if first.len() == 8 => {}
        _ => return,
    }
    thread::sleep(Duration::from_millis(200));
    drop(client);

    let Ok((mut client, _)) = listener.accept() else {
        return;
    };
    match read_frame(&mut client) {
        Ok(mark) if mark.len() == 8 => {}
        _ => return,
    }
    if let Ok(msg) = read_frame(&mut client) {
        *second.lock().unwrap() = msg;
        ok.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_reconnect_after_remote_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_ok = Arc::new(AtomicBool::new(false));
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let server = {
        let ok = server_ok.clone();
        let received = received.clone();
        thread::spawn(move || run_server(listener, ok, received))
    };

    // The first packet is sent before the handshake completes.
    let net = Network::with_config(NetworkConfig {
        buffer_while_connecting: true,
        ..Default::default()
    })
    .unwrap();

    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let last_peer = Arc::new(AtomicU64::new(PeerId::INVALID.0));
    {
        let connected = connected.clone();
        let disconnected = disconnected.clone();
        let last_peer = last_peer.clone();
        net.set_connection_callback(move |peer, up| {
            if up {
                last_peer.store(peer.0, Ordering::SeqCst);
                connected.fetch_add(1, Ordering::SeqCst);
            } else {
                disconnected.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let peer = net.connect("127.0.0.1", port).unwrap();
    net.set_auto_reconnect(peer, true, 100, 1000).unwrap();
    net.send(peer, &MARK.to_le_bytes()).unwrap();

    let start = Instant::now();
    let mut sent_after_reconnect = false;
    while start.elapsed() < Duration::from_secs(10) {
        net.run_callbacks().unwrap();

        if connected.load(Ordering::SeqCst) >= 2 && !sent_after_reconnect {
            if net.send(peer, &MARK.to_le_bytes()).is_ok() {
                net.send(peer, b"post-reconnect\0").unwrap();
                sent_after_reconnect = true;
            }
        }

        if server_ok.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    net.shutdown().unwrap();
    server.join().unwrap();

    assert!(sent_after_reconnect, "no second connected event");
    assert!(server_ok.load(Ordering::SeqCst), "server never saw the post-reconnect packet");
    assert_eq!(*received.lock().unwrap(), b"post-reconnect\0");
    assert_eq!(last_peer.load(Ordering::SeqCst), peer.0);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

#[test]
fn test_backoff_attempts_are_published() {
    // Bind and drop so every attempt is refused.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let net = Network::with_config(NetworkConfig {
        report_initial_failure: false,
        ..Default::default()
    })
    .unwrap();

    let peer = net.connect("127.0.0.1", port).unwrap();
    net.set_auto_reconnect(peer, true, 10, 40).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let info = net.peer_info(peer).unwrap();
        if info.reconnect_attempts >= 3 {
            assert_eq!(info.stats.connects, 0);
            break;
        }
        assert!(Instant::now() < deadline, "retries did not progress: {:?}", info);
        net.run_callbacks().unwrap();
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_reconnect_delay_restarts_after_each_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Close the first two links 200ms after accepting them, keep the third.
    let server = thread::spawn(move || {
        for _ in 0..2 {
            let (client, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(200));
            drop(client);
        }
        listener.accept().unwrap().0
    });

    let net = Network::init().unwrap();
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let log = log.clone();
        net.set_connection_callback(move |_, up| log.lock().unwrap().push((Instant::now(), up)));
    }

    let peer = net.connect("127.0.0.1", port).unwrap();
    net.set_auto_reconnect(peer, true, 100, 1000).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while log.lock().unwrap().len() < 5 {
        assert!(Instant::now() < deadline, "saw {:?}", log.lock().unwrap());
        net.run_callbacks().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    let _kept = server.join().unwrap();

    let log = log.lock().unwrap().clone();
    let states: Vec<bool> = log.iter().map(|(_, up)| *up).collect();
    assert_eq!(states, vec![true, false, true, false, true]);

    for (down, up) in [(1, 2), (3, 4)] {
        let gap = log[up].0 - log[down].0;
        assert!(
            gap >= Duration::from_millis(80) && gap < Duration::from_millis(400),
            "reconnect gap {:?} after drop {}",
            gap,
            down
        );
    }
    net.shutdown().unwrap();
}
