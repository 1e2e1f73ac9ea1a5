use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam;

use connection::{Config, Conn};
use error::Error;
use field::{Field, MESSAGE_TYPE_CUSTOM_CERT};
use negotiation::catalog::Catalog;
use tcp_communication::{dial, generate_keypair, Listener};

fn pair(client_config: Config, server_config: Config) -> (Conn<TcpStream>, Conn<TcpStream>) {
    let listener = Listener::bind("127.0.0.1:0", server_config).unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = thread::spawn(move || listener.accept().unwrap().0);
    let client = dial(addr, client_config).unwrap();
    let server = accepted.join().unwrap();
    (client, server)
}

fn read_exact(conn: &Conn<TcpStream>, want: usize) -> Vec<u8> {
    let mut buf = vec![0u8; want];
    let mut done = 0;
    while done < want {
        let n = conn.read(&mut buf[done..]).unwrap();
        assert!(n > 0);
        done += n;
    }
    buf
}

#[test]
fn xx_handshake_echoes_thirteen_bytes() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, server) = pair(Config::new(client_keys), Config::new(server_keys));

    let server_side = thread::spawn(move || {
        let got = read_exact(&server, 13);
        assert_eq!(&got, b"hello, noise!");
        server.channel_binding().unwrap()
    });

    assert_eq!(client.write(b"hello, noise!").unwrap(), 13);
    let client_binding = client.channel_binding().unwrap();
    let server_binding = server_side.join().unwrap();
    assert!(!client_binding.is_empty());
    assert_eq!(client_binding, server_binding);
}

#[test]
fn ik_round_trips_both_ways() {
    let client_keys = generate_keypair().unwrap();
    let client_public = client_keys.public.clone();
    let server_keys = generate_keypair().unwrap();
    let server_public = server_keys.public.clone();
    let (client, server) = pair(
        Config::new(client_keys).remote_public(server_public.clone()),
        Config::new(server_keys),
    );

    let payload: Vec<u8> = (0..8192).map(|i| (i % 251) as u8).collect();
    let echo = payload.clone();

    let server_side = thread::spawn(move || {
        let got = read_exact(&server, 8192);
        assert_eq!(got, echo);
        assert_eq!(server.write(&got).unwrap(), 8192);
        assert_eq!(server.remote_static().unwrap(), client_public);
        server.channel_binding().unwrap()
    });

    assert_eq!(client.write(&payload).unwrap(), 8192);
    let got = read_exact(&client, 8192);
    assert_eq!(got, payload);
    assert_eq!(client.remote_static().unwrap(), server_public);
    assert_eq!(client.channel_binding().unwrap(), server_side.join().unwrap());
}

#[test]
fn single_writer_order_is_preserved() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, server) = pair(Config::new(client_keys), Config::new(server_keys));

    // chunk sizes straddle the record limit so one write spans records
    let chunks: Vec<Vec<u8>> = [3usize, 1500, 70_000, 13]
        .iter()
        .enumerate()
        .map(|(i, &len)| vec![i as u8 + 1; len])
        .collect();
    let total: usize = chunks.iter().map(Vec::len).sum();
    let expected: Vec<u8> = chunks.iter().flat_map(|c| c.iter().cloned()).collect();

    let server_side = thread::spawn(move || read_exact(&server, total));

    for chunk in &chunks {
        assert_eq!(client.write(chunk).unwrap(), chunk.len());
    }
    assert_eq!(server_side.join().unwrap(), expected);
}

#[test]
fn padded_connections_still_deliver_exact_bytes() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, server) = pair(
        Config::new(client_keys).padding(16),
        Config::new(server_keys).padding(16),
    );

    let server_side = thread::spawn(move || {
        for &len in &[1usize, 15, 16, 17, 1000] {
            let got = read_exact(&server, len);
            assert_eq!(got, vec![len as u8; len]);
        }
    });

    for &len in &[1usize, 15, 16, 17, 1000] {
        assert_eq!(client.write(&vec![len as u8; len]).unwrap(), len);
    }
    server_side.join().unwrap();
}

#[test]
fn verify_hook_veto_latches_the_handshake() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_by_hook = seen.clone();
    let client_config = Config::new(client_keys).verify(Arc::new(move |_peer, fields| {
        if fields.iter().any(|f| f.kind == MESSAGE_TYPE_CUSTOM_CERT) {
            seen_by_hook.fetch_add(1, Ordering::SeqCst);
        }
        Err(Error::Verify("untrusted certificate".to_string()))
    }));
    let server_config = Config::new(server_keys).payload_field(Field {
        kind: MESSAGE_TYPE_CUSTOM_CERT,
        data: br#"{owner:"bob@server.com"}"#.to_vec(),
    });

    let (client, server) = pair(client_config, server_config);
    let server_side = thread::spawn(move || {
        // the client aborts after our response; this handshake fails
        let _ = server.handshake();
    });

    match client.write(b"x") {
        Err(Error::Verify(ref msg)) => assert_eq!(msg, "untrusted certificate"),
        other => panic!("unexpected: {:?}", other),
    }
    // the failure is latched, not retried
    match client.write(b"x") {
        Err(Error::Verify(ref msg)) => assert_eq!(msg, "untrusted certificate"),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    client.close().unwrap();
    server_side.join().unwrap();
}

#[test]
fn thirty_two_writers_one_handshake() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();

    let handshakes = Arc::new(AtomicUsize::new(0));
    let counter = handshakes.clone();
    // the client's payload fields arrive with its static key, so the
    // server-side hook fires once per completed handshake
    let server_config = Config::new(server_keys).verify(Arc::new(move |_peer, _fields| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let client_config = Config::new(client_keys).payload_field(Field {
        kind: MESSAGE_TYPE_CUSTOM_CERT,
        data: br#"{owner:"alice@client.com"}"#.to_vec(),
    });

    let (client, server) = pair(client_config, server_config);
    let server_side = thread::spawn(move || read_exact(&server, 32));

    crossbeam::scope(|scope| {
        for _ in 0..32 {
            scope.spawn(|_| {
                assert_eq!(client.write(b"x").unwrap(), 1);
            });
        }
    })
    .unwrap();

    assert_eq!(server_side.join().unwrap(), vec![b'x'; 32]);
    assert_eq!(handshakes.load(Ordering::SeqCst), 1);
}

#[test]
fn downgrade_rejection_reaches_both_sides() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let client_catalog = Arc::new(Catalog::with_suites(&["Noise_XX_25519_AESGCM_SHA256"]).unwrap());
    let server_catalog =
        Arc::new(Catalog::with_suites(&["Noise_XX_25519_ChaChaPoly_SHA256"]).unwrap());

    let (client, server) = pair(
        Config::new(client_keys).catalog(client_catalog),
        Config::new(server_keys).catalog(server_catalog),
    );

    let server_side = thread::spawn(move || match server.handshake() {
        Err(Error::Negotiation(msg)) => {
            assert_eq!(msg, "no supported protocols found");
            // nothing more to say to the peer; drop the stream
            let _ = server.close();
        }
        other => panic!("unexpected: {:?}", other),
    });

    // the responder hangs up instead of answering, and the initiator's
    // first read of the response surfaces the failure
    assert!(client.write(b"x").is_err());
    server_side.join().unwrap();
}

#[test]
fn write_after_close_returns_closed() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, _server) = pair(Config::new(client_keys), Config::new(server_keys));

    client.close().unwrap();
    match client.write(b"x") {
        Err(Error::Closed) => {}
        other => panic!("unexpected: {:?}", other),
    }
    match client.close() {
        Err(Error::Closed) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn close_breaks_a_blocked_writer() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, server) = pair(Config::new(client_keys), Config::new(server_keys));

    // complete the handshake first so the writer blocks on data records
    let server_side = thread::spawn(move || {
        let _ = server.read(&mut [0u8; 1]);
        // stop reading; the kernel buffers fill and the writer stalls
        thread::sleep(Duration::from_millis(200));
        drop(server);
    });
    client.write(b"go").unwrap();

    let client = Arc::new(client);
    let writer = {
        let client = client.clone();
        thread::spawn(move || {
            let chunk = vec![0u8; 1 << 20];
            loop {
                if client.write(&chunk).is_err() {
                    break;
                }
            }
        })
    };

    thread::sleep(Duration::from_millis(50));
    client.close().unwrap();
    // the blocked write fails instead of deadlocking
    writer.join().unwrap();
    match client.write(b"x") {
        Err(Error::Closed) => {}
        other => panic!("unexpected: {:?}", other),
    }
    server_side.join().unwrap();
}

#[test]
fn empty_read_still_drives_the_handshake() {
    let client_keys = generate_keypair().unwrap();
    let server_keys = generate_keypair().unwrap();
    let (client, server) = pair(Config::new(client_keys), Config::new(server_keys));

    let server_side = thread::spawn(move || server.handshake().unwrap());
    assert_eq!(client.read(&mut []).unwrap(), 0);
    server_side.join().unwrap();
    assert!(!client.channel_binding().unwrap().is_empty());
}
