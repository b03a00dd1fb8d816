//! Client behaviour against a hand-rolled service that misbehaves on purpose.
use std::io;
use std::thread::{
    self,
    JoinHandle,
};
use std::time::Duration;

use tempfile::tempdir;
use tiny_http::{
    Header,
    Request,
    Response,
};

use bush::client::Client;
use bush::clock::SystemClock;
use bush::entry::FileEntry;
use bush::error::Error;
use bush::poll::wait_and_download;

/// Answer `count` requests with `respond`, then stop.
fn stub(count: usize, respond: impl Fn(Request) -> io::Result<()> + Send + 'static) -> (String, JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let t = thread::spawn(move || {
        for _ in 0..count {
            match server.recv() {
                Ok(req) => respond(req).unwrap(),
                Err(_) => break,
            }
        }
    });
    (format!("http://{}/", addr), t)
}

fn header(k: &str, v: &str) -> Header {
    Header::from_bytes(k, v).unwrap()
}

#[test]
fn test_download_digest_mismatch() {
    let (url, t) = stub(1, |req| {
        let res = Response::from_string("hello")
            .with_header(header("X-Filename", "hello.txt"))
            .with_header(header("X-Digest", &"0".repeat(64)));
        req.respond(res)
    });
    let client = Client::new(&url, None).unwrap();
    let dest = tempdir().unwrap();

    match client.download("hello", dest.path(), &mut |_: u64| {}) {
        Err(Error::Storage(e)) => {
            assert_eq!(e.kind(), io::ErrorKind::InvalidData);
            assert!(e.to_string().contains("digest mismatch"));
        },
        other => {
            panic!("expected storage error, got {:?}", other);
        },
    }
    t.join().unwrap();
}

#[test]
fn test_download_digest_match() {
    // sha256("hello")
    let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    let (url, t) = stub(1, move |req| {
        let res = Response::from_string("hello")
            .with_header(header("X-Filename", "hello.txt"))
            .with_header(header("X-Digest", &digest.to_uppercase()));
        req.respond(res)
    });
    let client = Client::new(&url, None).unwrap();
    let dest = tempdir().unwrap();
    let got = client.download("hello", dest.path(), &mut |_: u64| {}).unwrap();
    assert_eq!(std::fs::read(got).unwrap(), b"hello".to_vec());
    t.join().unwrap();
}

#[test]
fn test_wait_reports_file_before_failed_download() {
    let (url, t) = stub(2, |req| {
        if req.url() == "/files/" {
            let listing = r#"{"gone":{"name":"gone.txt","date":"2999-01-01T00:00:00Z","url":"http://localhost/files/gone"}}"#;
            let res = Response::from_string(listing)
                .with_header(header("Content-Type", "application/json"));
            req.respond(res)
        } else {
            req.respond(Response::from_string("no such file").with_status_code(404))
        }
    });
    let client = Client::new(&url, None).unwrap();
    let dest = tempdir().unwrap();

    let mut announced: Vec<String> = vec![];
    let r = wait_and_download(
        &client,
        &SystemClock,
        Duration::ZERO,
        Duration::from_millis(10),
        None,
        dest.path(),
        &mut |e: &FileEntry| announced.push(e.tag.clone()),
        &mut |_: u64| {},
    );
    assert!(r.unwrap_err().is_not_found());
    assert_eq!(announced, vec![String::from("gone")]);
    t.join().unwrap();
}
