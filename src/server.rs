use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::thread::{
    self,
    JoinHandle,
};
use std::time::Duration;

use log::{
    debug,
    error,
    info,
    warn,
};
use tiny_http::{
    Method,
    Request,
};
use url::Url;

use crate::auth::{
    auth_check,
    Credential,
};
use crate::error::{
    Error,
    Result,
};
use crate::record::Store;
use crate::request::{
    process_method,
    RequestResult,
};
use crate::response::{
    exec_response,
    preflight_response,
    FILENAME_HEADER,
};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Everything `serve` needs to start.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub threads: usize,
    pub credential: Option<Credential>,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn header_value(req: &Request, field: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(field))
        .map(|h| h.value.as_str().to_string())
}

/// Public URL of the file collection as the client addressed it.
fn collection_url(host: Option<&str>) -> std::result::Result<Url, url::ParseError> {
    let host = host.unwrap_or("localhost");
    Url::parse(&format!("http://{}/files/", host)).or_else(|e| {
        debug!("unusable host header {:?}: {}", host, e);
        Url::parse("http://localhost/files/")
    })
}

/// Serve one request against the store.
pub fn handle_request(store: &Store, credential: Option<&Credential>, mut req: Request) -> io::Result<()> {
    let method = req.method().clone();
    let url = req.url().to_string();

    if method == Method::Options {
        return preflight_response(req);
    }

    let authorization = header_value(&req, "Authorization");
    match auth_check(authorization.as_deref(), credential) {
        Ok(Some(v)) => {
            debug!("authenticated as {}", v.identity);
        },
        Ok(None) => {},
        Err(e) => {
            info!("{} {} -> 401 ({})", method, url, e);
            return exec_response(req, RequestResult::auth_error());
        },
    };

    let name = match header_value(&req, FILENAME_HEADER) {
        Some(v) => match urlencoding::decode(&v) {
            Ok(s) => Some(s.into_owned()),
            Err(_) => Some(v),
        },
        None => None,
    };
    let base = match collection_url(header_value(&req, "Host").as_deref()) {
        Ok(v) => v,
        Err(e) => {
            return exec_response(req, RequestResult::from(Error::Validation(e.to_string())));
        },
    };
    let expected_size = req.body_length().map(|v| v as u64);

    let res = process_method(store, &method, &url, name, req.as_reader(), expected_size, &base);
    info!("processing request {} for {} -> {}", method, url, res.status());
    exec_response(req, res)
}

/// The registry service bound to a listening socket.
pub struct Server {
    http: Arc<tiny_http::Server>,
    store: Arc<Store>,
    credential: Option<Credential>,
    threads: usize,
}

impl Server {

    pub fn bind(addr: &str, store: Store, credential: Option<Credential>, threads: usize) -> Result<Server> {
        let http = match tiny_http::Server::http(addr) {
            Ok(v) => v,
            Err(e) => {
                return Err(Error::Transport(format!("cannot bind {}: {}", addr, e)));
            },
        };
        Ok(Server {
            http: Arc::new(http),
            store: Arc::new(store),
            credential,
            threads: threads.max(1),
        })
    }

    pub fn from_settings(settings: &ServerSettings) -> Result<Server> {
        let store = Store::open(&settings.data_dir)?;
        Server::bind(&settings.addr(), store, settings.credential.clone(), settings.threads)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.http.server_addr().to_ip()
    }

    /// Start the worker threads. They stop once `stopping` is set.
    pub fn spawn(self, stopping: Arc<AtomicBool>) -> ServerHandle {
        let addr = self.local_addr();
        match addr {
            Some(v) => {
                info!("serving {:?} on {} with {} workers", self.store.dir(), v, self.threads);
            },
            None => {
                warn!("serving {:?} on an unknown address", self.store.dir());
            },
        };
        let mut workers = vec!();
        for i in 0..self.threads {
            let http = self.http.clone();
            let store = self.store.clone();
            let credential = self.credential.clone();
            let stopping = stopping.clone();
            workers.push(thread::spawn(move || {
                worker(i, &http, &store, credential.as_ref(), &stopping);
            }));
        }
        ServerHandle {
            addr,
            stopping,
            workers,
        }
    }

    /// Serve until `stopping` is set.
    pub fn run(self, stopping: Arc<AtomicBool>) {
        self.spawn(stopping).join();
    }
}

fn worker(id: usize, http: &tiny_http::Server, store: &Store, credential: Option<&Credential>, stopping: &AtomicBool) {
    debug!("worker {} started", id);
    serve_loop(
        || http.recv_timeout(RECV_TIMEOUT),
        |req| {
            if let Err(e) = handle_request(store, credential, req) {
                warn!("cannot send response: {}", e);
            }
        },
        stopping,
    );
    debug!("worker {} stopped", id);
}

/// Hand requests from `recv` to `handle` until `stopping` is set.
///
/// A receive error means the listener is gone, so it stops every worker
/// sharing `stopping`, not just this one.
fn serve_loop<T>(mut recv: impl FnMut() -> io::Result<Option<T>>, mut handle: impl FnMut(T), stopping: &AtomicBool) {
    while !stopping.load(Ordering::SeqCst) {
        let req = match recv() {
            Ok(Some(v)) => v,
            Ok(None) => {
                continue;
            },
            Err(e) => {
                error!("listener failed, stopping: {}", e);
                stopping.store(true, Ordering::SeqCst);
                break;
            },
        };
        handle(req);
    }
}

/// Running server workers.
pub struct ServerHandle {
    addr: Option<SocketAddr>,
    stopping: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Base URL clients use to reach this server.
    pub fn url(&self) -> Option<String> {
        self.addr.map(|a| format!("http://{}/", a))
    }

    pub fn join(self) {
        for w in self.workers {
            if w.join().is_err() {
                error!("server worker panicked");
            }
        }
    }

    pub fn shutdown(self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.join();
    }
}
