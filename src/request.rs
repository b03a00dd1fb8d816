use std::fs::File;
use std::io::Read;

use log::{
    debug,
    error,
};
use tiny_http::Method;
use url::Url;

use crate::entry::{
    to_listing,
    FileEntry,
};
use crate::error::Error;
use crate::record::{
    derive_tag,
    FileRecord,
    Store,
};

#[derive(Debug, PartialEq)]
pub enum RequestResultType {
    Found,
    Listed,
    Created,
    Deleted,
    NotFound,
    InputError,
    AuthError,
    MethodError,
    RecordError,
}

/// Outcome of one registry request, before it is rendered as a response.
pub struct RequestResult {
    pub typ: RequestResultType,
    /// Text body.
    pub v: Option<String>,
    /// Blob to stream back.
    pub f: Option<File>,
    /// Record the request resolved to.
    pub r: Option<FileRecord>,
}

impl RequestResult {
    fn new(typ: RequestResultType, v: Option<String>) -> RequestResult {
        RequestResult {
            typ,
            v,
            f: None,
            r: None,
        }
    }

    pub fn status(&self) -> u16 {
        match self.typ {
            RequestResultType::Found => 200,
            RequestResultType::Listed => 200,
            RequestResultType::Created => 201,
            RequestResultType::Deleted => 200,
            RequestResultType::NotFound => 404,
            RequestResultType::InputError => 400,
            RequestResultType::AuthError => 401,
            RequestResultType::MethodError => 405,
            RequestResultType::RecordError => 500,
        }
    }

    pub fn auth_error() -> RequestResult {
        RequestResult::new(RequestResultType::AuthError, Some(String::from("unauthorized")))
    }
}

impl From<Error> for RequestResult {
    fn from(e: Error) -> RequestResult {
        let typ = match e.http_status() {
            404 => RequestResultType::NotFound,
            400 => RequestResultType::InputError,
            _ => {
                error!("request failed: {}", e);
                RequestResultType::RecordError
            },
        };
        RequestResult::new(typ, Some(e.to_string()))
    }
}

/// What a request path addresses.
#[derive(Debug, PartialEq)]
pub enum Target {
    Collection,
    File(String),
}

/// Resolve the local part of a request URL against the `/files/` prefix.
pub fn parse_target(url: &str) -> Option<Target> {
    let path = match url.split_once('?') {
        Some((p, _)) => p,
        None => url,
    };
    let rest = path.strip_prefix("/files")?;
    if rest.is_empty() || rest == "/" {
        return Some(Target::Collection);
    }
    let raw = rest.strip_prefix('/')?;
    match urlencoding::decode(raw) {
        Ok(v) => Some(Target::File(v.into_owned())),
        Err(_) => None,
    }
}

fn entry_json(r: &FileRecord, base: &Url) -> String {
    let entry = FileEntry::from_record(r, base);
    serde_json::to_string(&entry).unwrap_or_else(|_| String::from("{}"))
}

/// Handle client input by method type.
///
/// # Arguments
///
/// * `store` - Registry the request operates on.
/// * `method` - The HTTP method of the client request.
/// * `url` - The local part of the URL of the client request.
/// * `name` - Declared file name of an upload.
/// * `f` - Reader providing the content body of an upload.
/// * `expected_size` - Size hint for content body.
/// * `base` - Public URL of the `/files/` collection, used in listings.
pub fn process_method(store: &Store, method: &Method, url: &str, name: Option<String>, f: impl Read, expected_size: Option<u64>, base: &Url) -> RequestResult {
    let target = match parse_target(url) {
        Some(v) => v,
        None => {
            return RequestResult::new(RequestResultType::NotFound, Some(format!("no such resource {}", url)));
        },
    };
    debug!("{} {:?}", method, target);

    match (method, target) {
        (Method::Get, Target::Collection) => {
            let listing = to_listing(&store.list(), base);
            match serde_json::to_string(&listing) {
                Ok(v) => RequestResult::new(RequestResultType::Listed, Some(v)),
                Err(e) => RequestResult::from(Error::Index(e)),
            }
        },
        (Method::Delete, Target::Collection) => {
            match store.clear() {
                Ok(_) => RequestResult::new(RequestResultType::Deleted, Some(String::from("{}"))),
                Err(e) => RequestResult::from(e),
            }
        },
        (Method::Post, Target::Collection) => {
            let name = match name {
                Some(v) => v,
                None => {
                    return RequestResult::new(RequestResultType::InputError, Some(String::from("upload without tag needs a file name")));
                },
            };
            let tag = match derive_tag(&name) {
                Ok(v) => v,
                Err(e) => {
                    return RequestResult::from(e);
                },
            };
            put_file(store, &tag, &name, f, expected_size, base)
        },
        (Method::Put, Target::File(tag)) => {
            let name = name.unwrap_or_else(|| tag.clone());
            put_file(store, &tag, &name, f, expected_size, base)
        },
        (Method::Get, Target::File(tag)) => {
            match store.open_blob(&tag) {
                Ok((r, f)) => {
                    let mut res = RequestResult::new(RequestResultType::Found, None);
                    res.f = Some(f);
                    res.r = Some(r);
                    res
                },
                Err(e) => RequestResult::from(e),
            }
        },
        (Method::Delete, Target::File(tag)) => {
            match store.delete(&tag) {
                Ok(_) => RequestResult::new(RequestResultType::Deleted, Some(String::from("{}"))),
                Err(e) => RequestResult::from(e),
            }
        },
        (m, t) => {
            debug!("method {} not allowed on {:?}", m, t);
            RequestResult::new(RequestResultType::MethodError, Some(format!("{} not allowed", m)))
        },
    }
}

fn put_file(store: &Store, tag: &str, name: &str, f: impl Read, expected_size: Option<u64>, base: &Url) -> RequestResult {
    match store.put(tag, name, f, expected_size) {
        Ok(r) => {
            let mut res = RequestResult::new(RequestResultType::Created, Some(entry_json(&r, base)));
            res.r = Some(r);
            res
        },
        Err(e) => RequestResult::from(e),
    }
}
