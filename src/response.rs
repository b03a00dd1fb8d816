use std::io;

use log::debug;

use tiny_http::{
    Header,
    Request,
    Response,
    ResponseBox,
    StatusCode,
};

use crate::request::{
    RequestResult,
    RequestResultType,
};

/// Header carrying the percent-encoded UTF-8 file name of an upload or download.
pub const FILENAME_HEADER: &str = "X-Filename";

/// Header carrying the hex SHA-256 of a downloaded file.
pub const DIGEST_HEADER: &str = "X-Digest";

fn header(field: &str, value: &str) -> Option<Header> {
    match Header::from_bytes(field.as_bytes(), value.as_bytes()) {
        Ok(h) => Some(h),
        Err(_) => {
            debug!("dropping unrepresentable header {}", field);
            None
        },
    }
}

pub fn origin_headers() -> Vec<Header> {
    let server_header_v = format!("bush/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    let pairs = [
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "OPTIONS, GET, PUT, POST, DELETE"),
        ("Access-Control-Allow-Headers", "Content-Type,Authorization,X-Filename"),
        ("Access-Control-Expose-Headers", "Content-Disposition,X-Filename,X-Digest"),
        ("Server", server_header_v.as_str()),
    ];
    pairs.iter().filter_map(|(k, v)| header(k, v)).collect()
}

/// File name reduced to what fits in a quoted `Content-Disposition` parameter.
pub fn ascii_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn with_headers<R: io::Read + Send + 'static>(mut res: Response<R>, headers: Vec<Header>) -> ResponseBox {
    for h in origin_headers() {
        res.add_header(h);
    }
    for h in headers {
        res.add_header(h);
    }
    res.boxed()
}

/// Headers describing a request outcome, in addition to [origin_headers].
pub fn result_headers(r: &RequestResult) -> Vec<Header> {
    let mut headers: Vec<Header> = vec!();

    if r.typ == RequestResultType::AuthError {
        headers.extend(header("WWW-Authenticate", "Basic realm=\"bush\""));
    }

    if r.f.is_some() {
        headers.extend(header("Content-Type", mime::APPLICATION_OCTET_STREAM.as_ref()));
        if let Some(record) = &r.r {
            let disposition = format!("attachment; filename=\"{}\"", ascii_filename(&record.name));
            headers.extend(header("Content-Disposition", &disposition));
            headers.extend(header(FILENAME_HEADER, &urlencoding::encode(&record.name)));
            headers.extend(header(DIGEST_HEADER, &record.digest));
        }
    } else if r.v.is_some() {
        let content_type = match r.typ {
            RequestResultType::Listed | RequestResultType::Created | RequestResultType::Deleted => mime::APPLICATION_JSON,
            _ => mime::TEXT_PLAIN_UTF_8,
        };
        headers.extend(header("Content-Type", content_type.as_ref()));
    }
    headers
}

/// Render a request outcome as an HTTP response.
pub fn build_response(r: RequestResult) -> ResponseBox {
    let res_status = StatusCode(r.status());
    let headers = result_headers(&r);
    match r.f {
        Some(f) => {
            with_headers(Response::from_file(f).with_status_code(res_status), headers)
        },
        None => {
            match r.v {
                Some(v) => {
                    with_headers(Response::from_string(v).with_status_code(res_status), headers)
                },
                None => {
                    with_headers(Response::empty(res_status), headers)
                },
            }
        },
    }
}

pub fn preflight_response(req: Request) -> io::Result<()> {
    let res = with_headers(Response::empty(StatusCode(200)), vec!());
    debug!("served options request");
    req.respond(res)
}

pub fn exec_response(req: Request, r: RequestResult) -> io::Result<()> {
    req.respond(build_response(r))
}

#[cfg(test)]
mod tests {
    use super::{
        ascii_filename,
        result_headers,
    };
    use crate::record::Store;
    use crate::request::{
        process_method,
        RequestResultType,
    };
    use std::io::empty;
    use tempfile::tempdir;
    use tiny_http::Method;
    use url::Url;

    #[test]
    fn test_ascii_filename() {
        assert_eq!(ascii_filename("report 1.pdf"), "report 1.pdf");
        assert_eq!(ascii_filename("na\"me\\é.txt"), "na_me__.txt");
    }

    #[test]
    fn test_response_get_filename() {
        let d = tempdir().unwrap();
        let store = Store::open(d.path()).unwrap();
        store.put("foo", "café.txt", &b"foo"[..], None).unwrap();
        let base = Url::parse("http://localhost/files/").unwrap();

        let r = process_method(&store, &Method::Get, "/files/foo", None, empty(), None, &base);
        assert_eq!(r.typ, RequestResultType::Found);
        let headers = result_headers(&r);

        let find = |name: &'static str| {
            headers
                .iter()
                .find(|h| h.field.equiv(name))
                .map(|h| h.value.as_str().to_string())
        };
        assert_eq!(find("Content-Disposition").unwrap(), "attachment; filename=\"caf_.txt\"");
        assert_eq!(find("X-Filename").unwrap(), "caf%C3%A9.txt");
        assert_eq!(find("X-Digest").unwrap(), "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae");
    }

    #[test]
    fn test_response_unauthorized() {
        let r = crate::request::RequestResult::auth_error();
        assert_eq!(r.status(), 401);
        let headers = result_headers(&r);
        assert!(headers.iter().any(|h| h.field.equiv("WWW-Authenticate")));
        assert!(headers.iter().any(|h| h.field.equiv("Content-Type") && h.value.as_str().starts_with("text/plain")));
    }
}
