use std::fs::{
    self,
    File,
};
use std::io::{
    self,
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::time::Duration;

use log::{
    debug,
    info,
};
use sha2::{
    Digest,
    Sha256,
};
use ureq::{
    Agent,
    AgentBuilder,
};
use url::Url;

use crate::auth::Credential;
use crate::bundle::{
    archive_name,
    bundle,
};
use crate::entry::{
    encode_tag,
    from_listing,
    FileEntry,
    Listing,
};
use crate::error::{
    Error,
    Result,
};
use crate::response::{
    DIGEST_HEADER,
    FILENAME_HEADER,
};

const CHUNK_SIZE: usize = 65535;

/// Receives transfer progress. Purely informational.
pub trait Progress {
    /// Called once before the first chunk, with the total if known.
    fn start(&mut self, _total: Option<u64>) {}

    /// Called after every chunk with the cumulative byte count.
    fn update(&mut self, done: u64);

    fn finish(&mut self) {}
}

impl<F: FnMut(u64)> Progress for F {
    fn update(&mut self, done: u64) {
        self(done)
    }
}

/// Reader that reports how much has been read through it.
struct ProgressReader<'a, R> {
    inner: R,
    done: u64,
    progress: &'a mut dyn Progress,
}

impl<'a, R: Read> Read for ProgressReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.done += n as u64;
            self.progress.update(self.done);
        }
        Ok(n)
    }
}

/// Files and tag an upload resolved to.
#[derive(Debug, PartialEq)]
pub struct TagResolution {
    pub files: Vec<String>,
    pub tag: Option<String>,
    /// The tag was taken from the positional arguments and also names a local path.
    pub needs_confirmation: bool,
}

/// Decide which positional arguments are files and which is the tag.
///
/// An explicit tag wins. Otherwise, with several arguments, the last one is
/// the tag; if that also exists on disk the caller has to confirm before
/// going ahead. A single argument without tag leaves the tag to the server.
///
/// # Arguments
///
/// * `args` - Positional arguments, in order.
/// * `tag` - Tag given explicitly, if any.
/// * `exists` - Whether a string names an existing local file or directory.
pub fn resolve_tag(mut args: Vec<String>, tag: Option<String>, exists: impl Fn(&str) -> bool) -> TagResolution {
    if tag.is_some() {
        return TagResolution {
            files: args,
            tag,
            needs_confirmation: false,
        };
    }
    if args.len() > 1 {
        let last = args.pop();
        let needs_confirmation = match &last {
            Some(v) => exists(v),
            None => false,
        };
        return TagResolution {
            files: args,
            tag: last,
            needs_confirmation,
        };
    }
    TagResolution {
        files: args,
        tag: None,
        needs_confirmation: false,
    }
}

/// Resolve where a download lands: inside `dest` if it is a directory.
pub fn download_path(dest: &Path, name: &str, tag: &str) -> PathBuf {
    if !dest.is_dir() {
        return dest.to_path_buf();
    }
    let base = match Path::new(name).file_name() {
        Some(v) => v.to_os_string(),
        None => tag.into(),
    };
    dest.join(base)
}

/// Talks to a registry service over HTTP.
pub struct Client {
    files: Url,
    agent: Agent,
    credential: Option<Credential>,
}

impl Client {

    /// # Arguments
    ///
    /// * `url` - API endpoint; the file collection lives at `files/` below it.
    /// * `credential` - Sent with every request if given.
    pub fn new(url: &str, credential: Option<Credential>) -> Result<Client> {
        let base = match Url::parse(url) {
            Ok(v) => v,
            Err(e) => {
                return Err(Error::Config(format!("invalid url {:?}: {}", url, e)));
            },
        };
        let files = match base.join("files/") {
            Ok(v) => v,
            Err(e) => {
                return Err(Error::Config(format!("invalid url {:?}: {}", url, e)));
            },
        };
        let agent = AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .build();
        Ok(Client {
            files,
            agent,
            credential,
        })
    }

    pub fn files_url(&self) -> &Url {
        &self.files
    }

    fn file_url(&self, tag: &str) -> Result<Url> {
        match self.files.join(&encode_tag(tag)) {
            Ok(v) => Ok(v),
            Err(e) => Err(Error::Validation(format!("tag {:?} does not form a url: {}", tag, e))),
        }
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let req = self.agent.request_url(method, url);
        match &self.credential {
            Some(c) => req.set("Authorization", &c.header_value()),
            None => req,
        }
    }

    /// Map a failed call to the crate error, naming `tag` on 404.
    fn check(&self, r: std::result::Result<ureq::Response, ureq::Error>, tag: Option<&str>) -> Result<ureq::Response> {
        match r {
            Ok(v) => Ok(v),
            Err(ureq::Error::Status(404, _)) => {
                Err(Error::NotFound(tag.unwrap_or_default().to_string()))
            },
            Err(ureq::Error::Status(401, _)) => {
                Err(Error::Transport(String::from("unauthorized, check username and password")))
            },
            Err(e) => Err(Error::from(e)),
        }
    }

    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let res = self.check(self.request("GET", &self.files).call(), None)?;
        let listing: Listing = match res.into_json() {
            Ok(v) => v,
            Err(e) => {
                return Err(Error::Transport(format!("malformed listing: {}", e)));
            },
        };
        Ok(from_listing(listing))
    }

    /// Stream `f` into the registry.
    ///
    /// # Arguments
    ///
    /// * `tag` - Target tag; without one the service derives it from `name`.
    /// * `name` - Declared file name.
    /// * `f` - Content.
    /// * `size` - Content length, if known.
    /// * `progress` - Informed after each chunk sent.
    pub fn upload_reader(&self, tag: Option<&str>, name: &str, f: impl Read, size: Option<u64>, progress: &mut dyn Progress) -> Result<FileEntry> {
        let mut req = match tag {
            Some(t) => self.request("PUT", &self.file_url(t)?),
            None => self.request("POST", &self.files),
        };
        req = req.set(FILENAME_HEADER, &urlencoding::encode(name));
        if let Some(v) = size {
            req = req.set("Content-Length", &v.to_string());
        }
        debug!("uploading {:?} as {:?} ({:?} bytes)", name, tag, size);

        progress.start(size);
        let reader = ProgressReader {
            inner: f,
            done: 0,
            progress: &mut *progress,
        };
        let r = req.send(reader);
        progress.finish();

        let res = self.check(r, tag)?;
        let mut entry: FileEntry = match res.into_json() {
            Ok(v) => v,
            Err(e) => {
                return Err(Error::Transport(format!("malformed upload response: {}", e)));
            },
        };
        if entry.tag.is_empty() {
            entry.tag = match tag {
                Some(v) => v.to_string(),
                None => tag_from_url(&entry.url).unwrap_or_default(),
            };
        }
        info!("uploaded {:?} as {:?}", name, entry.tag);
        Ok(entry)
    }

    /// Upload local paths under one tag.
    ///
    /// A single regular file is sent as is. Anything else is bundled into a
    /// zip archive first.
    pub fn upload(&self, paths: &[PathBuf], tag: Option<&str>, progress: &mut dyn Progress) -> Result<FileEntry> {
        if paths.is_empty() {
            return Err(Error::Validation(String::from("nothing to upload")));
        }
        if paths.len() == 1 && paths[0].is_file() {
            let p = &paths[0];
            let name = match p.file_name() {
                Some(v) => v.to_string_lossy().into_owned(),
                None => {
                    return Err(Error::Validation(format!("{:?} has no file name", p)));
                },
            };
            let f = File::open(p)?;
            let size = f.metadata()?.len();
            return self.upload_reader(tag, &name, f, Some(size), progress);
        }

        for p in paths {
            if !p.exists() {
                return Err(Error::Validation(format!("{:?} does not exist", p)));
            }
        }
        let name = archive_name(tag, paths);
        let mut f = bundle(paths, tempfile::tempfile()?)?;
        let size = f.seek(SeekFrom::End(0))?;
        f.seek(SeekFrom::Start(0))?;
        debug!("bundled {} paths into {} ({} bytes)", paths.len(), name, size);
        self.upload_reader(tag, &name, f, Some(size), progress)
    }

    /// Fetch the file tagged `tag` into `dest`. Returns the path written.
    ///
    /// If `dest` is a directory the declared file name is used inside it. An
    /// interrupted download leaves the partial file behind.
    pub fn download(&self, tag: &str, dest: &Path, progress: &mut dyn Progress) -> Result<PathBuf> {
        let res = self.check(self.request("GET", &self.file_url(tag)?).call(), Some(tag))?;

        let name = match res.header(FILENAME_HEADER) {
            Some(v) => match urlencoding::decode(v) {
                Ok(s) => s.into_owned(),
                Err(_) => v.to_string(),
            },
            None => tag.to_string(),
        };
        let digest = res.header(DIGEST_HEADER).map(|v| v.to_string());
        let total = res.header("Content-Length").and_then(|v| v.parse::<u64>().ok());

        let path = download_path(dest, &name, tag);
        debug!("downloading {:?} to {:?}", tag, path);
        let mut out = File::create(&path)?;
        let mut reader = res.into_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut h = Sha256::new();
        let mut done: u64 = 0;
        progress.start(total);
        loop {
            let c = match reader.read(&mut buf[..]) {
                Ok(0) => {
                    break;
                },
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                },
                Err(e) => {
                    progress.finish();
                    return Err(Error::Transport(format!("download of {:?} broke off: {}", tag, e)));
                },
            };
            out.write_all(&buf[..c])?;
            h.update(&buf[..c]);
            done += c as u64;
            progress.update(done);
        }
        progress.finish();
        out.flush()?;

        if let Some(want) = digest {
            let got = hex::encode(h.finalize());
            if !got.eq_ignore_ascii_case(&want) {
                return Err(Error::Storage(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("digest mismatch for {:?}: expected {}, got {}", tag, want, got),
                )));
            }
        }
        info!("downloaded {:?} to {:?} ({} bytes)", tag, path, done);
        Ok(path)
    }

    pub fn delete(&self, tag: &str) -> Result<()> {
        self.check(self.request("DELETE", &self.file_url(tag)?).call(), Some(tag))?;
        info!("deleted {:?}", tag);
        Ok(())
    }

    /// Delete every file in the registry.
    pub fn reset(&self) -> Result<()> {
        self.check(self.request("DELETE", &self.files).call(), None)?;
        info!("reset registry");
        Ok(())
    }
}

fn tag_from_url(url: &str) -> Option<String> {
    let u = Url::parse(url).ok()?;
    let last = u.path_segments()?.last()?.to_string();
    urlencoding::decode(&last).ok().map(|s| s.into_owned())
}

/// Whether `p` names an existing local file or directory.
pub fn path_exists(p: &str) -> bool {
    fs::metadata(p).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{
        download_path,
        resolve_tag,
        tag_from_url,
        Client,
        TagResolution,
    };
    use std::path::{
        Path,
        PathBuf,
    };
    use tempfile::tempdir;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_explicit_tag() {
        let r = resolve_tag(args(&["a", "b"]), Some(String::from("t")), |_| true);
        assert_eq!(r, TagResolution {
            files: args(&["a", "b"]),
            tag: Some(String::from("t")),
            needs_confirmation: false,
        });
    }

    #[test]
    fn test_resolve_last_arg_is_tag() {
        let r = resolve_tag(args(&["a", "b", "t"]), None, |_| false);
        assert_eq!(r.files, args(&["a", "b"]));
        assert_eq!(r.tag.as_deref(), Some("t"));
        assert!(!r.needs_confirmation);

        let r = resolve_tag(args(&["a", "b"]), None, |s| s == "b");
        assert_eq!(r.files, args(&["a"]));
        assert_eq!(r.tag.as_deref(), Some("b"));
        assert!(r.needs_confirmation);
    }

    #[test]
    fn test_resolve_single_file() {
        let r = resolve_tag(args(&["a"]), None, |_| true);
        assert_eq!(r.files, args(&["a"]));
        assert_eq!(r.tag, None);
        assert!(!r.needs_confirmation);
    }

    #[test]
    fn test_download_path() {
        let d = tempdir().unwrap();
        assert_eq!(download_path(d.path(), "x.txt", "t"), d.path().join("x.txt"));
        assert_eq!(download_path(d.path(), "../../etc/x.txt", "t"), d.path().join("x.txt"));
        assert_eq!(download_path(d.path(), "..", "t"), d.path().join("t"));
        let f = d.path().join("out.bin");
        assert_eq!(download_path(&f, "x.txt", "t"), f);
        assert_eq!(download_path(Path::new("nowhere/file"), "x", "t"), PathBuf::from("nowhere/file"));
    }

    #[test]
    fn test_urls() {
        let c = Client::new("http://localhost:5000/", None).unwrap();
        assert_eq!(c.files_url().as_str(), "http://localhost:5000/files/");
        assert_eq!(c.file_url("a b").unwrap().as_str(), "http://localhost:5000/files/a%20b");

        let c = Client::new("http://localhost:5000/api", None).unwrap();
        assert_eq!(c.files_url().as_str(), "http://localhost:5000/files/");

        assert!(Client::new("not a url", None).is_err());
        assert_eq!(tag_from_url("http://h/files/a%20b").as_deref(), Some("a b"));
    }
}
