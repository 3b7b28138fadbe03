use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use url::Url;

use crate::auth;
use crate::checksum::{self, ChecksumError, Expected};
use crate::defaults;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header `{0}`")]
    InvalidHeader(String),

    #[error("Could not read cookie file {1}")]
    CookieFile(#[source] io::Error, PathBuf),

    #[error("{url} redirected to {location:?} but redirects are disabled")]
    Redirected { url: Url, location: Option<String> },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: Url, status: u16 },

    #[error("Giving up on {url} after {attempts} attempts")]
    RetriesExhausted {
        url: Url,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("Request to {1} failed")]
    Request(#[source] reqwest::Error, Url),

    #[error("{algorithm} of {path} is {actual}, expected {expected}")]
    Integrity {
        path: PathBuf,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("I/O error at {1}")]
    Io(#[source] io::Error, PathBuf),

    #[error("Could not move download into {1}")]
    Persist(#[source] io::Error, PathBuf),
}

impl DownloadError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, DownloadError::Integrity { .. })
    }
}

/// One HTTP GET and how to authenticate it.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub allow_redirects: bool,
    pub headers: Vec<(String, String)>,
    pub cookie_file: Option<PathBuf>,
    pub netrc_file: Option<PathBuf>,
    pub bearer: Option<String>,
}

impl Request {
    pub fn new(url: Url) -> Request {
        Request {
            url,
            allow_redirects: false,
            headers: vec![],
            cookie_file: None,
            netrc_file: None,
            bearer: None,
        }
    }

    pub fn parse(url: &str) -> Result<Request, DownloadError> {
        Url::parse(url)
            .map(Request::new)
            .map_err(|_| DownloadError::InvalidUrl(url.to_string()))
    }

    pub fn follow_redirects(mut self, allow: bool) -> Request {
        self.allow_redirects = allow;
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Request {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn cookie_file(mut self, path: Option<PathBuf>) -> Request {
        self.cookie_file = path;
        self
    }

    /// Authenticate with the credentials `path` holds for the URL's host.
    pub fn netrc(mut self, path: Option<PathBuf>) -> Request {
        self.netrc_file = path;
        self
    }

    pub fn bearer<S: Into<String>>(mut self, token: S) -> Request {
        self.bearer = Some(token.into());
        self
    }

    /// Local name of the resource: the last non-empty URL path segment.
    pub fn file_name(&self) -> Result<String, DownloadError> {
        file_name(&self.url)
    }
}

pub fn file_name(url: &Url) -> Result<String, DownloadError> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))
}

/// How an artifact ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    Cached(PathBuf),
    Downloaded(PathBuf),
}

impl Acquired {
    pub fn path(&self) -> &Path {
        match self {
            Acquired::Cached(p) | Acquired::Downloaded(p) => p,
        }
    }
}

enum Failure {
    Transport(reqwest::Error),
    Fatal(DownloadError),
}

impl From<DownloadError> for Failure {
    fn from(e: DownloadError) -> Failure {
        Failure::Fatal(e)
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    attempts: u32,
    delay: Duration,
    connect_timeout: Duration,
}

impl Default for Fetcher {
    fn default() -> Fetcher {
        Fetcher {
            attempts: defaults::DOWNLOAD_ATTEMPTS,
            delay: defaults::DOWNLOAD_RETRY_DELAY,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}

impl Fetcher {
    pub fn new(attempts: u32, delay: Duration) -> Fetcher {
        Fetcher {
            attempts: attempts.max(1),
            delay,
            ..Fetcher::default()
        }
    }

    fn client(&self, request: &Request) -> Result<Client, DownloadError> {
        let policy = if request.allow_redirects {
            Policy::limited(defaults::MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        Client::builder()
            .redirect(policy)
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("flutter-workspace/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DownloadError::Client)
    }

    fn headers(&self, request: &Request) -> Result<HeaderMap, DownloadError> {
        let mut headers = HeaderMap::new();

        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| DownloadError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| DownloadError::InvalidHeader(key.clone()))?;
            headers.insert(name, value);
        }

        if let Some(path) = &request.cookie_file {
            let contents = fs::read_to_string(path)
                .map_err(|e| DownloadError::CookieFile(e, path.clone()))?;
            if let Some(cookie) = auth::cookie_header(&contents, &request.url) {
                let value = HeaderValue::from_str(&cookie)
                    .map_err(|_| DownloadError::InvalidHeader(header::COOKIE.to_string()))?;
                headers.insert(header::COOKIE, value);
            } else {
                log::debug!("No cookies in {:?} apply to {}", path, &request.url);
            }
        }

        Ok(headers)
    }

    fn send(&self, client: &Client, request: &Request) -> Result<Response, Failure> {
        let mut builder = client.get(request.url.clone()).headers(self.headers(request)?);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        } else if let Some(path) = &request.netrc_file {
            let creds = fs::read_to_string(path)
                .ok()
                .and_then(|contents| {
                    request
                        .url
                        .host_str()
                        .and_then(|host| auth::netrc_lookup(&contents, host))
                });
            match creds {
                Some(creds) => builder = builder.basic_auth(creds.login, creds.password),
                None => log::warn!("No netrc credentials for {}", &request.url),
            }
        }

        match builder.send() {
            Ok(res) => Ok(res),
            Err(e) if e.is_redirect() || e.is_builder() => {
                Err(Failure::Fatal(DownloadError::Request(e, request.url.clone())))
            }
            Err(e) => Err(Failure::Transport(e)),
        }
    }

    fn with_retries<T, F>(&self, request: &Request, mut attempt: F) -> Result<T, DownloadError>
    where
        F: FnMut(&Client) -> Result<T, Failure>,
    {
        let client = self.client(request)?;
        let mut n = 1;

        loop {
            match attempt(&client) {
                Ok(v) => return Ok(v),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Transport(e)) if n >= self.attempts => {
                    return Err(DownloadError::RetriesExhausted {
                        url: request.url.clone(),
                        attempts: n,
                        source: e,
                    })
                }
                Err(Failure::Transport(e)) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        n,
                        self.attempts,
                        &request.url,
                        e
                    );
                    std::thread::sleep(self.delay);
                    n += 1;
                }
            }
        }
    }

    /// Downloads `request` into `dest`. The file only appears at `dest` once
    /// the whole body has been written and synced.
    pub fn fetch(&self, request: &Request, dest: &Path) -> Result<PathBuf, DownloadError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| DownloadError::Io(e, dir.clone()))?;

        log::info!("Downloading {} to {:?}", &request.url, dest);

        self.with_retries(request, |client| {
            let mut res = self.send(client, request)?;
            check_status(request, &res)?;

            let len = res
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);

            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| DownloadError::Io(e, dir.clone()))?;
            let tmp_path = tmp.path().to_path_buf();

            {
                let url = &request.url;
                let mut writer = ProgressWriter::new(
                    BufWriter::new(tmp.as_file_mut()),
                    len,
                    |cur, max| log::trace!("{}: {}/{} bytes", url, cur, max),
                );
                res.copy_to(&mut writer).map_err(Failure::Transport)?;
                writer
                    .flush()
                    .map_err(|e| DownloadError::Io(e, tmp_path.clone()))?;
            }

            tmp.as_file()
                .sync_all()
                .map_err(|e| DownloadError::Io(e, tmp_path.clone()))?;
            tmp.persist(dest)
                .map_err(|e| DownloadError::Persist(e.error, dest.to_path_buf()))?;

            Ok(dest.to_path_buf())
        })
    }

    /// Fetches a text body regardless of status so callers can inspect API
    /// error payloads.
    pub fn get_text(&self, request: &Request) -> Result<(u16, String), DownloadError> {
        log::debug!("GET {}", &request.url);
        self.with_retries(request, |client| {
            let res = self.send(client, request)?;
            let status = res.status().as_u16();
            let body = res.text().map_err(Failure::Transport)?;
            Ok((status, body))
        })
    }

    /// Makes sure a verified copy of the resource exists in `dir`.
    ///
    /// The network is skipped when the checksum sidecar verifies, or when the
    /// file is present and matches `expected`. A download that does not match
    /// `expected` is deleted.
    pub fn acquire(
        &self,
        request: &Request,
        dir: &Path,
        expected: Option<&Expected>,
    ) -> Result<Acquired, DownloadError> {
        self.acquire_to(request, dir.join(request.file_name()?), expected)
    }

    /// Like [`Fetcher::acquire`], storing the resource at `path`.
    pub fn acquire_to(
        &self,
        request: &Request,
        path: PathBuf,
        expected: Option<&Expected>,
    ) -> Result<Acquired, DownloadError> {
        if checksum::verified(&path) {
            log::info!("{:?} verified from sidecar, skipping download", &path);
            return Ok(Acquired::Cached(path));
        }

        if path.is_file() {
            match expected {
                Some(expected) => match expected.mismatch(&path)? {
                    None => {
                        log::info!("{:?} matches declared {}", &path, expected.algorithm());
                        checksum::record(&path)?;
                        return Ok(Acquired::Cached(path));
                    }
                    Some(actual) => {
                        log::warn!(
                            "{:?} has {} {}, expected {}; downloading again",
                            &path,
                            expected.algorithm(),
                            actual,
                            expected.value()
                        );
                    }
                },
                None => log::debug!("{:?} exists without a sidecar; downloading again", &path),
            }
        }

        self.fetch(request, &path)?;

        if let Some(expected) = expected {
            if let Some(actual) = expected.mismatch(&path)? {
                if let Err(e) = fs::remove_file(&path) {
                    log::error!("Could not remove {:?}: {}", &path, e);
                }
                return Err(DownloadError::Integrity {
                    path,
                    algorithm: expected.algorithm(),
                    expected: expected.value().to_string(),
                    actual,
                });
            }
        }

        checksum::record(&path)?;
        Ok(Acquired::Downloaded(path))
    }
}

fn check_status(request: &Request, res: &Response) -> Result<(), DownloadError> {
    let status = res.status();
    if status == reqwest::StatusCode::OK {
        return Ok(());
    }

    if status.is_redirection() && !request.allow_redirects {
        let location = res
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        return Err(DownloadError::Redirected {
            url: request.url.clone(),
            location,
        });
    }

    Err(DownloadError::HttpStatus {
        url: request.url.clone(),
        status: status.as_u16(),
    })
}

struct ProgressWriter<W: Write, F>
where
    F: Fn(u64, u64),
{
    writer: W,
    callback: F,
    max_count: u64,
    cur_count: u64,
}

impl<W: Write, F> ProgressWriter<W, F>
where
    F: Fn(u64, u64),
{
    fn new(writer: W, max_count: u64, callback: F) -> ProgressWriter<W, F> {
        (callback)(0, max_count);

        ProgressWriter {
            writer,
            callback,
            max_count,
            cur_count: 0,
        }
    }
}

impl<W: Write, F> Write for ProgressWriter<W, F>
where
    F: Fn(u64, u64),
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.cur_count += n as u64;
        (self.callback)(self.cur_count, self.max_count);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
