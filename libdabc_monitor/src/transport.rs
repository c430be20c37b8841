use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use fxhash::FxHashSet;

use super::error::TransportError;

/// What the server is expected to return for a given request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// A JSON document (hierarchy, history, command descriptors)
    Document,
    /// Raw bytes (object payloads, images)
    Binary,
}

/// A single request against the server. The url is relative to the server base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub kind: ResponseKind,
}

/// Opaque handle identifying one in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

#[derive(Debug, Clone)]
pub enum ResponseBody {
    Document(serde_json::Value),
    Binary(Vec<u8>),
}

pub type TransportResult = Result<ResponseBody, TransportError>;

/// The asynchronous request collaborator. Items submit requests through the manager
/// and receive their responses on a later tick; `cancel` guarantees a late response
/// is discarded instead of delivered.
pub trait Transport {
    /// Queue a request. Never blocks
    fn submit(&mut self, request: Request) -> RequestToken;
    /// Drain all responses that have completed since the last call
    fn poll_completed(&mut self) -> Vec<(RequestToken, TransportResult)>;
    /// Discard the response of the given request whenever it arrives
    fn cancel(&mut self, token: RequestToken);
}

/// Canonical item path form: leading slash, no trailing slash
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::from("/")
    } else {
        format!("/{trimmed}")
    }
}

/// Request url for the hierarchy description, full or rooted at a sub path
pub fn hierarchy_url(sub_path: Option<&str>, compact: u32) -> String {
    match sub_path {
        Some(path) => format!("{}/h.json?compact={compact}", normalize_path(path)),
        None => format!("/h.json?compact={compact}"),
    }
}

/// Request url for a versioned binary object fetch. The version query is only
/// appended once the item has seen a valid version
pub fn binary_url(path: &str, version: i64) -> String {
    let path = normalize_path(path);
    if version > 0 {
        format!("{path}/getbinary?version={version}")
    } else {
        format!("{path}/getbinary")
    }
}

/// Request url for a history fetch with the trailing entry limit
pub fn history_url(path: &str, version: i64, limit: usize) -> String {
    let path = normalize_path(path);
    let mut url = format!("{path}/gethistory?limit={limit}");
    if version > 0 {
        url.push_str(&format!("&version={version}"));
    }
    url
}

/// Request url for the current field snapshot of a simple item
pub fn value_url(path: &str) -> String {
    format!("{}/get.json", normalize_path(path))
}

/// Request url for an image view item
pub fn image_url(path: &str) -> String {
    format!("{}/image.png", normalize_path(path))
}

/// Request url to execute a command with named arguments
pub fn execute_url(path: &str, args: &[(String, String)]) -> String {
    let mut url = format!("{}/execute", normalize_path(path));
    for (n, (name, value)) in args.iter().enumerate() {
        url.push(if n == 0 { '?' } else { '&' });
        url.push_str(name);
        url.push('=');
        url.push_str(&encode_query_value(value));
    }
    url
}

/// Minimal percent encoding for characters that would break the query string
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

struct Job {
    token: RequestToken,
    url: String,
    kind: ResponseKind,
}

/// Blocking-HTTP transport backed by a small pool of worker threads.
///
/// `submit` hands the request to a worker over a channel and returns immediately;
/// completed responses come back over a second channel and are drained by
/// `poll_completed` on the event-loop side. Cancelled tokens are filtered out
/// during the drain, so the pool itself never has to interrupt a running fetch.
pub struct HttpTransport {
    base: String,
    next_token: u64,
    canceled: FxHashSet<RequestToken>,
    failed: Vec<(RequestToken, TransportResult)>,
    job_tx: Option<Sender<Job>>,
    done_rx: Receiver<(RequestToken, TransportResult)>,
    workers: Vec<JoinHandle<()>>,
}

impl HttpTransport {
    /// Spawn the worker pool. `base` is the server address, e.g. `http://host:8090`
    pub fn new(base: &str, n_workers: usize) -> Self {
        let (job_tx, job_rx) = channel::<Job>();
        let (done_tx, done_rx) = channel::<(RequestToken, TransportResult)>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let n_workers = n_workers.max(1);
        let mut workers = Vec::with_capacity(n_workers);
        for _ in 0..n_workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            workers.push(std::thread::spawn(move || Self::work(rx, tx)));
        }

        Self {
            base: String::from(base.trim_end_matches('/')),
            next_token: 1,
            canceled: FxHashSet::default(),
            failed: Vec::new(),
            job_tx: Some(job_tx),
            done_rx,
            workers,
        }
    }

    fn work(jobs: Arc<Mutex<Receiver<Job>>>, done: Sender<(RequestToken, TransportResult)>) {
        let client = reqwest::blocking::Client::new();
        loop {
            let job = match jobs.lock() {
                Ok(rx) => match rx.recv() {
                    Ok(job) => job,
                    Err(_) => return,
                },
                Err(_) => return,
            };
            let result = Self::fetch(&client, &job.url, job.kind);
            if done.send((job.token, result)).is_err() {
                return;
            }
        }
    }

    fn fetch(
        client: &reqwest::blocking::Client,
        url: &str,
        kind: ResponseKind,
    ) -> TransportResult {
        let response = client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::BadStatus(status.as_u16(), String::from(url)));
        }
        match kind {
            ResponseKind::Document => {
                let text = response.text()?;
                Ok(ResponseBody::Document(serde_json::from_str(&text)?))
            }
            ResponseKind::Binary => Ok(ResponseBody::Binary(response.bytes()?.to_vec())),
        }
    }
}

impl Transport for HttpTransport {
    fn submit(&mut self, request: Request) -> RequestToken {
        let token = RequestToken(self.next_token);
        self.next_token += 1;

        let job = Job {
            token,
            url: format!("{}{}", self.base, request.url),
            kind: request.kind,
        };
        match &self.job_tx {
            Some(tx) if tx.send(job).is_ok() => (),
            _ => self.failed.push((token, Err(TransportError::Disconnected))),
        }
        token
    }

    fn poll_completed(&mut self) -> Vec<(RequestToken, TransportResult)> {
        let mut completed = std::mem::take(&mut self.failed);
        while let Ok(done) = self.done_rx.try_recv() {
            completed.push(done);
        }
        completed.retain(|(token, _)| !self.canceled.remove(token));
        completed
    }

    fn cancel(&mut self, token: RequestToken) {
        self.canceled.insert(token);
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        // closing the job channel lets the workers run off the end
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}
