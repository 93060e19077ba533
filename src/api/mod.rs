//! HTTP job control surface.
//!
//! Std-thread HTTP/1.1 server. The accept loop is non-blocking so it can
//! watch the shutdown flag; each connection is served on its own thread,
//! up to `max_connections` at once (beyond that the client gets a 503).
//!
//! | method | path                             |                                    |
//! |--------|----------------------------------|------------------------------------|
//! | GET    | /health                          | liveness                           |
//! | GET    | /api/hardware-info               | host profile                       |
//! | PUT    | /api/upload/<filename>           | store video bytes                  |
//! | PUT    | /api/upload/<video>.tracks.jsonl | recorded tracks for a stored video |
//! | POST   | /api/process                     | submit a job                       |
//! | GET    | /api/status/<id>                 | status, progress, error            |
//! | GET    | /api/results/<id>                | result JSON                        |
//! | GET    | /api/export-csv/<id>             | CSV report                         |
//! | GET    | /api/jobs                        | all jobs                           |
//! | POST   | /api/cancel/<id>                 | request cancellation               |
//! | DELETE | /api/cleanup/<id>                | delete job and artifacts           |

mod http;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::io::{self, Cursor, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::backends::replay::SIDECAR_SUFFIX;
use crate::error::{ErrorKind, InputError, JobError, UploadError};
use crate::export::report_filename;
use crate::hardware::HardwareInfo;
use crate::ingest::{open_video, VideoInfo};
use crate::jobs::{JobId, JobManager, JobRequest};
use crate::pipeline::AnalysisSettings;
use crate::region::{build_regions, RegionSpec};
use crate::upload::UploadStore;

use http::{read_head, read_small_body, write_response, HttpRequest, Response, MAX_JSON_BODY_BYTES};

const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_TIMEOUT: Duration = Duration::from_secs(30);
/// Unread body bytes drained before replying, so clients see the response.
const DRAIN_LIMIT: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_connections: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_connections: 16,
        }
    }
}

/// Job parameters used when a submission leaves them out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JobDefaults {
    pub conf_threshold: f32,
    pub frame_skip: u32,
}

/// Everything request handlers need.
#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobManager,
    pub uploads: Arc<UploadStore>,
    pub hardware: HardwareInfo,
    pub defaults: JobDefaults,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let max_connections = self.cfg.max_connections.max(1);
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("datatrack-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state, max_connections, shutdown_thread) {
                    log::error!("job api stopped: {}", err);
                }
            })?;
        log::info!("job api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: ApiState,
    max_connections: usize,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let in_flight = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                stream.set_nonblocking(false)?;
                if in_flight.fetch_add(1, Ordering::SeqCst) >= max_connections {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    log::warn!("job api busy; refusing {}", peer);
                    let _ = write_response(&mut stream, &Response::error(503, "server busy"));
                    continue;
                }
                let state = state.clone();
                let counter = in_flight.clone();
                let spawned = std::thread::Builder::new()
                    .name("datatrack-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("job api request from {} failed: {:#}", peer, err);
                        }
                        counter.fetch_sub(1, Ordering::SeqCst);
                    });
                if let Err(err) = spawned {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    log::error!("job api could not start connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_read_timeout(Some(HEAD_TIMEOUT))?;
    let (request, prefix) = match read_head(&mut stream) {
        Ok(parsed) => parsed,
        Err(err) => {
            let _ = write_response(&mut stream, &Response::error(400, "malformed request"));
            return Err(err);
        }
    };
    let declared = match request.content_length() {
        Ok(len) => len,
        Err(err) => {
            write_response(&mut stream, &Response::error(400, &err.to_string()))?;
            return Ok(());
        }
    };
    stream.set_read_timeout(Some(BODY_TIMEOUT))?;

    let body_len = declared.unwrap_or(0);
    let prefix_len = (prefix.len() as u64).min(body_len);
    let reader = stream.try_clone()?;
    let mut body = Cursor::new(prefix)
        .take(prefix_len)
        .chain(reader.take(body_len - prefix_len));

    let response = route(state, &request, &mut body, declared);
    let _ = io::copy(&mut body.take(DRAIN_LIMIT), &mut io::sink());

    if response.status >= 400 {
        log::debug!("{} {} -> {}", request.method, request.path, response.status);
    }
    write_response(&mut stream, &response)
}

fn route(
    state: &ApiState,
    request: &HttpRequest,
    body: &mut dyn Read,
    declared_len: Option<u64>,
) -> Response {
    let segments = request.segments();
    let parts: Vec<&str> = segments.iter().map(String::as_str).collect();
    match (request.method.as_str(), parts.as_slice()) {
        ("GET", ["health"]) => Response::json(200, &json!({ "status": "ok" })),
        ("GET", ["api", "hardware-info"]) => Response::json(200, &state.hardware),
        ("PUT" | "POST", ["api", "upload", filename]) => {
            upload(state, filename, body, declared_len)
        }
        ("POST", ["api", "process"]) => process(state, body),
        ("GET", ["api", "status", id]) => with_job(id, |id| {
            let view = state.jobs.status(id)?;
            Ok(Response::json(
                200,
                &json!({
                    "success": true,
                    "status": view.status,
                    "progress": view.progress,
                    "error": view.error,
                }),
            ))
        }),
        ("GET", ["api", "results", id]) => with_job(id, |id| {
            let result = state.jobs.result(id)?;
            Ok(Response::json(
                200,
                &json!({ "success": true, "results": result }),
            ))
        }),
        ("GET", ["api", "export-csv", id]) => with_job(id, |id| {
            let csv = state.jobs.export_csv(id)?;
            Ok(Response::csv(csv, report_filename(id)))
        }),
        ("GET", ["api", "jobs"]) => Response::json(
            200,
            &json!({ "success": true, "jobs": state.jobs.list_jobs() }),
        ),
        ("POST", ["api", "cancel", id]) => with_job(id, |id| {
            let status = state.jobs.cancel(id)?;
            Ok(Response::json(
                200,
                &json!({ "success": true, "status": status }),
            ))
        }),
        ("DELETE", ["api", "cleanup", id]) => with_job(id, |id| {
            state.jobs.cleanup(id)?;
            Ok(Response::json(200, &json!({ "success": true })))
        }),
        (_, ["health"])
        | (_, ["api", "hardware-info" | "process" | "jobs"])
        | (_, ["api", "upload" | "status" | "results" | "export-csv" | "cancel" | "cleanup", _]) => {
            Response::error(405, "method not allowed")
        }
        _ => Response::error(404, "not found"),
    }
}

/// Parses the job id segment and maps job errors to responses. A malformed
/// id cannot name a job, so it is reported as not found.
fn with_job(raw_id: &str, f: impl FnOnce(JobId) -> Result<Response, JobError>) -> Response {
    let Ok(id) = raw_id.parse::<JobId>() else {
        return Response::error(404, "job not found");
    };
    f(id).unwrap_or_else(|err| job_error_response(&err))
}

fn upload(
    state: &ApiState,
    filename: &str,
    body: &mut dyn Read,
    declared_len: Option<u64>,
) -> Response {
    if declared_len.unwrap_or(0) == 0 {
        return input_error_response(&InputError::MissingFile);
    }
    if let Some(video) = filename.strip_suffix(SIDECAR_SUFFIX) {
        return upload_tracks(state, video, body, declared_len);
    }
    let stored = match state.uploads.save(filename, body, declared_len) {
        Ok(stored) => stored,
        Err(err) => return upload_error_response(filename, err),
    };
    let video_info = match open_video(&stored.path) {
        Ok(source) => Some(source.info()),
        Err(err) => {
            log::debug!("no video info for {}: {:#}", stored.filename, err);
            None
        }
    };
    Response::json(
        200,
        &json!({
            "success": true,
            "filename": stored.filename,
            "bytes": stored.bytes,
            "video_info": video_info.map(video_info_json),
        }),
    )
}

fn upload_tracks(
    state: &ApiState,
    video: &str,
    body: &mut dyn Read,
    declared_len: Option<u64>,
) -> Response {
    let stored = match state.uploads.save_tracks(video, body, declared_len) {
        Ok(stored) => stored,
        Err(err) => return upload_error_response(video, err),
    };
    Response::json(
        200,
        &json!({
            "success": true,
            "filename": stored.filename,
            "bytes": stored.bytes,
            "frames": stored.frames,
            "video_info": stored.video_info.map(video_info_json),
        }),
    )
}

fn upload_error_response(filename: &str, err: UploadError) -> Response {
    match err {
        UploadError::Input(err) => {
            log::warn!("upload '{}' rejected: {}", filename, err);
            input_error_response(&err)
        }
        err => {
            log::error!("upload '{}' failed: {}", filename, err);
            Response::error(500, &err.to_string())
        }
    }
}

fn video_info_json(info: VideoInfo) -> serde_json::Value {
    let duration = if info.fps > 0.0 {
        info.total_frames as f64 / info.fps
    } else {
        0.0
    };
    json!({
        "total_frames": info.total_frames,
        "fps": info.fps,
        "width": info.width,
        "height": info.height,
        "duration": duration,
    })
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    filename: Option<String>,
    #[serde(default)]
    regions: Vec<RegionSpec>,
    conf_threshold: Option<f32>,
    frame_skip: Option<u32>,
}

fn process(state: &ApiState, body: &mut dyn Read) -> Response {
    let raw = match read_small_body(body, MAX_JSON_BODY_BYTES) {
        Ok(raw) => raw,
        Err(err) => return Response::error(400, &err.to_string()),
    };
    let submitted: ProcessRequest = match serde_json::from_slice(&raw) {
        Ok(req) => req,
        Err(err) => {
            return input_error_response(&InputError::Malformed(err.to_string()));
        }
    };
    match submit(state, submitted) {
        Ok(id) => Response::json(200, &json!({ "success": true, "job_id": id })),
        Err(err) => {
            log::warn!("job submission rejected: {}", err);
            job_error_response(&err)
        }
    }
}

fn submit(state: &ApiState, submitted: ProcessRequest) -> Result<JobId, JobError> {
    let filename = submitted
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or(InputError::EmptyFilename)?;
    let video_ref = state.uploads.resolve(&filename)?;
    let settings = AnalysisSettings {
        regions: build_regions(submitted.regions)?,
        conf_threshold: submitted
            .conf_threshold
            .unwrap_or(state.defaults.conf_threshold),
        frame_skip: submitted.frame_skip.unwrap_or(state.defaults.frame_skip),
    };
    state.jobs.create_job(JobRequest::new(video_ref, settings))
}

fn input_error_response(err: &InputError) -> Response {
    if matches!(err, InputError::TooLarge { .. }) {
        return Response::error(413, &err.to_string());
    }
    Response::error(status_for(err.kind()), &err.to_string())
}

fn job_error_response(err: &JobError) -> Response {
    match err {
        JobError::Input(input) => input_error_response(input),
        _ => Response::error(status_for(err.kind()), &err.to_string()),
    }
}

fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Input | ErrorKind::NotReady => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::Internal => 500,
    }
}
