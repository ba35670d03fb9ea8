//! mpv backend over the JSON IPC socket.
//!
//! Each [`MpvBackend`] owns one `mpv --idle` subprocess and the Unix socket it
//! listens on. Commands are written as JSON lines tagged with a
//! `request_id`; a dedicated reader thread routes replies back to the waiting
//! caller and forwards `end-file` / `property-change` events to the handlers
//! registered by the engine.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use super::backend::{
    next_instance_id, BackendFactory, BackendOptions, EndFileHandler, EndFileReason,
    PlayerBackend, PlaylistPositionHandler,
};
use crate::error::{PlayerError, PlayerResult};
use crate::protocol_constants::{
    MPV_COMMAND_TIMEOUT_MS, MPV_PLAYLIST_POS_OBSERVER_ID, MPV_PROP_PLAYBACK_TIME,
    MPV_PROP_PLAYLIST_POS, MPV_QUIT_GRACE_MS, MPV_SOCKET_CONNECT_TIMEOUT_MS,
};

/// Spawns one mpv process per backend instance.
pub struct MpvFactory {
    mpv_path: String,
}

impl MpvFactory {
    pub fn new(mpv_path: impl Into<String>) -> Self {
        Self {
            mpv_path: mpv_path.into(),
        }
    }
}

impl BackendFactory for MpvFactory {
    fn create(&self, options: &BackendOptions) -> PlayerResult<Arc<dyn PlayerBackend>> {
        let backend = MpvBackend::spawn(&self.mpv_path, options)?;
        Ok(Arc::new(backend))
    }
}

/// Builds the mpv command line for `options`.
fn mpv_args(options: &BackendOptions, socket_path: &Path) -> Vec<String> {
    let mut args = vec![
        "--idle=yes".to_string(),
        "--no-video".to_string(),
        "--no-terminal".to_string(),
        "--really-quiet".to_string(),
        format!("--input-ipc-server={}", socket_path.display()),
        format!("--ao={}", options.audio_output),
        format!("--volume={}", options.volume),
    ];
    if let Some(device) = &options.audio_device {
        args.push(format!("--audio-device={device}"));
    }
    if let Some(buffer) = &options.buffer {
        args.push("--cache=yes".to_string());
        args.push(format!("--cache-secs={}", buffer.cache_seconds));
        args.push(format!("--demuxer-max-bytes={}", buffer.demuxer_max_bytes));
        args.push(format!("--network-timeout={}", buffer.network_timeout_seconds));
    }
    if options.prefetch {
        args.push("--prefetch-playlist=yes".to_string());
    }
    args
}

type Reply = Result<Value, String>;

/// State shared between the backend handle and its reader thread.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Sender<Reply>>>,
    end_file: Mutex<Option<EndFileHandler>>,
    playlist_position: Mutex<Option<PlaylistPositionHandler>>,
}

pub struct MpvBackend {
    id: u64,
    child: Mutex<Child>,
    writer: Mutex<UnixStream>,
    socket_path: PathBuf,
    shared: Arc<Shared>,
    next_request_id: AtomicU64,
    terminated: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl MpvBackend {
    /// Starts mpv and connects to its IPC socket.
    pub fn spawn(mpv_path: &str, options: &BackendOptions) -> PlayerResult<Self> {
        let socket_path =
            std::env::temp_dir().join(format!("klarfunk-mpv-{}.sock", Uuid::new_v4().simple()));

        let mut child = Command::new(mpv_path)
            .args(mpv_args(options, &socket_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::Spawn(format!("{mpv_path}: {e}")))?;

        let streams = connect_socket(&socket_path, &mut child).and_then(|writer| {
            let reader = writer
                .try_clone()
                .map_err(|e| PlayerError::Ipc(e.to_string()))?;
            Ok((writer, reader))
        });
        let (writer, reader_stream) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                kill_child(&mut child);
                let _ = std::fs::remove_file(&socket_path);
                return Err(e);
            }
        };

        let id = next_instance_id();
        let shared = Arc::new(Shared::default());
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("mpv-ipc-{id}"))
                .spawn(move || read_loop(reader_stream, &shared))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                kill_child(&mut child);
                let _ = std::fs::remove_file(&socket_path);
                return Err(PlayerError::Spawn(format!("IPC reader thread: {e}")));
            }
        };

        log::debug!(
            "[Audio] mpv instance {} started (pid {}, socket {})",
            id,
            child.id(),
            socket_path.display()
        );

        Ok(Self {
            id,
            child: Mutex::new(child),
            writer: Mutex::new(writer),
            socket_path,
            shared,
            next_request_id: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Sends one IPC command and waits for its reply.
    fn command(&self, name: &str, args: Vec<Value>) -> PlayerResult<Value> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(PlayerError::Terminated);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        self.shared.pending.lock().insert(request_id, tx);

        let mut command = vec![Value::from(name)];
        command.extend(args);
        let mut line = json!({ "command": command, "request_id": request_id }).to_string();
        line.push('\n');

        if let Err(e) = self.writer.lock().write_all(line.as_bytes()) {
            self.shared.pending.lock().remove(&request_id);
            return Err(PlayerError::Ipc(e.to_string()));
        }

        let timeout = Duration::from_millis(MPV_COMMAND_TIMEOUT_MS);
        match rx.recv_timeout(timeout) {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(reason)) => Err(PlayerError::Command {
                command: name.to_string(),
                reason,
            }),
            Err(RecvTimeoutError::Timeout) => {
                self.shared.pending.lock().remove(&request_id);
                Err(PlayerError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(PlayerError::Ipc("IPC connection closed".to_string()))
            }
        }
    }
}

impl PlayerBackend for MpvBackend {
    fn id(&self) -> u64 {
        self.id
    }

    fn play(&self, target: &str) -> PlayerResult<()> {
        self.command("loadfile", vec![target.into(), "replace".into()])
            .map(|_| ())
    }

    fn playlist_append(&self, target: &str) -> PlayerResult<()> {
        self.command("loadfile", vec![target.into(), "append".into()])
            .map(|_| ())
    }

    fn playback_position(&self) -> Option<f64> {
        self.command("get_property", vec![MPV_PROP_PLAYBACK_TIME.into()])
            .ok()
            .and_then(|data| data.as_f64())
    }

    fn on_end_of_item(&self, handler: EndFileHandler) {
        *self.shared.end_file.lock() = Some(handler);
    }

    fn on_playlist_position_changed(&self, handler: PlaylistPositionHandler) -> PlayerResult<()> {
        *self.shared.playlist_position.lock() = Some(handler);
        self.command(
            "observe_property",
            vec![MPV_PLAYLIST_POS_OBSERVER_ID.into(), MPV_PROP_PLAYLIST_POS.into()],
        )
        .map(|_| ())
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        // Fire-and-forget: mpv may close the socket before replying.
        let _ = self
            .writer
            .lock()
            .write_all(b"{\"command\": [\"quit\"]}\n");

        {
            let mut child = self.child.lock();
            let deadline = Instant::now() + Duration::from_millis(MPV_QUIT_GRACE_MS);
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    _ => {
                        log::debug!("[Audio] mpv instance {} did not quit, killing", self.id);
                        kill_child(&mut child);
                        break;
                    }
                }
            }
        }

        let _ = self.writer.lock().shutdown(Shutdown::Both);
        if let Some(handle) = self.reader.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);

        self.shared.end_file.lock().take();
        self.shared.playlist_position.lock().take();
        log::debug!("[Audio] mpv instance {} terminated", self.id);
    }
}

impl Drop for MpvBackend {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn kill_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Waits for mpv to create and accept connections on its IPC socket.
fn connect_socket(path: &Path, child: &mut Child) -> PlayerResult<UnixStream> {
    let timeout = Duration::from_millis(MPV_SOCKET_CONNECT_TIMEOUT_MS);
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(PlayerError::Spawn(format!("mpv exited during startup ({status})")));
        }
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                log::warn!("[Audio] mpv IPC socket never became ready: {}", e);
                return Err(PlayerError::Timeout(timeout));
            }
        }
    }
}

fn read_loop(stream: UnixStream, shared: &Shared) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        match serde_json::from_str::<Value>(&line) {
            Ok(message) => dispatch(shared, &message),
            Err(e) => log::debug!("[Audio] Ignoring malformed mpv message: {}", e),
        }
    }
    // Dropping the senders wakes every caller still waiting for a reply.
    shared.pending.lock().clear();
}

fn dispatch(shared: &Shared, message: &Value) {
    if let Some(event) = message.get("event").and_then(Value::as_str) {
        match event {
            "end-file" => {
                let reason = message
                    .get("reason")
                    .and_then(Value::as_str)
                    .map_or(EndFileReason::Unknown, EndFileReason::from_mpv);
                let handler = shared.end_file.lock().clone();
                if let Some(handler) = handler {
                    handler(reason);
                }
            }
            "property-change"
                if message.get("id").and_then(Value::as_u64)
                    == Some(MPV_PLAYLIST_POS_OBSERVER_ID) =>
            {
                let position = message
                    .get("data")
                    .and_then(Value::as_i64)
                    .filter(|pos| *pos >= 0);
                let handler = shared.playlist_position.lock().clone();
                if let Some(handler) = handler {
                    handler(position);
                }
            }
            _ => {}
        }
        return;
    }

    if let Some(request_id) = message.get("request_id").and_then(Value::as_u64) {
        let reply = match message.get("error").and_then(Value::as_str) {
            None | Some("success") => Ok(message.get("data").cloned().unwrap_or(Value::Null)),
            Some(reason) => Err(reason.to_string()),
        };
        if let Some(tx) = shared.pending.lock().remove(&request_id) {
            let _ = tx.send(reply);
        }
    }
}
