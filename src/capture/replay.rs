//! PCAP replay: re-inject a capture preserving inter-arrival timing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::FrameSink;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay already running")]
    AlreadyRunning,
    #[error("either file or data must be provided")]
    NoInput,
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("path is a directory: {0}")]
    IsDirectory(PathBuf),
    #[error("file is empty: {0}")]
    Empty(PathBuf),
    #[error("invalid base64 data: {0}")]
    Decode(String),
    #[error("pcap read error: {0}")]
    Pcap(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReplayRequest {
    /// Absolute path to a pcap file on the host.
    pub file: Option<String>,
    /// Base64-encoded pcap contents, materialized to a temp file.
    pub data: Option<String>,
    /// Restart period in milliseconds; 0 = single pass.
    #[serde(default, alias = "loop")]
    pub loop_ms: u64,
    /// Inter-arrival time multiplier, > 0.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayStatus {
    pub running: bool,
    pub file: Option<String>,
    pub loop_ms: u64,
    pub scale: f64,
    pub started_at: Option<DateTime<Utc>>,
}

struct Inner {
    running: bool,
    file: Option<PathBuf>,
    loop_ms: u64,
    scale: f64,
    started_at: Option<DateTime<Utc>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
    /// Temp file we own (uploaded data); removed on stop/completion.
    temp: Option<PathBuf>,
}

pub struct ReplayManager {
    sink: Arc<dyn FrameSink>,
    inner: std::sync::Mutex<Inner>,
}

impl ReplayManager {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            inner: std::sync::Mutex::new(Inner {
                running: false,
                file: None,
                loop_ms: 0,
                scale: 1.0,
                started_at: None,
                stop_tx: None,
                task: None,
                temp: None,
            }),
        }
    }

    pub fn status(&self) -> ReplayStatus {
        let inner = self.inner.lock().unwrap();
        ReplayStatus {
            running: inner.running,
            file: inner.file.as_ref().map(|p| p.display().to_string()),
            loop_ms: inner.loop_ms,
            scale: inner.scale,
            started_at: inner.started_at,
        }
    }

    /// Start a replay. Fails if one is already running.
    pub async fn start(self: &Arc<Self>, req: ReplayRequest) -> Result<(), ReplayError> {
        let scale = if req.scale > 0.0 { req.scale } else { 1.0 };

        let (path, owns_temp) = match (&req.file, &req.data) {
            (Some(file), _) => {
                let path = PathBuf::from(file);
                if !path.exists() {
                    return Err(ReplayError::NotFound(path));
                }
                if path.is_dir() {
                    return Err(ReplayError::IsDirectory(path));
                }
                if std::fs::metadata(&path)?.len() == 0 {
                    return Err(ReplayError::Empty(path));
                }
                (path, false)
            }
            (None, Some(data)) => (materialize_upload(data)?, true),
            (None, None) => return Err(ReplayError::NoInput),
        };

        // Reserve the running slot before the (slow) file read so two
        // concurrent starts cannot both pass the check
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                if owns_temp {
                    let _ = std::fs::remove_file(&path);
                }
                return Err(ReplayError::AlreadyRunning);
            }
            inner.running = true;
        }

        // Read the whole capture up front, off the async threads
        let read_path = path.clone();
        let packets = match tokio::task::spawn_blocking(move || read_packets(&read_path)).await {
            Ok(Ok(packets)) if !packets.is_empty() => packets,
            outcome => {
                self.inner.lock().unwrap().running = false;
                if owns_temp {
                    let _ = std::fs::remove_file(&path);
                }
                return match outcome {
                    Ok(Ok(_)) => Err(ReplayError::Empty(path)),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(ReplayError::Pcap(e.to_string())),
                };
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);

        // Publish the running state before the task exists: a short
        // capture can complete (and call finish) almost immediately.
        {
            let mut inner = self.inner.lock().unwrap();
            inner.running = true;
            inner.file = Some(path.clone());
            inner.loop_ms = req.loop_ms;
            inner.scale = scale;
            inner.started_at = Some(Utc::now());
            inner.stop_tx = Some(stop_tx);
            inner.temp = owns_temp.then_some(path);
        }

        let manager = Arc::clone(self);
        let loop_ms = req.loop_ms;
        let task = tokio::spawn(async move {
            manager.run(packets, scale, loop_ms, stop_rx).await;
        });
        self.inner.lock().unwrap().task = Some(task);

        info!(loop_ms = req.loop_ms, scale, "replay started");
        Ok(())
    }

    /// Stop the replay. Succeeds whether or not one is running.
    pub async fn stop(&self) {
        let (stop_tx, task) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.stop_tx.take(), inner.task.take())
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        self.finish();
    }

    /// Mark stopped and clean up any owned temp file.
    fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        inner.stop_tx = None;
        inner.task = None;
        if let Some(temp) = inner.temp.take() {
            if std::fs::remove_file(&temp).is_ok() {
                debug!(path = %temp.display(), "replay temp file removed");
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        packets: Vec<(Vec<u8>, f64)>,
        scale: f64,
        loop_ms: u64,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let first_ts = packets[0].1;
        let mut cycle_start = Instant::now();

        'outer: loop {
            for (data, ts) in &packets {
                // Out-of-order captures collapse to "send now"
                let offset = (scale * (ts - first_ts)).max(0.0);
                let target = cycle_start + Duration::from_secs_f64(offset);
                if target > Instant::now() {
                    tokio::select! {
                        _ = tokio::time::sleep_until(target) => {}
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                break 'outer;
                            }
                        }
                    }
                }
                self.sink.send_frame(data);
            }

            if loop_ms == 0 {
                break;
            }

            cycle_start += Duration::from_millis(loop_ms);
            if cycle_start > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(cycle_start) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break 'outer;
                        }
                    }
                }
            }
        }

        debug!("replay pass complete");
        self.finish();
    }
}

/// Decode an inline upload to a 0644 temp file.
fn materialize_upload(data: &str) -> Result<PathBuf, ReplayError> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ReplayError::Decode(e.to_string()))?;
    if bytes.is_empty() {
        return Err(ReplayError::Decode("empty payload".into()));
    }

    let file = tempfile::Builder::new()
        .prefix("niac-replay-")
        .suffix(".pcap")
        .tempfile()?;
    let path = file.into_temp_path().keep().map_err(|e| ReplayError::Io(e.error))?;
    std::fs::write(&path, &bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644));
    }

    Ok(path)
}

/// Read all frames + capture timestamps (seconds) from a pcap file.
fn read_packets(path: &Path) -> Result<Vec<(Vec<u8>, f64)>, ReplayError> {
    let mut cap =
        pcap::Capture::from_file(path).map_err(|e| ReplayError::Pcap(e.to_string()))?;

    let mut packets = Vec::new();
    loop {
        match cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts.tv_sec as f64
                    + packet.header.ts.tv_usec as f64 / 1_000_000.0;
                packets.push((packet.data.to_vec(), ts));
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                warn!("pcap read stopped: {e}");
                break;
            }
        }
    }
    Ok(packets)
}

/// Wall-clock offsets at which each frame should be sent.
pub fn schedule(timestamps: &[f64], scale: f64) -> Vec<Duration> {
    let Some(&first) = timestamps.first() else {
        return Vec::new();
    };
    timestamps
        .iter()
        .map(|ts| Duration::from_secs_f64((scale * (ts - first)).max(0.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    struct CollectSink(Mutex<Vec<Vec<u8>>>);

    impl FrameSink for CollectSink {
        fn send_frame(&self, frame: &[u8]) {
            self.0.lock().unwrap().push(frame.to_vec());
        }
    }

    /// Minimal little-endian pcap file with the given (payload, ts) frames.
    fn write_pcap(frames: &[(&[u8], f64)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".pcap").tempfile().unwrap();
        // Global header: magic, v2.4, tz 0, sigfigs 0, snaplen, linktype EN10MB
        file.write_all(&0xa1b2c3d4u32.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&4u16.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&65535u32.to_le_bytes()).unwrap();
        file.write_all(&1u32.to_le_bytes()).unwrap();
        for (payload, ts) in frames {
            let sec = ts.trunc() as u32;
            let usec = ((ts - ts.trunc()) * 1_000_000.0).round() as u32;
            file.write_all(&sec.to_le_bytes()).unwrap();
            file.write_all(&usec.to_le_bytes()).unwrap();
            file.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            file.write_all(payload).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_schedule_scaling() {
        let offsets = schedule(&[0.0, 0.1, 0.3], 2.0);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_millis(200));
        assert_eq!(offsets[2], Duration::from_millis(600));
    }

    #[test]
    fn test_schedule_out_of_order_clamped() {
        let offsets = schedule(&[10.0, 9.5], 1.0);
        assert_eq!(offsets[1], Duration::ZERO);
    }

    #[tokio::test]
    async fn test_start_validations() {
        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        let mgr = Arc::new(ReplayManager::new(sink));

        assert!(matches!(
            mgr.start(ReplayRequest::default()).await,
            Err(ReplayError::NoInput)
        ));
        assert!(matches!(
            mgr.start(ReplayRequest {
                file: Some("/nonexistent/x.pcap".into()),
                ..Default::default()
            })
            .await,
            Err(ReplayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_sends_and_completes() {
        let frames: &[(&[u8], f64)] = &[(&[1u8; 60], 0.0), (&[2u8; 60], 0.01), (&[3u8; 60], 0.02)];
        let file = write_pcap(frames);

        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        let mgr = Arc::new(ReplayManager::new(sink.clone()));

        mgr.start(ReplayRequest {
            file: Some(file.path().display().to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

        // Second start while running is rejected
        assert!(matches!(
            mgr.start(ReplayRequest {
                file: Some(file.path().display().to_string()),
                ..Default::default()
            })
            .await,
            Err(ReplayError::AlreadyRunning)
        ));

        // ~20 ms of timeline; allow generous slack
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.0.lock().unwrap().len(), 3);
        assert!(!mgr.status().running);
    }

    #[tokio::test]
    async fn test_stop_idempotent() {
        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        let mgr = Arc::new(ReplayManager::new(sink));
        mgr.stop().await;
        mgr.stop().await;
        assert!(!mgr.status().running);
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        use base64::Engine as _;

        let frames: &[(&[u8], f64)] = &[(&[9u8; 60], 0.0)];
        let file = write_pcap(frames);
        let raw = std::fs::read(file.path()).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);

        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        let mgr = Arc::new(ReplayManager::new(sink.clone()));
        mgr.start(ReplayRequest { data: Some(encoded), ..Default::default() })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert!(!mgr.status().running);

        // Owned temp file cleaned up after the pass
        let status = mgr.status();
        if let Some(path) = status.file {
            assert!(!Path::new(&path).exists());
        }
    }
}
