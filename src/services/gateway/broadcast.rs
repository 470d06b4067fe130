// HTTP radio gateway: one ffmpeg transcoder per channel, fanned out to every
// open listener connection through a broadcast channel.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::{AudioSink, PresenceTarget, VoiceGateway};
use crate::config::{BROADCAST_CHANNEL_CAPACITY, CHUNK_SIZE};
use crate::error::{PresenceError, SinkError};
use crate::services::player::CompletionSignal;
use crate::services::resolver::PlayableSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub activity: String,
    pub since: DateTime<Local>,
}

struct Listener {
    user: String,
    channel: String,
    connected_at: DateTime<Local>,
}

pub struct BroadcastGateway {
    ffmpeg: String,
    bitrate_kbps: u32,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    sinks: DashMap<String, Arc<BroadcastSink>>,
    listeners: DashMap<u64, Listener>,
    listener_counter: AtomicU64,
    presence: RwLock<Option<Presence>>,
}

impl BroadcastGateway {
    pub fn new(ffmpeg: impl Into<String>, bitrate_kbps: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            bitrate_kbps,
            channels: DashMap::new(),
            sinks: DashMap::new(),
            listeners: DashMap::new(),
            listener_counter: AtomicU64::new(0),
            presence: RwLock::new(None),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Registers `user` as a listener of `channel` until the guard is dropped.
    pub fn listen(self: &Arc<Self>, channel: &str, user: &str) -> ListenerGuard {
        let id = self.listener_counter.fetch_add(1, Ordering::SeqCst);

        // Registered before subscribing, so a concurrent departure never
        // sees the channel as empty and drops it under us.
        self.listeners.insert(
            id,
            Listener {
                user: user.to_string(),
                channel: channel.to_string(),
                connected_at: Local::now(),
            },
        );
        let rx = self.sender(channel).subscribe();
        info!(
            "Listener {} ({}) joined #{}. Total listeners: {}",
            id,
            user,
            channel,
            self.listeners.len()
        );

        ListenerGuard {
            id,
            gateway: Arc::clone(self),
            rx,
        }
    }

    fn remove_listener(&self, id: u64) {
        if let Some((_, listener)) = self.listeners.remove(&id) {
            let minutes = (Local::now() - listener.connected_at).num_minutes();
            info!(
                "Listener {} ({}) left #{} after {} min. Total listeners: {}",
                id,
                listener.user,
                listener.channel,
                minutes,
                self.listeners.len()
            );
            self.release_channel(&listener.channel);
        }
    }

    /// Forgets a channel nobody listens to and nothing plays into.
    fn release_channel(&self, channel: &str) {
        let released = self.channels.remove_if(channel, |_, _| {
            !self.sinks.contains_key(channel) && !self.listeners.iter().any(|l| l.channel == channel)
        });
        if released.is_some() {
            debug!("Released #{}", channel);
        }
    }

    /// Channels that currently have listeners or a sink.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[cfg(test)]
    fn listener_count(&self, channel: &str) -> usize {
        self.listeners.iter().filter(|l| l.channel == channel).count()
    }

    pub fn presence(&self) -> Option<Presence> {
        self.presence.read().clone()
    }
}

#[async_trait]
impl VoiceGateway for BroadcastGateway {
    fn voice_channel_of(&self, user: &str) -> Option<String> {
        self.listeners
            .iter()
            .find(|l| l.user == user)
            .map(|l| l.channel.clone())
    }

    async fn connect(&self, channel: &str) -> Result<Arc<dyn AudioSink>, SinkError> {
        if let Some(sink) = self.sinks.get(channel) {
            return Ok(sink.clone());
        }

        // Holding the channel entry keeps it from being released before the
        // sink that feeds it is registered.
        let tx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CHANNEL_CAPACITY).0);
        let sink = self
            .sinks
            .entry(channel.to_string())
            .or_insert_with(|| {
                info!("Connected to #{}", channel);
                Arc::new(BroadcastSink::new(
                    channel,
                    self.ffmpeg.clone(),
                    self.bitrate_kbps,
                    tx.clone(),
                ))
            })
            .clone();
        drop(tx);
        Ok(sink)
    }
}

impl PresenceTarget for BroadcastGateway {
    fn publish(&self, activity: Option<&str>) -> Result<(), PresenceError> {
        *self.presence.write() = activity.map(|activity| Presence {
            activity: activity.to_string(),
            since: Local::now(),
        });
        Ok(())
    }
}

/// An open listener connection. Dropping it frees the user's seat.
pub struct ListenerGuard {
    id: u64,
    gateway: Arc<BroadcastGateway>,
    rx: broadcast::Receiver<Bytes>,
}

impl ListenerGuard {
    pub async fn recv(&mut self) -> Result<Bytes, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.gateway.remove_listener(self.id);
    }
}

/// Plays one source at a time through an ffmpeg child process, at real-time
/// rate, into the channel's broadcast.
pub struct BroadcastSink {
    channel: String,
    ffmpeg: String,
    bitrate_kbps: u32,
    tx: broadcast::Sender<Bytes>,
    is_playing: Arc<AtomicBool>,
    // Bumped on every play so a finishing pump can tell whether it is still current.
    play_id: Arc<AtomicU64>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl BroadcastSink {
    pub fn new(channel: &str, ffmpeg: String, bitrate_kbps: u32, tx: broadcast::Sender<Bytes>) -> Self {
        Self {
            channel: channel.to_string(),
            ffmpeg,
            bitrate_kbps,
            tx,
            is_playing: Arc::new(AtomicBool::new(false)),
            play_id: Arc::new(AtomicU64::new(0)),
            stop_tx: Mutex::new(None),
        }
    }

    fn command(&self, source: &PlayableSource) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if source.is_stream() {
            cmd.args(["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]);
        }
        cmd.arg("-re")
            .arg("-i")
            .arg(source.input())
            .args(["-vn", "-ac", "2", "-ar", "44100", "-f", "mp3"])
            .arg("-b:a")
            .arg(format!("{}k", self.bitrate_kbps))
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl AudioSink for BroadcastSink {
    fn play(&self, source: PlayableSource, done: CompletionSignal) -> Result<(), SinkError> {
        // One source at a time.
        if let Some(previous) = self.stop_tx.lock().take() {
            let _ = previous.send(());
        }

        let mut child = self.command(&source).spawn().map_err(SinkError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SinkError::Exited("transcoder has no stdout".to_string()))?;
        let stderr = child.stderr.take().map(drain_stderr);

        let id = self.play_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(stop_tx);
        self.is_playing.store(true, Ordering::SeqCst);

        debug!("#{}: transcoding {}", self.channel, source.input());

        let pump = Pump {
            channel: self.channel.clone(),
            tx: self.tx.clone(),
            is_playing: self.is_playing.clone(),
            play_id: self.play_id.clone(),
            id,
        };
        tokio::spawn(pump.run(child, stdout, stderr, stop_rx, source, done));
        Ok(())
    }

    fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        self.is_playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }
}

struct Pump {
    channel: String,
    tx: broadcast::Sender<Bytes>,
    is_playing: Arc<AtomicBool>,
    play_id: Arc<AtomicU64>,
    id: u64,
}

impl Pump {
    async fn run(
        self,
        mut child: Child,
        mut stdout: ChildStdout,
        stderr: Option<JoinHandle<String>>,
        mut stop_rx: oneshot::Receiver<()>,
        source: PlayableSource,
        done: CompletionSignal,
    ) {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut bytes_sent: u64 = 0;

        let result = loop {
            tokio::select! {
                // A dropped sender counts as a stop too.
                _ = &mut stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("#{}: failed to kill transcoder: {}", self.channel, e);
                    }
                    break Ok(());
                }
                read = stdout.read(&mut buffer) => match read {
                    Ok(0) => break exit_status(&mut child, stderr).await,
                    Ok(n) => {
                        bytes_sent += n as u64;
                        // No receivers is fine: nobody is listening right now.
                        let _ = self.tx.send(Bytes::copy_from_slice(&buffer[..n]));
                    }
                    Err(e) => {
                        let _ = child.kill().await;
                        break Err(SinkError::Io(e));
                    }
                },
            }
        };

        drop(source);
        if self.play_id.load(Ordering::SeqCst) == self.id {
            self.is_playing.store(false, Ordering::SeqCst);
        }

        match &result {
            Ok(()) => debug!("#{}: playback ended after {} bytes", self.channel, bytes_sent),
            Err(e) => error!("#{}: playback failed: {}", self.channel, e),
        }
        done.complete(result);
    }
}

/// Keeps the last line ffmpeg printed, so the pipe never fills up.
fn drain_stderr(pipe: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        let mut last = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                last = line;
            }
        }
        last
    })
}

async fn exit_status(child: &mut Child, stderr: Option<JoinHandle<String>>) -> Result<(), SinkError> {
    let status = child.wait().await?;
    if status.success() {
        return Ok(());
    }

    let last = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    Err(SinkError::Exited(format!("{} {}", status, last).trim().to_string()))
}
