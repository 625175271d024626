use crate::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Which track feeds the transport sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Live,
    Silence,
}

/// The transport-facing sender. Mute swaps the feeding track; the sender
/// itself (its identity, its channel) never changes, so the connection
/// carrying it is undisturbed.
#[derive(Debug)]
pub struct SenderSlot {
    id: u64,
    track: Track,
}

static NEXT_SENDER_ID: AtomicU64 = AtomicU64::new(1);

impl SenderSlot {
    pub fn new() -> Self {
        Self {
            id: NEXT_SENDER_ID.fetch_add(1, Ordering::SeqCst),
            track: Track::Live,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn set_track(&mut self, track: Track) {
        self.track = track;
    }
}

impl Default for SenderSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero out a frame when the silence track is feeding the sender. Length is
/// preserved so the remote keeps receiving frames at cadence; it just hears
/// nothing from the next frame on.
fn apply_track(track: Track, pcm: &mut [u8]) {
    if track == Track::Silence {
        pcm.fill(0);
    }
}

// One exclusive microphone per process. Acquire while held returns the
// existing handle; a fresh acquire after release builds a new one.
static ACTIVE_MIC: Mutex<Option<Weak<MicrophoneInner>>> = Mutex::new(None);

struct MicrophoneInner {
    slot: Mutex<SenderSlot>,
    muted: AtomicBool,
    released: AtomicBool,
    stop_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    device_name: String,
    sample_rate: u32,
}

/// Exclusive handle over the capture device. Callers must not issue
/// `mute`/`unmute`/`release` concurrently (single-writer contract, not an
/// internal lock).
#[derive(Clone)]
pub struct Microphone {
    inner: Arc<MicrophoneInner>,
}

impl Microphone {
    /// Acquire the microphone and start feeding 16-bit LE PCM frames at
    /// `target_rate` into `frame_tx`. Idempotent: while an acquisition is
    /// live, the existing handle is returned and the new channel is ignored.
    pub fn acquire(
        device_name: Option<&str>,
        frame_tx: mpsc::Sender<Vec<u8>>,
        target_rate: u32,
    ) -> crate::Result<Microphone> {
        let mut active = match ACTIVE_MIC.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = active.as_ref().and_then(Weak::upgrade) {
            if !existing.released.load(Ordering::SeqCst) {
                return Ok(Microphone { inner: existing });
            }
        }

        let target = if target_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            target_rate
        };

        let inner = Arc::new(MicrophoneInner {
            slot: Mutex::new(SenderSlot::new()),
            muted: AtomicBool::new(false),
            released: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            device_name: device_name.unwrap_or("default").to_string(),
            sample_rate: target,
        });

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<crate::Result<String>>();

        let thread_inner = inner.clone();
        let requested_device = device_name.map(String::from);
        // cpal streams are not Send; the capture thread owns the stream for
        // its whole life and everything else talks through atomics/channels.
        std::thread::spawn(move || {
            capture_thread(requested_device, frame_tx, target, thread_inner, stop_rx, ready_tx);
        });

        match ready_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(name)) => {
                println!("[audio] using device: {}", name);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoiceError::Device(
                    "capture thread did not start in time".into(),
                ))
            }
        }

        if let Ok(mut guard) = inner.stop_tx.lock() {
            *guard = Some(stop_tx);
        }
        *active = Some(Arc::downgrade(&inner));
        Ok(Microphone { inner })
    }

    /// Swap the silence track onto the sender. The capture stream keeps
    /// running; the remote stops hearing audio within one frame interval.
    pub fn mute(&self) {
        self.inner.muted.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.slot.lock() {
            slot.set_track(Track::Silence);
        }
    }

    /// Restore the live microphone track onto the same sender.
    pub fn unmute(&self) {
        self.inner.muted.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.slot.lock() {
            slot.set_track(Track::Live);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Identity and track of the transport sender.
    pub fn sender(&self) -> (u64, Track) {
        match self.inner.slot.lock() {
            Ok(slot) => (slot.id(), slot.track()),
            Err(poisoned) => {
                let slot = poisoned.into_inner();
                (slot.id(), slot.track())
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.inner.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Stop capture and free the device. Safe to call any number of times.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.inner.stop_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
        if let Ok(mut active) = ACTIVE_MIC.lock() {
            *active = None;
        }
        println!("[audio] microphone released");
    }
}

fn classify_build_error(e: &dyn std::fmt::Display) -> VoiceError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        VoiceError::Permission(text)
    } else {
        VoiceError::Device(text)
    }
}

fn capture_thread(
    requested_device: Option<String>,
    frame_tx: mpsc::Sender<Vec<u8>>,
    target_rate: u32,
    inner: Arc<MicrophoneInner>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: std::sync::mpsc::Sender<crate::Result<String>>,
) {
    let host = cpal::default_host();

    let device = match requested_device {
        Some(ref name) => {
            let found = host
                .input_devices()
                .ok()
                .and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                });
            match found {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(VoiceError::Device(format!(
                        "device '{}' not found",
                        name
                    ))));
                    return;
                }
            }
        }
        None => match host.default_input_device() {
            Some(d) => d,
            None => {
                let _ = ready_tx.send(Err(VoiceError::Device("no default input device".into())));
                return;
            }
        },
    };

    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    // Try the target rate mono, fall back to 48kHz with decimation, then the
    // device default.
    let (config, decimate) = match try_config(&device, target_rate) {
        Some(cfg) => (cfg, 1),
        None => match try_config(&device, 48000) {
            Some(cfg) => {
                let d = (cfg.sample_rate.0 / target_rate.max(1)).max(1);
                (cfg, d)
            }
            None => match device.default_input_config() {
                Ok(default) => {
                    let d = (default.sample_rate().0 / target_rate.max(1)).max(1);
                    (
                        StreamConfig {
                            channels: default.channels(),
                            sample_rate: default.sample_rate(),
                            buffer_size: cpal::BufferSize::Default,
                        },
                        d,
                    )
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Device(format!(
                        "no input config: {}",
                        e
                    ))));
                    return;
                }
            },
        },
    };

    let effective_rate = config.sample_rate.0 / decimate;
    println!(
        "[audio] stream config: {}Hz, {}ch, decimate={}, effective={}Hz",
        config.sample_rate.0, config.channels, decimate, effective_rate
    );

    let (raw_tx, raw_rx) = std::sync::mpsc::sync_channel::<Vec<f32>>(128);
    let channels = config.channels as usize;

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Downmix to mono if stereo.
            let mono: Vec<f32> = if channels > 1 {
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            } else {
                data.to_vec()
            };
            let samples: Vec<f32> = if decimate > 1 {
                mono.iter().step_by(decimate as usize).copied().collect()
            } else {
                mono
            };
            let _ = raw_tx.try_send(samples);
        },
        |err| {
            eprintln!("[audio] stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(classify_build_error(&e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(classify_build_error(&e)));
        return;
    }
    let _ = ready_tx.send(Ok(device_name));

    let mut resampler = ResamplerState::default();
    // A dropped stop sender means the acquiring side gave up; treat it the
    // same as an explicit stop so the thread never outlives its handle.
    let should_stop = |stop_rx: &std::sync::mpsc::Receiver<()>| {
        !matches!(stop_rx.try_recv(), Err(std::sync::mpsc::TryRecvError::Empty))
    };
    loop {
        // Drain frames, watching for stop/release between chunks.
        match raw_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(samples) => {
                if inner.released.load(Ordering::SeqCst) {
                    break;
                }
                let send_samples = if effective_rate == target_rate {
                    samples
                } else {
                    resample_linear(&samples, effective_rate, target_rate, &mut resampler)
                };
                let mut pcm: Vec<u8> = send_samples
                    .iter()
                    .flat_map(|&s| {
                        let clamped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        clamped.to_le_bytes()
                    })
                    .collect();
                let track = if inner.muted.load(Ordering::SeqCst) {
                    Track::Silence
                } else {
                    Track::Live
                };
                apply_track(track, &mut pcm);
                if frame_tx.try_send(pcm).is_err() && frame_tx.is_closed() {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if inner.released.load(Ordering::SeqCst) || should_stop(&stop_rx) {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if should_stop(&stop_rx) {
            break;
        }
    }

    drop(stream);
    println!("[audio] capture thread stopped");
}

fn try_config(device: &cpal::Device, rate: u32) -> Option<StreamConfig> {
    let supported = device.supported_input_configs().ok()?;
    for range in supported {
        if range.channels() == 1
            && range.min_sample_rate().0 <= rate
            && range.max_sample_rate().0 >= rate
        {
            return Some(StreamConfig {
                channels: 1,
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }
    // Also accept stereo configs (downmixed in the callback).
    let supported = device.supported_input_configs().ok()?;
    for range in supported {
        if range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
            return Some(StreamConfig {
                channels: range.channels(),
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }
    None
}

#[derive(Default)]
struct ResamplerState {
    t: f64,
    last_sample: f32,
    has_last: bool,
}

fn resample_linear(
    samples: &[f32],
    input_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> Vec<f32> {
    if samples.is_empty() || input_rate == target_rate {
        return samples.to_vec();
    }
    let step = input_rate as f64 / target_rate as f64;
    let mut out = Vec::with_capacity(((samples.len() as f64 / step) + 2.0) as usize);

    let mut buf = Vec::with_capacity(samples.len() + 1);
    if state.has_last {
        buf.push(state.last_sample);
    }
    buf.extend_from_slice(samples);

    let mut i: usize = 0;
    let mut t = state.t;
    while i + 1 < buf.len() {
        let s0 = buf[i];
        let s1 = buf[i + 1];
        let v = s0 + (s1 - s0) * t as f32;
        out.push(v);
        t += step;
        while t >= 1.0 {
            t -= 1.0;
            i += 1;
            if i + 1 >= buf.len() {
                break;
            }
        }
        if i + 1 >= buf.len() {
            break;
        }
    }

    state.t = t;
    if let Some(last) = buf.last() {
        state.last_sample = *last;
        state.has_last = true;
    }
    out
}

/// Queue of decoded assistant audio awaiting playback. Shared between the
/// session driver (enqueue/flush) and the output stream callback (drain).
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of 16-bit LE PCM.
    pub fn enqueue_pcm16(&self, pcm: &[u8]) {
        if let Ok(mut queue) = self.samples.lock() {
            for chunk in pcm.chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                queue.push_back(sample as f32 / 32768.0);
            }
        }
    }

    /// Barge-in: drop everything queued and reset scheduling.
    pub fn flush(&self) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fill(&self, out: &mut [f32], channels: usize) {
        let mut queue = match self.samples.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        for frame in out.chunks_mut(channels) {
            let sample = queue.pop_front().unwrap_or(0.0);
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
    }
}

/// Speaker output drained from a PlaybackQueue on the device's own thread.
pub struct Playback {
    stop_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl Playback {
    pub fn start(queue: PlaybackQueue, sample_rate: u32) -> crate::Result<Playback> {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<crate::Result<()>>();

        std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(VoiceError::Device(
                        "no default output device".into(),
                    )));
                    return;
                }
            };
            let config = StreamConfig {
                channels: 1,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let callback_queue = queue.clone();
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_queue.fill(data, 1);
                },
                |err| {
                    eprintln!("[audio] output stream error: {}", err);
                },
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(classify_build_error(&e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(classify_build_error(&e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Park until stopped; the callback does the work.
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(())) => Ok(Playback {
                stop_tx: Mutex::new(Some(stop_tx)),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Device(
                "playback thread did not start in time".into(),
            )),
        }
    }

    pub fn stop(&self) {
        if let Ok(mut guard) = self.stop_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// List available input devices (name strings).
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let devices = match host.input_devices() {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };
    devices.filter_map(|d| d.name().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_cycle_keeps_sender_identity() {
        let mut slot = SenderSlot::new();
        let id_before = slot.id();
        assert_eq!(slot.track(), Track::Live);

        slot.set_track(Track::Silence);
        assert_eq!(slot.id(), id_before);
        assert_eq!(slot.track(), Track::Silence);

        slot.set_track(Track::Live);
        assert_eq!(slot.id(), id_before);
        assert_eq!(slot.track(), Track::Live);
    }

    #[test]
    fn silence_track_zeroes_frames_without_resizing() {
        let mut frame = vec![1u8, 2, 3, 4];
        apply_track(Track::Silence, &mut frame);
        assert_eq!(frame, vec![0, 0, 0, 0]);

        let mut live = vec![1u8, 2, 3, 4];
        apply_track(Track::Live, &mut live);
        assert_eq!(live, vec![1, 2, 3, 4]);
    }

    #[test]
    fn resampler_halves_rate() {
        let mut state = ResamplerState::default();
        let input: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0).sin()).collect();
        let out = resample_linear(&input, 48000, 24000, &mut state);
        // 2:1 downsample lands within a sample of half the input length.
        assert!((out.len() as i64 - 240).abs() <= 1, "got {}", out.len());
    }

    #[test]
    fn resampler_is_deterministic() {
        let input: Vec<f32> = (0..512).map(|i| ((i * 37) % 100) as f32 / 100.0).collect();
        let mut a = ResamplerState::default();
        let mut b = ResamplerState::default();
        assert_eq!(
            resample_linear(&input, 48000, 24000, &mut a),
            resample_linear(&input, 48000, 24000, &mut b)
        );
    }

    #[test]
    fn identical_rates_pass_through() {
        let mut state = ResamplerState::default();
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 24000, 24000, &mut state), input);
    }

    #[test]
    fn playback_queue_flush_drops_everything() {
        let queue = PlaybackQueue::new();
        queue.enqueue_pcm16(&[0, 1, 0, 2, 0, 3]);
        assert_eq!(queue.len(), 3);
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn playback_fill_pads_with_silence() {
        let queue = PlaybackQueue::new();
        queue.enqueue_pcm16(&[0x00, 0x40]); // one sample, 0.5
        let mut out = [1.0f32; 4];
        queue.fill(&mut out, 1);
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert_eq!(&out[1..], &[0.0, 0.0, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn microphone_acquire_is_idempotent_when_hardware_exists() {
        // Guarded: CI machines may not expose an input device.
        let (tx, _rx) = mpsc::channel(16);
        if let Ok(mic) = Microphone::acquire(None, tx, DEFAULT_SAMPLE_RATE) {
            let (tx2, _rx2) = mpsc::channel(16);
            let again = Microphone::acquire(None, tx2, DEFAULT_SAMPLE_RATE)
                .expect("second acquire while held");
            assert_eq!(mic.sender().0, again.sender().0);

            mic.mute();
            assert!(mic.is_muted());
            assert_eq!(mic.sender().1, Track::Silence);
            mic.unmute();
            assert_eq!(mic.sender().1, Track::Live);

            mic.release();
            mic.release(); // idempotent
        }
    }
}
