//! Background music transport: single tracks and playlists on the music
//! voice, with looping, seeking, volume and position reporting.
//!
//! All transitions happen under one lock in the control context. Events are
//! collected while the lock is held and emitted after it is released, so a
//! sink may call back into the engine.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::decode::{duration_to_frames, frames_to_duration, MixTrack};
use super::loader::TrackLoader;
use super::poller::PositionPoller;
use super::source::MusicSource;
use super::{LoopMode, MusicSnapshot, TransportState};
use crate::error::ResolutionError;
use crate::event::{EngineEvent, EventEmitter};
use crate::graph::MusicVoice;

/// What happens when the current track ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Play the same track again from the start.
    Restart,
    /// Load the track at this playlist index.
    To(usize),
    /// Stop the transport.
    Finish,
}

/// Track-completion transition.
pub(crate) fn next_step(mode: LoopMode, index: usize, len: usize) -> Advance {
    match mode {
        LoopMode::Track => Advance::Restart,
        LoopMode::None if index + 1 < len => Advance::To(index + 1),
        LoopMode::None => Advance::Finish,
        LoopMode::Playlist if len <= 1 => Advance::Restart,
        LoopMode::Playlist => Advance::To((index + 1) % len),
    }
}

/// Folds a raw position into `[0, duration]`, wrapping on overshoot.
pub(crate) fn normalize_position(position: Duration, duration: Duration) -> Duration {
    if duration.is_zero() {
        return Duration::ZERO;
    }
    if position <= duration {
        return position;
    }
    Duration::from_secs_f64(position.as_secs_f64() % duration.as_secs_f64())
}

struct TransportInner {
    playlist: Vec<MusicSource>,
    index: usize,
    loop_mode: LoopMode,
    state: TransportState,
    track: Option<MixTrack>,
    /// Bumped by every user command that invalidates in-flight loads.
    generation: u64,
    reported_playing: Option<bool>,
    mix_rate: u32,
    /// Voice wraps already reported as loop restarts.
    seen_wraps: u64,
}

impl TransportInner {
    /// The current track repeats when it ends.
    fn repeats_track(&self) -> bool {
        next_step(self.loop_mode, self.index, self.playlist.len()) == Advance::Restart
    }
}

type Outbox = Vec<EngineEvent>;

pub(crate) struct MusicTransport {
    voice: Arc<MusicVoice>,
    loader: TrackLoader,
    events: EventEmitter,
    poller: PositionPoller,
    inner: Mutex<TransportInner>,
    this: Weak<MusicTransport>,
}

impl MusicTransport {
    pub fn new(
        voice: Arc<MusicVoice>,
        loader: TrackLoader,
        events: EventEmitter,
        poll_interval: Duration,
        runtime: Handle,
        mix_rate: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            voice,
            loader,
            events,
            poller: PositionPoller::new(poll_interval, runtime),
            inner: Mutex::new(TransportInner {
                playlist: Vec::new(),
                index: 0,
                loop_mode: LoopMode::None,
                state: TransportState::Stopped,
                track: None,
                generation: 0,
                reported_playing: None,
                mix_rate,
                seen_wraps: 0,
            }),
            this: this.clone(),
        })
    }

    /// Replaces whatever is playing with one track.
    pub async fn play_single(&self, source: MusicSource, looping: bool) {
        let mode = if looping {
            LoopMode::Track
        } else {
            LoopMode::None
        };
        self.play(vec![source], mode).await;
    }

    /// Replaces whatever is playing with a playlist, starting at index 0.
    pub async fn play_playlist(&self, sources: Vec<MusicSource>, loop_mode: LoopMode) {
        if sources.is_empty() {
            tracing::warn!("refusing to play an empty playlist");
            let mut out = Outbox::new();
            out.push(EngineEvent::error(ResolutionError::EmptyPlaylist));
            {
                let mut inner = self.inner.lock();
                self.reset_locked(&mut inner, &mut out);
            }
            self.flush(out);
            return;
        }
        self.play(sources, loop_mode).await;
    }

    async fn play(&self, playlist: Vec<MusicSource>, loop_mode: LoopMode) {
        let generation = {
            let mut inner = self.inner.lock();
            self.halt_locked(&mut inner);
            tracing::info!(tracks = playlist.len(), ?loop_mode, "starting background music");
            inner.generation += 1;
            inner.playlist = playlist;
            inner.index = 0;
            inner.loop_mode = loop_mode;
            inner.state = TransportState::Loading;
            inner.generation
        };
        self.load_and_start(generation, 0).await;
    }

    async fn load_and_start(&self, generation: u64, index: usize) {
        let (source, mix_rate) = {
            let inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            match inner.playlist.get(index) {
                Some(source) => (source.clone(), inner.mix_rate),
                None => return,
            }
        };

        let result = self.loader.load(&source, mix_rate).await;

        let mut out = Outbox::new();
        let needs_resync = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                tracing::debug!(%source, "discarding superseded music load");
                return;
            }

            match result {
                Ok(track) => {
                    let duration = track.duration();
                    inner.index = index;
                    self.voice.set_looping(inner.repeats_track());
                    self.voice.schedule(Arc::clone(&track.samples), 0);
                    self.voice.set_playing(true);
                    inner.seen_wraps = 0;

                    let needs_resync = track.sample_rate != inner.mix_rate;
                    inner.track = Some(track);
                    inner.state = TransportState::Playing;
                    self.report_state(&mut inner, true, &mut out);
                    out.push(EngineEvent::MusicPosition {
                        position: Duration::ZERO,
                        duration,
                    });
                    self.start_poller();

                    tracing::info!(%source, index, ?duration, "music track started");
                    needs_resync
                }
                Err(err) => {
                    tracing::error!(%source, error = %err, "failed to load music");
                    out.push(EngineEvent::error(&err));
                    self.reset_locked(&mut inner, &mut out);
                    false
                }
            }
        };

        self.flush(out);
        if needs_resync {
            self.resync_track_rate().await;
        }
    }

    /// Poller tick: reports the position, a loop restart, or handles track
    /// completion.
    pub async fn tick(&self) {
        enum Step {
            Idle,
            Report(EngineEvent),
            Finished(u64),
        }

        let step = {
            let mut inner = self.inner.lock();
            let wraps = self.voice.wraps();
            let looped = wraps != inner.seen_wraps;
            inner.seen_wraps = wraps;
            match (&inner.state, &inner.track) {
                (TransportState::Playing, Some(_)) if self.voice.is_finished() => {
                    Step::Finished(inner.generation)
                }
                (TransportState::Playing, Some(track)) if looped => {
                    tracing::debug!(index = inner.index, "looping track");
                    Step::Report(EngineEvent::MusicPosition {
                        position: Duration::ZERO,
                        duration: track.duration(),
                    })
                }
                (TransportState::Playing, Some(track)) => {
                    Step::Report(self.position_event(track))
                }
                _ => Step::Idle,
            }
        };

        match step {
            Step::Idle => {}
            Step::Report(event) => self.events.emit(event),
            Step::Finished(generation) => self.on_track_finished(generation).await,
        }
    }

    async fn on_track_finished(&self, generation: u64) {
        let mut out = Outbox::new();
        let next = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != TransportState::Playing {
                return;
            }

            match next_step(inner.loop_mode, inner.index, inner.playlist.len()) {
                Advance::Restart => {
                    self.voice.seek(0);
                    self.voice.set_playing(true);
                    if let Some(track) = &inner.track {
                        out.push(EngineEvent::MusicPosition {
                            position: Duration::ZERO,
                            duration: track.duration(),
                        });
                    }
                    tracing::debug!(index = inner.index, "looping track");
                    None
                }
                Advance::To(next) => {
                    tracing::debug!(from = inner.index, to = next, "advancing playlist");
                    self.voice.clear();
                    inner.track = None;
                    inner.state = TransportState::Loading;
                    Some(next)
                }
                Advance::Finish => {
                    tracing::info!("background music finished");
                    self.reset_locked(&mut inner, &mut out);
                    None
                }
            }
        };

        self.flush(out);
        if let Some(next) = next {
            self.load_and_start(generation, next).await;
        }
    }

    /// Seeks within the current track, clamped to `[0, duration]`. Keeps
    /// the play/pause state and reports the new position.
    pub fn seek(&self, position: Duration) {
        let event = {
            let inner = self.inner.lock();
            let active = matches!(
                inner.state,
                TransportState::Playing | TransportState::Paused
            );
            match (&inner.track, active) {
                (Some(track), true) => {
                    let duration = track.duration();
                    let clamped = position.min(duration);
                    let frame =
                        duration_to_frames(clamped, track.sample_rate).min(track.frames());
                    self.voice.seek(frame);
                    tracing::debug!(?clamped, ?duration, "music seek");
                    EngineEvent::MusicPosition {
                        position: clamped,
                        duration,
                    }
                }
                _ => {
                    tracing::debug!("seek ignored, no track playing");
                    return;
                }
            }
        };
        self.events.emit(event);
    }

    pub fn pause(&self) {
        let mut out = Outbox::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != TransportState::Playing {
                return;
            }
            self.voice.set_playing(false);
            self.poller.stop();
            inner.state = TransportState::Paused;
            self.report_state(&mut inner, false, &mut out);
            tracing::info!("background music paused");
        }
        self.flush(out);
    }

    pub fn resume(&self) {
        let mut out = Outbox::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != TransportState::Paused {
                return;
            }
            self.voice.set_playing(true);
            inner.state = TransportState::Playing;
            self.report_state(&mut inner, true, &mut out);
            self.start_poller();
            tracing::info!("background music resumed");
        }
        self.flush(out);
    }

    /// Stops playback and clears the playlist. Idempotent.
    pub fn stop(&self) {
        let mut out = Outbox::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != TransportState::Stopped {
                tracing::info!("background music stopped");
            }
            self.reset_locked(&mut inner, &mut out);
        }
        self.flush(out);
    }

    /// Sets the music gain, clamped to [0, 1]. Applies with or without a
    /// track playing.
    pub fn set_volume(&self, volume: f32) {
        self.voice.set_gain(volume);
        tracing::debug!(volume = self.voice.gain(), "music volume set");
    }

    pub fn volume(&self) -> f32 {
        self.voice.gain()
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> MusicSnapshot {
        let inner = self.inner.lock();
        let (position, duration) = match &inner.track {
            Some(track) => {
                let duration = track.duration();
                let position =
                    frames_to_duration(self.voice.position_frames(), track.sample_rate);
                (normalize_position(position, duration), duration)
            }
            None => (Duration::ZERO, Duration::ZERO),
        };

        MusicSnapshot {
            state: inner.state,
            current_index: inner.index,
            playlist_len: inner.playlist.len(),
            loop_mode: inner.loop_mode,
            position,
            duration,
            volume: self.voice.gain(),
        }
    }

    /// Records a new mix rate. Returns `true` if the current track has to be
    /// re-converted with [`resync_track_rate`](Self::resync_track_rate).
    pub fn update_mix_rate(&self, rate: u32) -> bool {
        let mut inner = self.inner.lock();
        inner.mix_rate = rate;
        inner
            .track
            .as_ref()
            .is_some_and(|track| track.sample_rate != rate)
    }

    /// Re-converts the current track to the mix rate, keeping its position
    /// and play/pause state.
    pub async fn resync_track_rate(&self) {
        let (generation, source, mix_rate) = {
            let inner = self.inner.lock();
            match &inner.track {
                Some(track) if track.sample_rate != inner.mix_rate => (
                    inner.generation,
                    Arc::clone(&track.source),
                    inner.mix_rate,
                ),
                _ => return,
            }
        };

        let result = self.loader.reconvert(source, mix_rate).await;

        let mut out = Outbox::new();
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.mix_rate != mix_rate {
                return;
            }
            let Some(old_rate) = inner.track.as_ref().map(|t| t.sample_rate) else {
                return;
            };

            match result {
                Ok(track) => {
                    let position = frames_to_duration(self.voice.position_frames(), old_rate);
                    let frame = duration_to_frames(position, mix_rate).min(track.frames());
                    let playing = self.voice.is_playing();
                    self.voice.schedule(Arc::clone(&track.samples), frame);
                    self.voice.set_playing(playing);
                    inner.seen_wraps = 0;
                    inner.track = Some(track);
                    tracing::info!(old_rate, mix_rate, "music track re-converted");
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to re-convert music track");
                    out.push(EngineEvent::error(&err));
                    self.reset_locked(&mut inner, &mut out);
                }
            }
        }
        self.flush(out);
    }

    /// Silences the voice and drops the current track without touching
    /// the playlist or reporting anything.
    fn halt_locked(&self, inner: &mut TransportInner) {
        self.voice.clear();
        self.poller.stop();
        inner.track = None;
    }

    /// Full stop: halt, clear the playlist, invalidate loads, report
    /// `music_state(false)` if that is not already the last report.
    fn reset_locked(&self, inner: &mut TransportInner, out: &mut Outbox) {
        self.halt_locked(inner);
        inner.generation += 1;
        inner.playlist.clear();
        inner.index = 0;
        inner.state = TransportState::Stopped;
        self.report_state(inner, false, out);
    }

    fn report_state(&self, inner: &mut TransportInner, playing: bool, out: &mut Outbox) {
        if inner.reported_playing != Some(playing) {
            inner.reported_playing = Some(playing);
            out.push(EngineEvent::MusicState { playing });
        }
    }

    fn position_event(&self, track: &MixTrack) -> EngineEvent {
        let duration = track.duration();
        let position = frames_to_duration(self.voice.position_frames(), track.sample_rate);
        EngineEvent::MusicPosition {
            position: normalize_position(position, duration),
            duration,
        }
    }

    fn start_poller(&self) {
        let this = self.this.clone();
        self.poller.start(move || {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(transport) => {
                        transport.tick().await;
                        true
                    }
                    None => false,
                }
            }
        });
    }

    fn flush(&self, out: Outbox) {
        for event in out {
            self.events.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_step_no_loop() {
        assert_eq!(next_step(LoopMode::None, 0, 3), Advance::To(1));
        assert_eq!(next_step(LoopMode::None, 1, 3), Advance::To(2));
        assert_eq!(next_step(LoopMode::None, 2, 3), Advance::Finish);
        assert_eq!(next_step(LoopMode::None, 0, 1), Advance::Finish);
    }

    #[test]
    fn test_next_step_track_loop() {
        assert_eq!(next_step(LoopMode::Track, 0, 1), Advance::Restart);
        assert_eq!(next_step(LoopMode::Track, 1, 3), Advance::Restart);
    }

    #[test]
    fn test_next_step_playlist_loop() {
        assert_eq!(next_step(LoopMode::Playlist, 0, 2), Advance::To(1));
        assert_eq!(next_step(LoopMode::Playlist, 1, 2), Advance::To(0));
        assert_eq!(next_step(LoopMode::Playlist, 0, 1), Advance::Restart);
    }

    #[test]
    fn test_normalize_position() {
        let d = Duration::from_secs(10);
        assert_eq!(normalize_position(Duration::from_secs(3), d), Duration::from_secs(3));
        assert_eq!(normalize_position(d, d), d);
        let wrapped = normalize_position(Duration::from_secs(12), d);
        assert!((wrapped.as_secs_f64() - 2.0).abs() < 1e-9);
        assert_eq!(normalize_position(Duration::from_secs(5), Duration::ZERO), Duration::ZERO);
    }
}
