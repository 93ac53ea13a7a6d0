//! Reader service: owns the reading session and drives it.
//!
//! A single task selects over consumer commands, backend results and
//! discovered voice lists. The sequencer decides, this task executes:
//! speech runs in spawned tasks whose results come back as events, and
//! the reader and the narration track are never audible together.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReaderConfig;
use crate::error::SpeechError;
use crate::preferences::Preferences;
use crate::segmenter::segment;
use crate::sequencer::{Directive, Sequencer};
use crate::speech::{BackendKind, SpeechBackend, Utterance};
use crate::story::StoryLibrary;
use crate::track::TrackPlayback;
use crate::voice::discovery::DiscoveredVoice;
use crate::voice::{VoiceDescriptor, VoiceRegistry};

/// Snapshot published to every consumer after each change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReaderStatus {
    pub story_id: Option<String>,
    pub current_index: Option<usize>,
    pub current_sentence: Option<String>,
    pub sentence_count: usize,
    pub is_reading: bool,
    pub track_loaded: bool,
    pub track_playing: bool,
    pub voice_id: String,
    pub voices: Vec<VoiceDescriptor>,
}

impl ReaderStatus {
    /// Whether any narration is coming out of the speakers.
    pub fn is_audible(&self) -> bool {
        self.is_reading || self.track_playing
    }
}

type Reply = oneshot::Sender<Result<(), String>>;

pub enum ReaderCommand {
    Start { reply: Reply },
    Stop,
    Toggle,
    SetVoice { id: String, reply: Reply },
    SelectStory { id: String, reply: Reply },
    /// Replace the text being read (e.g. a longer retelling).
    SetContent { text: String, reply: Reply },
    PlayTrack { reply: Reply },
    PauseTrack,
    SaveTrack { path: PathBuf, reply: Reply },
}

enum Event {
    Settled {
        ticket: u64,
        outcome: Result<(), SpeechError>,
    },
    TrackEnded {
        generation: u64,
        result: Result<(), SpeechError>,
    },
}

/// Cloneable front door to the service.
#[derive(Clone)]
pub struct ReaderHandle {
    commands: mpsc::Sender<ReaderCommand>,
    status: watch::Receiver<ReaderStatus>,
}

impl ReaderHandle {
    pub fn status(&self) -> ReaderStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderStatus> {
        self.status.clone()
    }

    /// Fails when there is nothing to read.
    pub async fn start(&self) -> Result<(), String> {
        self.request(|reply| ReaderCommand::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<(), String> {
        self.send(ReaderCommand::Stop).await
    }

    pub async fn toggle(&self) -> Result<(), String> {
        self.send(ReaderCommand::Toggle).await
    }

    pub async fn set_content(&self, text: String) -> Result<(), String> {
        self.request(|reply| ReaderCommand::SetContent { text, reply }).await
    }

    pub async fn pause_track(&self) -> Result<(), String> {
        self.send(ReaderCommand::PauseTrack).await
    }

    pub async fn set_voice(&self, id: &str) -> Result<(), String> {
        let id = id.to_string();
        self.request(|reply| ReaderCommand::SetVoice { id, reply }).await
    }

    pub async fn select_story(&self, id: &str) -> Result<(), String> {
        let id = id.to_string();
        self.request(|reply| ReaderCommand::SelectStory { id, reply }).await
    }

    pub async fn play_track(&self) -> Result<(), String> {
        self.request(|reply| ReaderCommand::PlayTrack { reply }).await
    }

    pub async fn save_track(&self, path: impl Into<PathBuf>) -> Result<(), String> {
        let path = path.into();
        self.request(|reply| ReaderCommand::SaveTrack { path, reply }).await
    }

    async fn send(&self, command: ReaderCommand) -> Result<(), String> {
        self.commands
            .send(command)
            .await
            .map_err(|_| "reader service is not running".to_string())
    }

    async fn request(&self, build: impl FnOnce(Reply) -> ReaderCommand) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|_| "reader service dropped the request".to_string())?
    }
}

/// Collaborators the service drives.
pub struct ReaderParts {
    pub registry: VoiceRegistry,
    pub library: StoryLibrary,
    pub preferences: Preferences,
    pub remote: Arc<dyn SpeechBackend>,
    pub device: Arc<dyn SpeechBackend>,
    pub track: Arc<dyn TrackPlayback>,
}

struct InFlight {
    ticket: u64,
    backend: Arc<dyn SpeechBackend>,
    task: JoinHandle<()>,
}

struct TrackTask {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct ReaderService {
    sequencer: Sequencer,
    registry: VoiceRegistry,
    library: StoryLibrary,
    preferences: Preferences,
    remote: Arc<dyn SpeechBackend>,
    device: Arc<dyn SpeechBackend>,
    track: Arc<dyn TrackPlayback>,

    voice_id: String,
    story_id: Option<String>,
    in_flight: Option<InFlight>,
    track_task: Option<TrackTask>,
    track_generation: u64,

    commands: mpsc::Receiver<ReaderCommand>,
    discovered: mpsc::Receiver<Vec<DiscoveredVoice>>,
    events: mpsc::UnboundedReceiver<Event>,
    events_tx: mpsc::UnboundedSender<Event>,
    status: watch::Sender<ReaderStatus>,
}

impl ReaderService {
    pub fn new(
        config: &ReaderConfig,
        parts: ReaderParts,
        discovered: mpsc::Receiver<Vec<DiscoveredVoice>>,
    ) -> (Self, ReaderHandle) {
        let voice_id = parts
            .preferences
            .load_voice()
            .unwrap_or_else(|| config.default_voice.clone());
        info!("Initial voice: {voice_id}");

        let (commands_tx, commands) = mpsc::channel(32);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ReaderStatus::default());

        let service = Self {
            sequencer: Sequencer::new(config.max_remote_chars),
            registry: parts.registry,
            library: parts.library,
            preferences: parts.preferences,
            remote: parts.remote,
            device: parts.device,
            track: parts.track,
            voice_id,
            story_id: None,
            in_flight: None,
            track_task: None,
            track_generation: 0,
            commands,
            discovered,
            events,
            events_tx,
            status,
        };
        service.publish();

        let handle = ReaderHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (service, handle)
    }

    /// Serve until every handle is dropped.
    pub async fn run(mut self) {
        info!("Reader service ready");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.on_event(event),
                Some(voices) = self.discovered.recv() => self.on_voices(voices),
            }
        }

        info!("Reader service shutting down");
        let directives = self.sequencer.stop();
        self.execute(directives);
        self.abort_track();
        self.track.unload();
    }

    fn on_command(&mut self, command: ReaderCommand) {
        match command {
            ReaderCommand::Start { reply } => {
                let _ = reply.send(self.start_reading());
            }
            ReaderCommand::Stop => {
                let directives = self.sequencer.stop();
                self.execute(directives);
            }
            ReaderCommand::Toggle => {
                if self.sequencer.is_active() {
                    let directives = self.sequencer.pause();
                    self.execute(directives);
                } else if let Err(e) = self.start_reading() {
                    warn!("Cannot start reading: {e}");
                }
            }
            ReaderCommand::SetVoice { id, reply } => {
                let _ = reply.send(self.set_voice(id));
            }
            ReaderCommand::SelectStory { id, reply } => {
                let _ = reply.send(self.select_story(&id));
            }
            ReaderCommand::SetContent { text, reply } => {
                let _ = reply.send(self.set_content(&text));
            }
            ReaderCommand::PlayTrack { reply } => {
                let _ = reply.send(self.play_track());
            }
            ReaderCommand::PauseTrack => {
                if self.track.pause() {
                    info!("Narration track paused");
                }
                self.publish();
            }
            ReaderCommand::SaveTrack { path, reply } => {
                let _ = reply.send(self.track.save(&path));
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Settled { ticket, outcome } => {
                if self.in_flight.as_ref().is_some_and(|f| f.ticket == ticket) {
                    self.in_flight = None;
                }
                let directives = self.sequencer.settle(ticket, outcome);
                self.execute(directives);
            }
            Event::TrackEnded { generation, result } => {
                if self.track_task.as_ref().is_none_or(|t| t.generation != generation) {
                    debug!("Ignoring end of replaced track playback {generation}");
                    return;
                }
                self.track_task = None;
                match result {
                    Ok(()) => info!("Narration track finished"),
                    Err(e) if e.is_benign() => debug!("Narration track stopped: {e}"),
                    Err(e) => warn!("Narration track failed: {e}"),
                }
                self.publish();
            }
        }
    }

    fn on_voices(&mut self, voices: Vec<DiscoveredVoice>) {
        if self.registry.refresh(voices) {
            info!("{} voice(s) available", self.registry.voices().len());
            self.publish();
        }
    }

    /// Already reading counts as success.
    fn start_reading(&mut self) -> Result<(), String> {
        if self.sequencer.sentences().is_empty() {
            return Err("Nothing to read; select a story first".into());
        }
        let voice = self
            .registry
            .resolve(&self.voice_id)
            .cloned()
            .ok_or_else(|| "No voice available".to_string())?;
        let fallback = self.registry.device_fallback();
        let directives = self.sequencer.start(&voice, fallback);
        self.execute(directives);
        Ok(())
    }

    fn set_voice(&mut self, id: String) -> Result<(), String> {
        if self.registry.find(&id).is_none() {
            return Err(format!("Unknown voice: {id}"));
        }
        let directives = self.sequencer.stop();
        self.execute(directives);

        info!("Voice: {} → {id}", self.voice_id);
        self.preferences.save_voice(&id);
        self.voice_id = id;
        self.publish();
        Ok(())
    }

    fn select_story(&mut self, id: &str) -> Result<(), String> {
        let story = self
            .library
            .find(id)
            .cloned()
            .ok_or_else(|| format!("Unknown story: {id}"))?;

        self.abort_track();
        self.track.unload();
        if let Some(audio) = &story.audio {
            if let Err(e) = self.track.load(audio) {
                warn!("No narration track for {id}: {e}");
            }
        }

        let directives = self.sequencer.load(segment(&story.content));
        info!("Selected story {id} ({} sentences)", self.sequencer.sentences().len());
        self.story_id = Some(story.id);
        self.execute(directives);
        Ok(())
    }

    fn set_content(&mut self, text: &str) -> Result<(), String> {
        let sentences = segment(text);
        if sentences.is_empty() {
            return Err("Content has no sentences".into());
        }
        info!("Content replaced ({} sentences)", sentences.len());
        let directives = self.sequencer.load(sentences);
        self.execute(directives);
        Ok(())
    }

    fn play_track(&mut self) -> Result<(), String> {
        if !self.track.is_loaded() {
            return Err("No narration track loaded".into());
        }
        let directives = self.sequencer.stop();
        self.execute(directives);

        if self.track.is_paused() {
            self.track.resume();
            info!("Narration track resumed");
        } else if self.track_task.is_none() {
            self.track_generation += 1;
            let generation = self.track_generation;
            let track = self.track.clone();
            let events = self.events_tx.clone();
            let task = tokio::spawn(async move {
                let result = track.play_to_end().await;
                let _ = events.send(Event::TrackEnded { generation, result });
            });
            self.track_task = Some(TrackTask { generation, task });
            info!("Narration track playing");
        }
        self.publish();
        Ok(())
    }

    fn abort_track(&mut self) {
        if let Some(track_task) = self.track_task.take() {
            track_task.task.abort();
        }
    }

    fn execute(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::StopCompeting => {
                    if self.track.pause() {
                        info!("Narration track paused for reading");
                    }
                }
                Directive::Speak {
                    ticket,
                    index,
                    backend,
                    utterance,
                } => self.speak(ticket, index, backend, utterance),
                Directive::Cancel => self.cancel_in_flight(),
                Directive::IndexChanged(Some(index)) => debug!("Sentence {index}"),
                Directive::IndexChanged(None) => debug!("No current sentence"),
                Directive::Finished => info!("Finished reading"),
            }
        }
        self.publish();
    }

    fn speak(&mut self, ticket: u64, index: usize, kind: BackendKind, utterance: Utterance) {
        let backend = match kind {
            BackendKind::RemoteOnline => self.remote.clone(),
            BackendKind::OnDevice => self.device.clone(),
        };
        debug!("Sentence {index} via {}", backend.kind());

        let events = self.events_tx.clone();
        let speaker = backend.clone();
        let task = tokio::spawn(async move {
            let outcome = speaker.speak(&utterance).await;
            let _ = events.send(Event::Settled { ticket, outcome });
        });
        self.in_flight = Some(InFlight {
            ticket,
            backend,
            task,
        });
    }

    fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            in_flight.backend.cancel();
            debug!("Cancelled ticket {}", in_flight.ticket);
        }
    }

    fn publish(&self) {
        let current_index = self.sequencer.current_index();
        self.status.send_replace(ReaderStatus {
            story_id: self.story_id.clone(),
            current_index,
            current_sentence: current_index.and_then(|i| self.sequencer.sentences().get(i).cloned()),
            sentence_count: self.sequencer.sentences().len(),
            is_reading: self.sequencer.is_active(),
            track_loaded: self.track.is_loaded(),
            track_playing: self.track_task.is_some() && !self.track.is_paused(),
            voice_id: self.voice_id.clone(),
            voices: self.registry.voices().to_vec(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::story::{Category, Story};

    /// Backend that takes 100ms per utterance and replays scripted results.
    pub(crate) struct FakeBackend {
        kind: BackendKind,
        pub(crate) spoken: Mutex<Vec<Utterance>>,
        script: Mutex<VecDeque<Result<(), SpeechError>>>,
        pub(crate) cancels: AtomicUsize,
    }

    impl FakeBackend {
        pub(crate) fn new(kind: BackendKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                spoken: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::new()),
                cancels: AtomicUsize::new(0),
            })
        }

        fn fail_next(&self, error: SpeechError) {
            self.script.lock().unwrap().push_back(Err(error));
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.spoken.lock().unwrap().iter().map(|u| u.text.clone()).collect()
        }
    }

    #[async_trait]
    impl SpeechBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
            self.spoken.lock().unwrap().push(utterance.clone());
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeTrack {
        pub(crate) loaded: AtomicBool,
        pub(crate) playing: AtomicBool,
        pub(crate) paused: AtomicBool,
        done: Notify,
    }

    #[async_trait]
    impl TrackPlayback for FakeTrack {
        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst) && !self.is_paused()
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        fn pause(&self) -> bool {
            if !self.is_playing() {
                return false;
            }
            self.paused.store(true, Ordering::SeqCst);
            true
        }

        fn resume(&self) -> bool {
            self.paused.swap(false, Ordering::SeqCst)
        }

        fn load(&self, _path: &Path) -> Result<(), String> {
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn unload(&self) {
            self.loaded.store(false, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
        }

        fn save(&self, path: &Path) -> Result<(), String> {
            if !self.is_loaded() {
                return Err("No narration track loaded".into());
            }
            std::fs::write(path, b"RIFF").map_err(|e| e.to_string())
        }

        async fn play_to_end(&self) -> Result<(), SpeechError> {
            self.playing.store(true, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            self.done.notified().await;
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub(crate) handle: ReaderHandle,
        pub(crate) remote: Arc<FakeBackend>,
        pub(crate) device: Arc<FakeBackend>,
        pub(crate) track: Arc<FakeTrack>,
        pub(crate) voices_tx: mpsc::Sender<Vec<DiscoveredVoice>>,
        pub(crate) dir: tempfile::TempDir,
    }

    fn library() -> StoryLibrary {
        StoryLibrary::new(vec![
            Story {
                id: "tam-cam".into(),
                title: "Tấm Cám".into(),
                content: "Ngày xưa có Tấm. Tấm hiền lành! Cám thì lười?".into(),
                moral: None,
                images: Vec::new(),
                category: Category::Vietnam,
                audio: Some("tam-cam.wav".into()),
            },
            Story {
                id: "cay-khe".into(),
                title: "Cây Khế".into(),
                content: "Chim ăn khế. Trả một cục vàng.".into(),
                moral: None,
                images: Vec::new(),
                category: Category::Vietnam,
                audio: None,
            },
        ])
    }

    pub(crate) fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let remote = FakeBackend::new(BackendKind::RemoteOnline);
        let device = FakeBackend::new(BackendKind::OnDevice);
        let track = Arc::new(FakeTrack::default());
        let (voices_tx, voices_rx) = mpsc::channel(4);

        let parts = ReaderParts {
            registry: VoiceRegistry::default(),
            library: library(),
            preferences: Preferences::at(dir.path().join("preferences.json")),
            remote: remote.clone(),
            device: device.clone(),
            track: track.clone(),
        };
        let (service, handle) = ReaderService::new(&ReaderConfig::default(), parts, voices_rx);
        tokio::spawn(service.run());

        Harness {
            handle,
            remote,
            device,
            track,
            voices_tx,
            dir,
        }
    }

    async fn wait_until(handle: &ReaderHandle, f: impl FnMut(&ReaderStatus) -> bool) -> ReaderStatus {
        let mut rx = handle.subscribe();
        let status = rx.wait_for(f).await.unwrap().clone();
        status
    }

    #[tokio::test(start_paused = true)]
    async fn reads_every_sentence_then_goes_idle() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        assert_eq!(h.handle.status().sentence_count, 3);

        h.handle.start().await.unwrap();
        let first = wait_until(&h.handle, |s| s.is_reading).await;
        assert_eq!(first.current_index, Some(0));
        assert_eq!(first.current_sentence.as_deref(), Some("Ngày xưa có Tấm."));

        let done = wait_until(&h.handle, |s| !s.is_reading).await;
        assert_eq!(done.current_index, None);
        assert_eq!(
            h.remote.texts(),
            vec!["Ngày xưa có Tấm.", "Tấm hiền lành!", "Cám thì lười?"]
        );
        assert!(h.device.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_is_retried_on_device() {
        let h = harness();
        h.remote.fail_next(SpeechError::Network("offline".into()));
        h.handle.select_story("cay-khe").await.unwrap();

        h.handle.start().await.unwrap();
        wait_until(&h.handle, |s| s.is_reading).await;
        wait_until(&h.handle, |s| !s.is_reading).await;

        assert_eq!(h.device.texts(), vec!["Chim ăn khế."]);
        assert_eq!(h.device.spoken.lock().unwrap()[0].rate, 1.0);
        assert_eq!(h.remote.texts(), vec!["Chim ăn khế.", "Trả một cục vàng."]);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_to_read_pauses_the_track() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.play_track().await.unwrap();
        wait_until(&h.handle, |s| s.track_playing).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.track.is_playing());

        h.handle.start().await.unwrap();
        let status = wait_until(&h.handle, |s| s.is_reading).await;

        assert!(h.track.is_paused());
        assert!(!status.track_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn playing_the_track_stops_reading() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.start().await.unwrap();
        wait_until(&h.handle, |s| s.current_index == Some(0)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.handle.play_track().await.unwrap();
        let status = h.handle.status();

        assert!(!status.is_reading);
        assert_eq!(status.current_index, None);
        assert!(status.track_playing);
        assert_eq!(h.remote.cancels.load(Ordering::SeqCst), 1);

        // The cancelled sentence never advances the session.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.remote.texts(), vec!["Ngày xưa có Tấm."]);
    }

    #[tokio::test(start_paused = true)]
    async fn track_needs_a_loaded_clip() {
        let h = harness();
        h.handle.select_story("cay-khe").await.unwrap();
        assert!(h.handle.play_track().await.is_err());
        assert!(!h.handle.status().track_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn changing_voice_stops_and_is_remembered() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.start().await.unwrap();
        wait_until(&h.handle, |s| s.is_reading).await;

        h.handle.set_voice("google-fast").await.unwrap();

        let status = h.handle.status();
        assert!(!status.is_reading);
        assert_eq!(status.voice_id, "google-fast");
        assert_eq!(
            Preferences::at(h.dir.path().join("preferences.json")).load_voice().as_deref(),
            Some("google-fast")
        );
        assert!(h.handle.set_voice("nobody").await.is_err());
        assert_eq!(h.handle.status().voice_id, "google-fast");
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_pauses_and_restarts_from_the_top() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.toggle().await.unwrap();
        wait_until(&h.handle, |s| s.current_index == Some(1)).await;

        h.handle.toggle().await.unwrap();
        wait_until(&h.handle, |s| !s.is_reading).await;
        h.handle.toggle().await.unwrap();
        let restarted = wait_until(&h.handle, |s| s.is_reading).await;

        assert_eq!(restarted.current_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn new_content_replaces_the_session() {
        let h = harness();
        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.start().await.unwrap();
        wait_until(&h.handle, |s| s.is_reading).await;

        h.handle.set_content("Một. Hai. Ba. Bốn.".into()).await.unwrap();
        let status = wait_until(&h.handle, |s| s.sentence_count == 4).await;

        assert!(!status.is_reading);
        assert_eq!(status.story_id.as_deref(), Some("tam-cam"));
        assert!(h.handle.select_story("missing").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn discovered_voices_are_published() {
        let h = harness();
        let voice = VoiceDescriptor {
            id: "roa/vi".into(),
            display_name: "Máy: Vietnamese_Northern".into(),
            backend: BackendKind::OnDevice,
            language_tag: "vi".into(),
            speed: 1.0,
            device_voice_ref: Some("roa/vi".into()),
        };
        h.voices_tx
            .send(vec![DiscoveredVoice {
                platform_name: "Vietnamese_Northern".into(),
                descriptor: voice.clone(),
            }])
            .await
            .unwrap();

        let status = wait_until(&h.handle, |s| s.voices.len() == 4).await;
        assert_eq!(status.voices[3], voice);

        h.handle.set_voice("roa/vi").await.unwrap();
        h.handle.select_story("cay-khe").await.unwrap();
        h.handle.start().await.unwrap();
        wait_until(&h.handle, |s| s.is_reading).await;
        wait_until(&h.handle, |s| !s.is_reading).await;
        assert_eq!(h.device.texts().len(), 2);
        assert!(h.remote.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_a_story_fails() {
        let h = harness();
        let err = h.handle.start().await.unwrap_err();
        assert!(err.contains("select a story"), "{err}");
        assert!(!h.handle.status().is_reading);

        h.handle.toggle().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.remote.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_content_is_rejected() {
        let h = harness();
        h.handle.select_story("cay-khe").await.unwrap();
        assert!(h.handle.set_content("   ".into()).await.is_err());
        assert_eq!(h.handle.status().sentence_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn track_can_be_saved_once_loaded() {
        let h = harness();
        let path = h.dir.path().join("narration.wav");
        assert!(h.handle.save_track(&path).await.is_err());

        h.handle.select_story("tam-cam").await.unwrap();
        h.handle.save_track(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_a_replaced_track_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (_voices_tx, voices_rx) = mpsc::channel(4);
        let parts = ReaderParts {
            registry: VoiceRegistry::default(),
            library: library(),
            preferences: Preferences::at(dir.path().join("preferences.json")),
            remote: FakeBackend::new(BackendKind::RemoteOnline),
            device: FakeBackend::new(BackendKind::OnDevice),
            track: Arc::new(FakeTrack::default()),
        };
        let (mut service, handle) = ReaderService::new(&ReaderConfig::default(), parts, voices_rx);

        service.select_story("tam-cam").unwrap();
        service.play_track().unwrap();
        let replaced = service.track_generation;
        // Reselecting aborts the first playback; its end event may already be queued.
        service.select_story("tam-cam").unwrap();
        service.play_track().unwrap();
        assert!(handle.status().track_playing);

        service.on_event(Event::TrackEnded {
            generation: replaced,
            result: Err(SpeechError::Cancelled),
        });
        assert!(handle.status().track_playing);

        let current = service.track_generation;
        service.on_event(Event::TrackEnded {
            generation: current,
            result: Ok(()),
        });
        assert!(!handle.status().track_playing);
    }
}
