//! Sentence playback state machine.
//!
//! IDLE → PLAYING(i) → AWAITING(i) → PLAYING(i+1) … → IDLE
//!
//! The sequencer performs no I/O. Every operation returns the directives
//! the driver must carry out, and backend results come back through
//! [`Sequencer::settle`] tagged with the ticket of the request they answer.
//! Any result whose ticket is not the current one is stale and dropped,
//! which is what keeps cancelled utterances from advancing or retrying.

use tracing::{debug, info, warn};

use crate::error::SpeechError;
use crate::speech::{BackendKind, Utterance};
use crate::voice::VoiceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Playing(usize),
    AwaitingBackend { index: usize, backend: BackendKind },
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Playing(i) => write!(f, "PLAYING({i})"),
            Self::AwaitingBackend { index, backend } => write!(f, "AWAITING({index}, {backend})"),
        }
    }
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Silence the other narration source before this one speaks.
    StopCompeting,
    Speak {
        ticket: u64,
        index: usize,
        backend: BackendKind,
        utterance: Utterance,
    },
    /// Abort the in-flight utterance.
    Cancel,
    /// The highlighted sentence changed; `None` clears the highlight.
    IndexChanged(Option<usize>),
    /// The last sentence finished.
    Finished,
}

/// Voice captured at `start`; it stays fixed for the whole session.
#[derive(Debug, Clone)]
struct SessionVoice {
    descriptor: VoiceDescriptor,
    device_fallback: Option<String>,
}

pub struct Sequencer {
    sentences: Vec<String>,
    state: SequencerState,
    voice: Option<SessionVoice>,
    ticket: u64,
    max_remote_chars: usize,
}

impl Sequencer {
    pub fn new(max_remote_chars: usize) -> Self {
        Self {
            sentences: Vec::new(),
            state: SequencerState::Idle,
            voice: None,
            ticket: 0,
            max_remote_chars,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn is_active(&self) -> bool {
        self.state != SequencerState::Idle
    }

    /// Sentence being spoken; `None` when idle.
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            SequencerState::Idle => None,
            SequencerState::Playing(index) | SequencerState::AwaitingBackend { index, .. } => {
                Some(index)
            }
        }
    }

    pub fn active_voice_id(&self) -> Option<&str> {
        self.voice.as_ref().map(|v| v.descriptor.id.as_str())
    }

    /// Install a new sentence list, ending any running session.
    pub fn load(&mut self, sentences: Vec<String>) -> Vec<Directive> {
        let directives = self.stop();
        debug!("Loaded {} sentence(s)", sentences.len());
        self.sentences = sentences;
        directives
    }

    /// Begin reading from the first sentence with `voice`.
    /// `device_fallback` is the platform voice used when a remote voice
    /// has to be replaced by on-device synthesis.
    pub fn start(&mut self, voice: &VoiceDescriptor, device_fallback: Option<String>) -> Vec<Directive> {
        if self.is_active() {
            debug!("Start ignored: already {}", self.state);
            return Vec::new();
        }
        if self.sentences.is_empty() {
            debug!("Start ignored: nothing to read");
            return Vec::new();
        }

        info!("Reading {} sentence(s) with voice {}", self.sentences.len(), voice.id);
        self.voice = Some(SessionVoice {
            descriptor: voice.clone(),
            device_fallback,
        });

        let mut directives = vec![Directive::StopCompeting];
        self.begin(0, &mut directives);
        directives
    }

    /// End the session. No-op when idle.
    pub fn stop(&mut self) -> Vec<Directive> {
        if !self.is_active() {
            return Vec::new();
        }
        info!("State: {} → IDLE (stopped)", self.state);
        self.reset();
        vec![Directive::Cancel, Directive::IndexChanged(None)]
    }

    /// Pausing ends the session just like stopping; the next start reads
    /// from the beginning.
    pub fn pause(&mut self) -> Vec<Directive> {
        self.stop()
    }

    /// Feed back the outcome of the request tagged `ticket`.
    pub fn settle(&mut self, ticket: u64, outcome: Result<(), SpeechError>) -> Vec<Directive> {
        let SequencerState::AwaitingBackend { index, backend } = self.state else {
            debug!("Dropping result for ticket {ticket} while {}", self.state);
            return Vec::new();
        };
        if ticket != self.ticket {
            debug!("Dropping stale result for ticket {ticket} (current {})", self.ticket);
            return Vec::new();
        }

        let mut directives = Vec::new();
        match outcome {
            Ok(()) => self.advance(index, &mut directives),
            Err(e) if e.is_benign() => {
                debug!("Sentence {index}: {e} (ignored)");
            }
            Err(e) => match backend {
                BackendKind::RemoteOnline => {
                    warn!("Remote speech failed for sentence {index}: {e}, retrying on-device");
                    self.dispatch(index, BackendKind::OnDevice, &mut directives);
                }
                BackendKind::OnDevice => {
                    warn!("On-device speech failed for sentence {index}: {e}, skipping");
                    self.advance(index, &mut directives);
                }
            },
        }
        directives
    }

    /// Remote only for remote voices and sentences the URL can carry.
    pub fn route(&self, voice: &VoiceDescriptor, text: &str) -> BackendKind {
        if voice.backend == BackendKind::RemoteOnline && text.chars().count() <= self.max_remote_chars {
            BackendKind::RemoteOnline
        } else {
            BackendKind::OnDevice
        }
    }

    fn begin(&mut self, index: usize, directives: &mut Vec<Directive>) {
        self.state = SequencerState::Playing(index);
        directives.push(Directive::IndexChanged(Some(index)));

        let backend = match &self.voice {
            Some(voice) => self.route(&voice.descriptor, &self.sentences[index]),
            None => BackendKind::OnDevice,
        };
        self.dispatch(index, backend, directives);
    }

    fn dispatch(&mut self, index: usize, backend: BackendKind, directives: &mut Vec<Directive>) {
        self.ticket += 1;
        self.state = SequencerState::AwaitingBackend { index, backend };
        debug!("Sentence {index} → {backend} (ticket {})", self.ticket);
        directives.push(Directive::Speak {
            ticket: self.ticket,
            index,
            backend,
            utterance: self.utterance(index, backend),
        });
    }

    fn advance(&mut self, index: usize, directives: &mut Vec<Directive>) {
        if index + 1 < self.sentences.len() {
            self.begin(index + 1, directives);
        } else {
            info!("State: {} → IDLE (end of story)", self.state);
            self.reset();
            directives.push(Directive::IndexChanged(None));
            directives.push(Directive::Finished);
        }
    }

    fn reset(&mut self) {
        self.state = SequencerState::Idle;
        self.voice = None;
        // Anything still in flight now carries a stale ticket.
        self.ticket += 1;
    }

    fn utterance(&self, index: usize, backend: BackendKind) -> Utterance {
        let text = self.sentences[index].clone();
        let Some(voice) = &self.voice else {
            return Utterance {
                text,
                language_tag: String::new(),
                rate: 1.0,
                voice_ref: None,
            };
        };
        let descriptor = &voice.descriptor;

        match (backend, descriptor.backend) {
            (BackendKind::RemoteOnline, _) => Utterance {
                text,
                language_tag: descriptor.language_tag.clone(),
                rate: descriptor.speed,
                voice_ref: None,
            },
            (BackendKind::OnDevice, BackendKind::OnDevice) => Utterance {
                text,
                language_tag: descriptor.language_tag.clone(),
                rate: descriptor.speed,
                voice_ref: descriptor.device_voice_ref.clone(),
            },
            // A remote voice spoken on-device: generic settings.
            (BackendKind::OnDevice, BackendKind::RemoteOnline) => Utterance {
                text,
                language_tag: descriptor.language_tag.clone(),
                rate: 1.0,
                voice_ref: voice.device_fallback.clone(),
            },
        }
    }
}
