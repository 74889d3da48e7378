use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cleaner::{Cleaned, CleanupError};
use crate::config::ConfigStore;
use crate::history::{HistoryEntry, HistoryLog};
use crate::recorder::RecordError;
use crate::transcriber::{Transcription, TranscriptionError};

/// Pipeline state; exactly one value process-wide at any instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Between runs; the only state a run can start from
    Idle,
    /// Audio capture in progress, bounded by the hotkey hold
    Recording,
    /// Transcription/cleanup/append in progress
    Processing,
}

/// Commands accepted by the pipeline task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Hotkey pressed (or manual start)
    Press,
    /// Hotkey released (or manual stop); a manual stop is a normal release,
    /// not a cancellation
    Release,
    /// Stop the pipeline task
    Shutdown,
}

/// Recording control seam (the sox process in production)
#[cfg_attr(test, mockall::automock)]
pub trait RecorderControl: Send {
    /// Start capturing from the given device (empty = system default)
    fn start(&mut self, device_id: &str) -> Result<(), RecordError>;
    /// Finish capturing and return the completed clip
    fn stop(&mut self) -> Result<PathBuf, RecordError>;
}

/// Transcription seam (the whisper-cli process in production)
#[cfg_attr(test, mockall::automock)]
pub trait TranscribeStage: Send {
    /// Transcribe a clip with the given model
    fn transcribe(
        &self,
        clip: &Path,
        model_path: &Path,
        filter: bool,
    ) -> Result<Transcription, TranscriptionError>;
}

/// LLM cleanup seam (the Ollama server in production)
#[cfg_attr(test, mockall::automock)]
pub trait CleanupStage: Send {
    /// Whether the LLM runtime is up; checked before every cleanup pass
    fn is_running(&self) -> bool;
    /// Run the cleanup pass
    fn clean(
        &self,
        transcript: &str,
        prompt_template: &str,
        model: &str,
    ) -> Result<Cleaned, CleanupError>;
}

/// Media playback seam (nowplaying-cli in production)
#[cfg_attr(test, mockall::automock)]
pub trait MediaControl: Send {
    /// Whether media is currently playing
    fn is_playing(&self) -> bool;
    /// Pause playback
    fn pause(&self);
    /// Resume playback
    fn resume(&self);
}

/// Delivery seam for the finished text (pasteboard in production)
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink: Send {
    /// Deliver the run's final text
    fn deliver(&self, text: &str) -> anyhow::Result<()>;
}

/// The pipeline's pluggable stage implementations
pub struct PipelineStages {
    /// Audio capture
    pub recorder: Box<dyn RecorderControl>,
    /// Speech-to-text
    pub transcriber: Box<dyn TranscribeStage>,
    /// Optional LLM cleanup
    pub cleaner: Box<dyn CleanupStage>,
    /// Media pause/resume around recording
    pub media: Box<dyn MediaControl>,
    /// Final text delivery
    pub sink: Box<dyn OutputSink>,
}

impl PipelineStages {
    /// The production stage set: sox recorder, whisper-cli transcriber,
    /// Ollama cleaner, nowplaying-cli media control, pasteboard sink
    #[must_use]
    pub fn production(cache_dir: PathBuf) -> Self {
        Self {
            recorder: Box::new(crate::recorder::SoxRecorder::new(cache_dir)),
            transcriber: Box::new(crate::transcriber::WhisperTranscriber::new()),
            cleaner: Box::new(crate::cleaner::OllamaCleaner::new()),
            media: Box::new(crate::media::NowPlaying::new()),
            sink: Box::new(crate::output::Pasteboard),
        }
    }
}

/// Handle for sending commands to and observing the pipeline task
#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::Sender<PipelineCommand>,
    state: Arc<Mutex<PipelineState>>,
    events: broadcast::Sender<PipelineState>,
}

impl PipelineHandle {
    /// Deliver a press gesture (hotkey or manual start)
    pub fn press(&self) {
        let _ = self.commands.send(PipelineCommand::Press);
    }

    /// Deliver a release gesture (hotkey or manual stop)
    pub fn release(&self) {
        let _ = self.commands.send(PipelineCommand::Release);
    }

    /// Ask the pipeline task to exit after the current run
    pub fn shutdown(&self) {
        let _ = self.commands.send(PipelineCommand::Shutdown);
    }

    /// Current pipeline state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    /// Subscribe to state-transition events.
    ///
    /// Every transition is broadcast before the next stage begins, so
    /// observers never see a stale state. No observer may mutate state.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineState> {
        self.events.subscribe()
    }
}

/// The press-and-hold dictation state machine.
///
/// Idle --press--> Recording --release--> Processing --completion--> Idle.
/// No other transitions exist; a press while Recording or Processing is
/// ignored, enforcing at most one concurrent run. Stage failures degrade
/// their output; completion always reaches Idle.
pub struct Pipeline {
    config: Arc<ConfigStore>,
    history: Arc<HistoryLog>,
    stages: PipelineStages,
    state: Arc<Mutex<PipelineState>>,
    events: broadcast::Sender<PipelineState>,
    commands: mpsc::Receiver<PipelineCommand>,
    run_started_at: i64,
    recorder_started: bool,
    media_was_playing: bool,
}

impl Pipeline {
    /// Build a pipeline and its handle
    #[must_use]
    pub fn new(
        config: Arc<ConfigStore>,
        history: Arc<HistoryLog>,
        stages: PipelineStages,
    ) -> (Self, PipelineHandle) {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, _) = broadcast::channel(16);
        let state = Arc::new(Mutex::new(PipelineState::Idle));

        let handle = PipelineHandle {
            commands: command_tx,
            state: Arc::clone(&state),
            events: event_tx.clone(),
        };
        let pipeline = Self {
            config,
            history,
            stages,
            state,
            events: event_tx,
            commands: command_rx,
            run_started_at: 0,
            recorder_started: false,
            media_was_playing: false,
        };
        (pipeline, handle)
    }

    /// Run the command loop until shutdown or all senders are gone.
    ///
    /// Blocking; intended for a dedicated thread or `spawn_blocking` task so
    /// the hotkey listener stays responsive.
    pub fn run(mut self) {
        info!("pipeline started");
        loop {
            let Ok(command) = self.commands.recv() else {
                break;
            };
            match command {
                PipelineCommand::Shutdown => break,
                PipelineCommand::Press => self.on_press(),
                PipelineCommand::Release => {
                    if self.on_release() {
                        break;
                    }
                }
            }
        }
        info!("pipeline stopped");
    }

    fn set_state(&self, next: PipelineState) {
        *self.state.lock().unwrap() = next;
        info!(state = ?next, "pipeline state");
        // Broadcast before the next stage begins; no receivers is fine
        let _ = self.events.send(next);
    }

    fn on_press(&mut self) {
        if *self.state.lock().unwrap() != PipelineState::Idle {
            debug!("press while not idle (ignored)");
            return;
        }

        let config = self.config.get();
        self.run_started_at = unix_now();

        self.media_was_playing = false;
        if config.pause_media_on_record && self.stages.media.is_playing() {
            self.stages.media.pause();
            self.media_was_playing = true;
            info!("paused media playback");
        }

        self.set_state(PipelineState::Recording);

        match self.stages.recorder.start(&config.microphone) {
            Ok(()) => self.recorder_started = true,
            Err(e) => {
                // Degrade: the run continues with an empty clip and still
                // completes through Processing back to Idle on release
                warn!("failed to start recording: {e}");
                self.recorder_started = false;
            }
        }
    }

    /// Returns true if a shutdown command arrived while processing
    fn on_release(&mut self) -> bool {
        if *self.state.lock().unwrap() != PipelineState::Recording {
            debug!("release while not recording (ignored)");
            return false;
        }

        self.set_state(PipelineState::Processing);

        let clip = if self.recorder_started {
            self.recorder_started = false;
            match self.stages.recorder.stop() {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("failed to stop recording: {e}");
                    None
                }
            }
        } else {
            None
        };

        self.process_run(clip);

        if self.media_was_playing {
            self.stages.media.resume();
            self.media_was_playing = false;
            info!("resumed media playback");
        }

        // Presses queued while processing are ignored, not replayed
        let saw_shutdown = self.drain_stale_commands();
        self.set_state(PipelineState::Idle);
        saw_shutdown
    }

    fn process_run(&mut self, clip: Option<PathBuf>) {
        let config = self.config.get();

        let (whisper_output, whisper_time) = clip.map_or_else(
            || (String::new(), 0.0),
            |clip| {
                let model_path = Path::new(&config.whisper_model);
                match self.stages.transcriber.transcribe(
                    &clip,
                    model_path,
                    config.filter_hallucinations,
                ) {
                    Ok(Transcription { text, seconds }) => (text, seconds),
                    Err(e) => {
                        // Degrade: the run is still recorded with an empty
                        // transcript
                        warn!("transcription failed: {e}");
                        (String::new(), 0.0)
                    }
                }
            },
        );

        let (llm_output, llm_time, final_text) = self.cleanup_pass(&config, &whisper_output);

        let entry = HistoryEntry {
            timestamp: self.run_started_at,
            whisper_output,
            whisper_time,
            llm_output,
            llm_time,
        };
        if let Err(e) = self.history.append(&entry) {
            // Durability failures are hard errors for the operator
            error!("failed to append history entry: {e}");
        }

        if final_text.is_empty() {
            info!("run produced no text");
        } else if let Err(e) = self.stages.sink.deliver(&final_text) {
            warn!("failed to deliver text: {e}");
        }
    }

    /// Returns (`llm_output`, `llm_time`, final text for delivery).
    ///
    /// Skipped (disabled, runtime down, empty transcript) is encoded as
    /// empty output with zero time; a pass that ran and returned empty keeps
    /// its non-zero time. A failed pass falls back to the raw transcript,
    /// which is recorded as the output with zero time.
    fn cleanup_pass(
        &self,
        config: &crate::config::Config,
        transcript: &str,
    ) -> (String, f64, String) {
        if transcript.is_empty() || !config.use_ollama {
            return (String::new(), 0.0, transcript.to_owned());
        }
        if !self.stages.cleaner.is_running() {
            info!("ollama not running, skipping cleanup");
            return (String::new(), 0.0, transcript.to_owned());
        }

        match self.stages.cleaner.clean(
            transcript,
            config.effective_prompt(),
            &config.ollama_model,
        ) {
            Ok(Cleaned { text, seconds }) => (text.clone(), seconds, text),
            Err(e) => {
                warn!("cleanup failed, falling back to raw transcript: {e}");
                (transcript.to_owned(), 0.0, transcript.to_owned())
            }
        }
    }

    fn drain_stale_commands(&mut self) -> bool {
        let mut saw_shutdown = false;
        while let Ok(command) = self.commands.try_recv() {
            if command == PipelineCommand::Shutdown {
                saw_shutdown = true;
            } else {
                debug!(?command, "command during processing ignored");
            }
        }
        saw_shutdown
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPatch, ConfigStore};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str, ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "voicekey_pipeline_{tag}_{}.{ext}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn test_config(use_ollama: bool, pause_media: bool) -> Arc<ConfigStore> {
        let store = ConfigStore::open(temp_path("config", "toml")).unwrap();
        store
            .save(ConfigPatch {
                use_ollama: Some(use_ollama),
                pause_media_on_record: Some(pause_media),
                whisper_model: Some("/tmp/ggml-test.bin".to_owned()),
                ..ConfigPatch::default()
            })
            .unwrap();
        Arc::new(store)
    }

    fn test_history() -> Arc<HistoryLog> {
        Arc::new(HistoryLog::new(temp_path("history", "jsonl")))
    }

    struct StageBuilder {
        recorder: MockRecorderControl,
        transcriber: MockTranscribeStage,
        cleaner: MockCleanupStage,
        media: MockMediaControl,
        sink: MockOutputSink,
    }

    impl StageBuilder {
        /// Mocks for a run where media is not playing and nothing is delivered
        fn new() -> Self {
            let mut media = MockMediaControl::new();
            media.expect_is_playing().returning(|| false);
            Self {
                recorder: MockRecorderControl::new(),
                transcriber: MockTranscribeStage::new(),
                cleaner: MockCleanupStage::new(),
                media,
                sink: MockOutputSink::new(),
            }
        }

        fn with_recording(mut self, clip: PathBuf) -> Self {
            self.recorder.expect_start().times(1).returning(|_| Ok(()));
            self.recorder
                .expect_stop()
                .times(1)
                .returning(move || Ok(clip.clone()));
            self
        }

        fn with_transcript(mut self, text: &str, seconds: f64) -> Self {
            let text = text.to_owned();
            self.transcriber
                .expect_transcribe()
                .times(1)
                .returning(move |_, _, _| {
                    Ok(Transcription {
                        text: text.clone(),
                        seconds,
                    })
                });
            self
        }

        fn build(self) -> PipelineStages {
            PipelineStages {
                recorder: Box::new(self.recorder),
                transcriber: Box::new(self.transcriber),
                cleaner: Box::new(self.cleaner),
                media: Box::new(self.media),
                sink: Box::new(self.sink),
            }
        }
    }

    struct Harness {
        handle: PipelineHandle,
        events: broadcast::Receiver<PipelineState>,
        history: Arc<HistoryLog>,
        thread: std::thread::JoinHandle<()>,
    }

    impl Harness {
        fn spawn(config: Arc<ConfigStore>, stages: PipelineStages) -> Self {
            let history = test_history();
            let (pipeline, handle) = Pipeline::new(config, Arc::clone(&history), stages);
            let events = handle.subscribe();
            let thread = std::thread::spawn(move || pipeline.run());
            Self {
                handle,
                events,
                history,
                thread,
            }
        }

        /// One full press/release run, then shut the pipeline down
        fn run_once(self) -> (PipelineHandle, Vec<PipelineState>, Vec<HistoryEntry>) {
            self.handle.press();
            self.handle.release();
            self.handle.shutdown();
            self.thread.join().unwrap();

            let mut seen = Vec::new();
            let mut events = self.events;
            while let Ok(state) = events.try_recv() {
                seen.push(state);
            }
            let entries = self.history.list().unwrap();
            (self.handle, seen, entries)
        }
    }

    #[test]
    fn test_full_run_records_history_and_returns_to_idle() {
        let clip = temp_path("clip", "wav");
        let stages = StageBuilder::new()
            .with_recording(clip)
            .with_transcript("hello world", 0.8);
        let mut stages = stages;
        stages
            .sink
            .expect_deliver()
            .times(1)
            .withf(|text| text == "hello world")
            .returning(|_| Ok(()));

        let before = unix_now();
        let harness = Harness::spawn(test_config(false, false), stages.build());
        let (handle, events, entries) = harness.run_once();

        assert_eq!(
            events,
            vec![
                PipelineState::Recording,
                PipelineState::Processing,
                PipelineState::Idle
            ]
        );
        assert_eq!(handle.state(), PipelineState::Idle);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.whisper_output, "hello world");
        assert!((entry.whisper_time - 0.8).abs() < f64::EPSILON);
        assert_eq!(entry.llm_output, "");
        assert!((entry.llm_time - 0.0).abs() < f64::EPSILON);
        assert!(entry.timestamp >= before && entry.timestamp <= unix_now());
    }

    #[test]
    fn test_transcription_failure_still_completes_and_records() {
        let clip = temp_path("clip", "wav");
        let mut stages = StageBuilder::new().with_recording(clip);
        stages
            .transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_, _, _| {
                Err(TranscriptionError::ModelMissing(PathBuf::from(
                    "/tmp/missing.bin",
                )))
            });
        // Empty transcript: nothing delivered, cleanup never consulted
        stages.sink.expect_deliver().never();
        stages.cleaner.expect_is_running().never();

        let harness = Harness::spawn(test_config(true, false), stages.build());
        let (handle, events, entries) = harness.run_once();

        assert_eq!(handle.state(), PipelineState::Idle);
        assert_eq!(*events.last().unwrap(), PipelineState::Idle);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].whisper_output, "");
        assert!((entries[0].llm_time - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recording_start_failure_still_reaches_idle() {
        let mut stages = StageBuilder::new();
        stages.recorder.expect_start().times(1).returning(|_| {
            Err(RecordError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "rec not found",
            )))
        });
        stages.recorder.expect_stop().never();
        stages.transcriber.expect_transcribe().never();
        stages.sink.expect_deliver().never();

        let harness = Harness::spawn(test_config(false, false), stages.build());
        let (handle, events, entries) = harness.run_once();

        assert_eq!(handle.state(), PipelineState::Idle);
        assert_eq!(
            events,
            vec![
                PipelineState::Recording,
                PipelineState::Processing,
                PipelineState::Idle
            ]
        );
        // The degraded run is still recorded, with an empty clip
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].whisper_output, "");
    }

    #[test]
    fn test_cleanup_skipped_when_ollama_not_running() {
        let clip = temp_path("clip", "wav");
        let mut stages = StageBuilder::new()
            .with_recording(clip)
            .with_transcript("raw transcript", 1.1);
        stages.cleaner.expect_is_running().times(1).returning(|| false);
        stages.cleaner.expect_clean().never();
        stages
            .sink
            .expect_deliver()
            .times(1)
            .withf(|text| text == "raw transcript")
            .returning(|_| Ok(()));

        let harness = Harness::spawn(test_config(true, false), stages.build());
        let (_, _, entries) = harness.run_once();

        // Distinguishable from "ran and returned empty": time is zero
        assert_eq!(entries[0].whisper_output, "raw transcript");
        assert_eq!(entries[0].llm_output, "");
        assert!((entries[0].llm_time - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cleanup_output_recorded_and_delivered() {
        let clip = temp_path("clip", "wav");
        let mut stages = StageBuilder::new()
            .with_recording(clip)
            .with_transcript("hello world", 0.8);
        stages.cleaner.expect_is_running().times(1).returning(|| true);
        stages
            .cleaner
            .expect_clean()
            .times(1)
            .withf(|transcript, prompt, model| {
                transcript == "hello world"
                    && prompt.contains("{{transcript}}")
                    && model == "llama3.2:3b"
            })
            .returning(|_, _, _| {
                Ok(Cleaned {
                    text: "Hello, world.".to_owned(),
                    seconds: 1.4,
                })
            });
        stages
            .sink
            .expect_deliver()
            .times(1)
            .withf(|text| text == "Hello, world.")
            .returning(|_| Ok(()));

        let harness = Harness::spawn(test_config(true, false), stages.build());
        let (_, _, entries) = harness.run_once();

        assert_eq!(entries[0].llm_output, "Hello, world.");
        assert!((entries[0].llm_time - 1.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cleanup_failure_falls_back_to_raw_transcript() {
        let clip = temp_path("clip", "wav");
        let mut stages = StageBuilder::new()
            .with_recording(clip)
            .with_transcript("raw words", 0.5);
        stages.cleaner.expect_is_running().times(1).returning(|| true);
        stages.cleaner.expect_clean().times(1).returning(|_, _, _| {
            Err(CleanupError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        });
        stages
            .sink
            .expect_deliver()
            .times(1)
            .withf(|text| text == "raw words")
            .returning(|_| Ok(()));

        let harness = Harness::spawn(test_config(true, false), stages.build());
        let (_, _, entries) = harness.run_once();

        assert_eq!(entries[0].whisper_output, "raw words");
        // The fallback text is recorded as the cleanup output, with zero time
        // marking that no pass completed
        assert_eq!(entries[0].llm_output, "raw words");
        assert!((entries[0].llm_time - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_press_while_busy_is_ignored() {
        let clip = temp_path("clip", "wav");
        let mut stages = StageBuilder::new().with_recording(clip);
        stages
            .transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_, _, _| {
                // Hold the pipeline in Processing long enough for the extra
                // press to arrive
                std::thread::sleep(Duration::from_millis(300));
                Ok(Transcription {
                    text: "once".to_owned(),
                    seconds: 0.3,
                })
            });
        stages
            .sink
            .expect_deliver()
            .times(1)
            .returning(|_| Ok(()));

        let harness = Harness::spawn(test_config(false, false), stages.build());
        harness.handle.press();
        // Press while already Recording: ignored immediately
        harness.handle.press();
        harness.handle.release();
        std::thread::sleep(Duration::from_millis(50));
        // Press while Processing: drained, not replayed
        harness.handle.press();
        harness.handle.shutdown();
        harness.thread.join().unwrap();

        assert_eq!(harness.handle.state(), PipelineState::Idle);
        assert_eq!(harness.history.list().unwrap().len(), 1);
    }

    #[test]
    fn test_media_paused_and_resumed_around_run() {
        let clip = temp_path("clip", "wav");
        let mut media = MockMediaControl::new();
        media.expect_is_playing().times(1).returning(|| true);
        media.expect_pause().times(1).return_const(());
        media.expect_resume().times(1).return_const(());

        let mut stages = StageBuilder::new()
            .with_recording(clip)
            .with_transcript("words", 0.2);
        stages.media = media;
        stages
            .sink
            .expect_deliver()
            .times(1)
            .returning(|_| Ok(()));

        let harness = Harness::spawn(test_config(false, true), stages.build());
        let (handle, _, _) = harness.run_once();
        assert_eq!(handle.state(), PipelineState::Idle);
    }

    #[test]
    fn test_release_while_idle_is_ignored() {
        let stages = StageBuilder::new();
        let mut stages = stages;
        stages.recorder.expect_start().never();
        stages.recorder.expect_stop().never();

        let harness = Harness::spawn(test_config(false, false), stages.build());
        harness.handle.release();
        harness.handle.shutdown();
        harness.thread.join().unwrap();

        assert_eq!(harness.handle.state(), PipelineState::Idle);
        assert!(harness.history.list().unwrap().is_empty());
    }
}
