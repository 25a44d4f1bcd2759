use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::analysis::client::{AnalysisHints, AnalysisPayload, ModelClient, RequestToken};
use crate::analysis::normalizer::ResultNormalizer;
use crate::analysis::result::AnalysisResult;
use crate::analysis::service::AnalysisService;
use crate::capture::compositor::CutoutCompositor;
use crate::capture::hit_test::{DisplayPoint, DisplaySize, HitTester};
use crate::capture::segmentation::{SegmentationAdapter, SegmentationModel, SegmentationOutcome};
use crate::capture::session::{
    AnalysisJob, AnalysisTarget, CaptureSession, Completion, JobInput, SessionSnapshot,
};
use crate::common::{Frame, FrameId};
use crate::config::Settings;
use crate::error::{AppError, SessionError};
use crate::history::{HistoryEntry, HistoryStore, InMemoryHistoryStore, ScanSource};

enum Command {
    Capture {
        frame: Frame,
        reply: oneshot::Sender<FrameId>,
    },
    Tap {
        point: DisplayPoint,
        display: DisplaySize,
        reply: oneshot::Sender<Option<usize>>,
    },
    Toggle {
        index: usize,
        reply: oneshot::Sender<Option<usize>>,
    },
    Analyze {
        target: AnalysisTarget,
        hints: AnalysisHints,
        reply: oneshot::Sender<Result<RequestToken, SessionError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<RequestToken, SessionError>>,
    },
    Cutout {
        reply: oneshot::Sender<Result<Arc<RgbaImage>, SessionError>>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

// Results of background work, handed back to the actor.
enum Message {
    Segmented {
        frame_id: FrameId,
        outcome: SegmentationOutcome,
        preview: Option<Arc<RgbaImage>>,
    },
    Analyzed {
        token: RequestToken,
        outcome: Result<AnalysisResult, SessionError>,
        preview: Option<Arc<RgbaImage>>,
        source: ScanSource,
    },
}

/// Cloneable front door to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Starts segmentation of `frame`, replacing anything captured before.
    pub async fn capture(&self, frame: Frame) -> Result<FrameId, SessionError> {
        self.request(|reply| Command::Capture { frame, reply }).await
    }

    pub async fn tap(
        &self,
        point: DisplayPoint,
        display: DisplaySize,
    ) -> Result<Option<usize>, SessionError> {
        self.request(|reply| Command::Tap {
            point,
            display,
            reply,
        })
        .await
    }

    pub async fn toggle(&self, index: usize) -> Result<Option<usize>, SessionError> {
        self.request(|reply| Command::Toggle { index, reply }).await
    }

    pub async fn analyze_selection(&self, hints: AnalysisHints) -> Result<RequestToken, SessionError> {
        self.analyze(AnalysisTarget::Selection, hints).await
    }

    pub async fn analyze_frame(&self, hints: AnalysisHints) -> Result<RequestToken, SessionError> {
        self.analyze(AnalysisTarget::FullFrame, hints).await
    }

    pub async fn analyze_text(
        &self,
        text: impl Into<String>,
        hints: AnalysisHints,
    ) -> Result<RequestToken, SessionError> {
        self.analyze(AnalysisTarget::Text(text.into()), hints).await
    }

    pub async fn analyze(
        &self,
        target: AnalysisTarget,
        hints: AnalysisHints,
    ) -> Result<RequestToken, SessionError> {
        self.request(|reply| Command::Analyze {
            target,
            hints,
            reply,
        })
        .await?
    }

    pub async fn retry(&self) -> Result<RequestToken, SessionError> {
        self.request(|reply| Command::Retry { reply }).await?
    }

    /// Full-resolution cutout of the current selection.
    pub async fn selected_cutout(&self) -> Result<Arc<RgbaImage>, SessionError> {
        self.request(|reply| Command::Cutout { reply }).await?
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        Ok(snapshot.clone())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        response.await.map_err(|_| SessionError::ControllerClosed)
    }
}

/// Actor that owns the `CaptureSession`. Commands and background results are
/// handled one at a time, so only this task ever mutates the session.
pub struct SessionController {
    session: CaptureSession,
    segmentation: SegmentationAdapter,
    compositor: CutoutCompositor,
    service: AnalysisService,
    normalizer: ResultNormalizer,
    history: Arc<dyn HistoryStore>,
    commands: mpsc::Receiver<Command>,
    messages_tx: mpsc::Sender<Message>,
    messages_rx: mpsc::Receiver<Message>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn builder(
        model: Arc<dyn SegmentationModel>,
        client: Arc<dyn ModelClient>,
    ) -> SessionControllerBuilder {
        SessionControllerBuilder::new(model, client)
    }

    async fn run(mut self) {
        info!("Session controller started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = self.messages_rx.recv() => {
                    self.handle_message(message);
                    self.publish();
                }
            }
        }
        info!("Session controller stopped");
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    // Snapshots are published before replying, so a caller that awaited a
    // command always observes its effect.
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Capture { frame, reply } => {
                let frame = self.session.begin_capture(frame);
                let frame_id = frame.id();
                self.spawn_segmentation(frame);
                self.publish();
                let _ = reply.send(frame_id);
            }
            Command::Tap {
                point,
                display,
                reply,
            } => {
                let selected = self.session.tap(point, display);
                self.publish();
                let _ = reply.send(selected);
            }
            Command::Toggle { index, reply } => {
                self.session.toggle(index);
                self.publish();
                let _ = reply.send(self.session.selection());
            }
            Command::Analyze {
                target,
                hints,
                reply,
            } => {
                let issued = self
                    .session
                    .begin_analysis(target, hints)
                    .map(|job| self.spawn_analysis(job));
                self.publish();
                let _ = reply.send(issued);
            }
            Command::Retry { reply } => {
                let issued = self.session.retry().map(|job| self.spawn_analysis(job));
                self.publish();
                let _ = reply.send(issued);
            }
            Command::Cutout { reply } => match self.session.cutout_source() {
                Ok((mask, frame)) => {
                    let compositor = self.compositor.clone();
                    tokio::spawn(async move {
                        let cutout = compositor
                            .cutout_in_background(mask, frame)
                            .await
                            .map_err(SessionError::from);
                        let _ = reply.send(cutout);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Clear { reply } => {
                self.session.clear();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Segmented {
                frame_id,
                outcome,
                preview,
            } => {
                self.session.apply_segmentation(frame_id, outcome, preview);
            }
            Message::Analyzed {
                token,
                outcome,
                preview,
                source,
            } => {
                if let Completion::Accepted(result) = self.session.complete_analysis(token, outcome) {
                    self.record_history(HistoryEntry::new(result, preview, source));
                }
            }
        }
    }

    // The preview is rendered on the same blocking worker as the masks so the
    // actor never runs image filters itself.
    fn spawn_segmentation(&self, frame: Frame) {
        let adapter = self.segmentation.clone();
        let compositor = self.compositor.clone();
        let messages = self.messages_tx.clone();
        tokio::spawn(async move {
            let frame_id = frame.id();
            let (outcome, preview) = tokio::task::spawn_blocking(move || {
                let outcome = adapter.segment(&frame);
                let preview = compositor.preview_for(&outcome, &frame);
                (outcome, preview)
            })
            .await
            .unwrap_or_else(|e| {
                error!("Segmentation worker for frame {} failed: {}", frame_id, e);
                (SegmentationOutcome::NoInstancesFound, None)
            });
            if messages
                .send(Message::Segmented {
                    frame_id,
                    outcome,
                    preview,
                })
                .await
                .is_err()
            {
                debug!("Controller gone before segmentation of {} finished", frame_id);
            }
        });
    }

    fn spawn_analysis(&self, job: AnalysisJob) -> RequestToken {
        let token = job.request.token;
        let hints = job.request.hints;
        let compositor = self.compositor.clone();
        let service = self.service.clone();
        let normalizer = self.normalizer;
        let messages = self.messages_tx.clone();

        tokio::spawn(async move {
            let (preview, source, payload) = match job.input {
                JobInput::Cutout { mask, frame } => {
                    match compositor.cutout_for_upload(mask, frame).await {
                        Ok((cutout, image)) => (
                            Some(cutout),
                            ScanSource::Photo,
                            Ok(AnalysisPayload::Image { image, hints }),
                        ),
                        Err(e) => (None, ScanSource::Photo, Err(SessionError::from(e))),
                    }
                }
                JobInput::Frame(frame) => {
                    let preview = frame.shared_image();
                    match compositor.frame_for_upload(frame).await {
                        Ok(image) => (
                            Some(preview),
                            ScanSource::Photo,
                            Ok(AnalysisPayload::Image { image, hints }),
                        ),
                        Err(e) => (None, ScanSource::Photo, Err(SessionError::from(e))),
                    }
                }
                JobInput::Text(text) => (None, ScanSource::Text, Ok(AnalysisPayload::Text { text, hints })),
            };

            let outcome = match payload {
                Ok(payload) => service
                    .analyze(payload)
                    .await
                    .map(|raw| normalizer.normalize(&raw))
                    .map_err(SessionError::from),
                Err(e) => Err(e),
            };
            let message = Message::Analyzed {
                token,
                outcome,
                preview,
                source,
            };
            if messages.send(message).await.is_err() {
                debug!("Controller gone before {} finished", token);
            }
        });
        token
    }

    fn record_history(&self, entry: HistoryEntry) {
        let history = self.history.clone();
        tokio::spawn(async move {
            let item = entry.result.item().to_string();
            match history.record(entry).await {
                Ok(()) => debug!("Recorded {} in history", item),
                Err(e) => warn!("Failed to record {} in history: {}", item, e),
            }
        });
    }
}

pub struct SessionControllerBuilder {
    settings: Settings,
    model: Arc<dyn SegmentationModel>,
    client: Arc<dyn ModelClient>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl SessionControllerBuilder {
    pub fn new(model: Arc<dyn SegmentationModel>, client: Arc<dyn ModelClient>) -> Self {
        Self {
            settings: Settings::default(),
            model,
            client,
            history: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    // Replaces the default in-memory history.
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Validates the settings and spawns the actor on the current runtime.
    pub fn spawn(self) -> Result<SessionHandle, AppError> {
        self.settings.validate()?;
        let buffer = self.settings.analysis.command_buffer_size;
        let (commands_tx, commands) = mpsc::channel(buffer);
        let (messages_tx, messages_rx) = mpsc::channel(buffer);
        let (snapshots, snapshots_rx) = watch::channel(SessionSnapshot::default());

        let controller = SessionController {
            session: CaptureSession::new(HitTester::from_settings(&self.settings.capture)),
            segmentation: SegmentationAdapter::new(self.model).with_settings(&self.settings.capture),
            compositor: CutoutCompositor::new(self.settings.compositor.clone()),
            service: AnalysisService::new(self.client, self.settings.analysis.request_timeout()),
            normalizer: ResultNormalizer::new(),
            history: self
                .history
                .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new())),
            commands,
            messages_tx,
            messages_rx,
            snapshots,
        };
        tokio::spawn(controller.run());

        Ok(SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use image::Rgba;
    use tokio::sync::Mutex;

    use super::*;
    use crate::analysis::result::BinCategory;
    use crate::capture::segmentation::tests::{FixedMasks, rect_mask};
    use crate::capture::session::CaptureState;
    use crate::error::TransportError;

    const CAN: &str = r#"{"item":"Aluminum can","material":"aluminum","recyclable":true,"bin":"Recycling","notes":"Empty and rinse","carbonSavedKg":0.17}"#;
    const OLD_JAR: &str = r#"{"item":"Old jar","material":"glass","recyclable":true,"bin":"Recycling","notes":"","carbonSavedKg":0.1}"#;

    /// Replies from a script; each reply may be delayed.
    struct ScriptedClient {
        replies: Mutex<VecDeque<(Duration, Result<String, TransportError>)>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<(Duration, Result<String, TransportError>)>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn analyze(&self, _payload: AnalysisPayload) -> Result<String, TransportError> {
            let next = self.replies.lock().await.pop_front();
            match next {
                Some((delay, reply)) => {
                    tokio::time::sleep(delay).await;
                    reply
                }
                None => Err(TransportError::Other("script exhausted".to_string())),
            }
        }
    }

    /// Slow for "jar", immediate for anything else.
    struct SlowJarClient;

    #[async_trait]
    impl ModelClient for SlowJarClient {
        async fn analyze(&self, payload: AnalysisPayload) -> Result<String, TransportError> {
            match payload {
                AnalysisPayload::Text { text, .. } if text == "jar" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(OLD_JAR.to_string())
                }
                _ => Ok(CAN.to_string()),
            }
        }
    }

    fn model() -> Arc<FixedMasks> {
        Arc::new(FixedMasks(vec![rect_mask(200, 200, 20, 20, 80, 80)]))
    }

    fn frame() -> Frame {
        Frame::new(RgbaImage::from_pixel(200, 200, Rgba([200, 10, 10, 255])), 1.0)
    }

    fn spawn(client: Arc<ScriptedClient>, history: Arc<InMemoryHistoryStore>) -> SessionHandle {
        SessionController::builder(model(), client)
            .history(history)
            .spawn()
            .unwrap()
    }

    async fn captured_and_selected(handle: &SessionHandle) {
        handle.capture(frame()).await.unwrap();
        handle
            .wait_for(|s| s.state == CaptureState::MasksReady)
            .await
            .unwrap();
        let selected = handle
            .tap(DisplayPoint::new(50.0, 50.0), DisplaySize::new(200.0, 200.0))
            .await
            .unwrap();
        assert_eq!(selected, Some(0));
    }

    #[tokio::test]
    async fn tap_analyze_and_record() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let client = ScriptedClient::new(vec![(Duration::ZERO, Ok(CAN.to_string()))]);
        let handle = spawn(client, history.clone());

        captured_and_selected(&handle).await;
        let token = handle.analyze_selection(AnalysisHints::default()).await.unwrap();
        let snapshot = handle
            .wait_for(|s| s.state == CaptureState::ResultReady)
            .await
            .unwrap();

        let result = snapshot.result.unwrap();
        assert_eq!(result.bin(), BinCategory::Recycling);
        assert_eq!(result.carbon_saved_kg(), 0.17);
        assert!(snapshot.pending.is_none());
        assert_eq!(token.value(), 1);

        for _ in 0..50 {
            if !history.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let entries = history.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, ScanSource::Photo);
        let preview = entries[0].preview.as_ref().unwrap();
        assert_eq!(preview.dimensions(), (200, 200));
    }

    #[tokio::test]
    async fn later_request_wins_even_when_earlier_finishes_last() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let handle = SessionController::builder(model(), Arc::new(SlowJarClient))
            .history(history.clone())
            .spawn()
            .unwrap();

        let a = handle.analyze_text("jar", AnalysisHints::default()).await.unwrap();
        let b = handle.analyze_text("can", AnalysisHints::default()).await.unwrap();
        assert!(b > a);

        let snapshot = handle
            .wait_for(|s| s.state == CaptureState::ResultReady)
            .await
            .unwrap();
        assert_eq!(snapshot.result.unwrap().item(), "Aluminum can");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = handle.snapshot();
        assert_eq!(after.result.unwrap().item(), "Aluminum can");
        let items: Vec<String> = history
            .entries()
            .await
            .iter()
            .map(|e| e.result.item().to_string())
            .collect();
        assert_eq!(items, vec!["Aluminum can"]);
    }

    #[tokio::test]
    async fn transport_failure_then_retry() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let client = ScriptedClient::new(vec![
            (Duration::ZERO, Err(TransportError::Network("offline".to_string()))),
            (Duration::ZERO, Ok(CAN.to_string())),
        ]);
        let handle = spawn(client, history);

        captured_and_selected(&handle).await;
        let first = handle.analyze_selection(AnalysisHints::default()).await.unwrap();
        let failed = handle
            .wait_for(|s| s.state == CaptureState::AnalysisFailed)
            .await
            .unwrap();
        assert!(matches!(
            failed.error.as_deref(),
            Some(SessionError::Transport(TransportError::Network(_)))
        ));

        let second = handle.retry().await.unwrap();
        assert!(second > first);
        handle
            .wait_for(|s| s.state == CaptureState::ResultReady)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn preview_arrives_with_the_masks() {
        let handle = spawn(ScriptedClient::new(vec![]), Arc::new(InMemoryHistoryStore::new()));
        handle.capture(frame()).await.unwrap();
        let snapshot = handle
            .wait_for(|s| s.state == CaptureState::MasksReady)
            .await
            .unwrap();

        let preview = snapshot.preview.expect("preview rendered on the worker");
        assert_eq!(preview.dimensions(), (200, 200));
        assert!(preview.get_pixel(20, 50)[3] > 0);
        assert_eq!(preview.get_pixel(50, 50)[3], 0);
    }

    #[tokio::test]
    async fn no_instances_returns_to_idle_with_notice() {
        let client = ScriptedClient::new(vec![]);
        let handle = SessionController::builder(Arc::new(FixedMasks(vec![])), client)
            .spawn()
            .unwrap();
        handle.capture(frame()).await.unwrap();
        let snapshot = handle.wait_for(|s| s.notice.is_some()).await.unwrap();
        assert_eq!(snapshot.state, CaptureState::Idle);
    }

    #[tokio::test]
    async fn cutout_requires_selection() {
        let handle = spawn(ScriptedClient::new(vec![]), Arc::new(InMemoryHistoryStore::new()));
        assert!(matches!(
            handle.selected_cutout().await,
            Err(SessionError::SelectionLost)
        ));

        captured_and_selected(&handle).await;
        let cutout = handle.selected_cutout().await.unwrap();
        assert_eq!(cutout.get_pixel(50, 50)[3], 255);
        assert_eq!(cutout.get_pixel(150, 150)[3], 0);

        handle.clear().await.unwrap();
        assert_eq!(handle.snapshot().state, CaptureState::Idle);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.compositor.upload_max_edge = 0;
        let result = SessionController::builder(model(), ScriptedClient::new(vec![]))
            .settings(settings)
            .spawn();
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
