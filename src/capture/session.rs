use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::analysis::client::{AnalysisHints, AnalysisKind, RequestToken};
use crate::analysis::result::AnalysisResult;
use crate::capture::hit_test::{DisplayPoint, DisplaySize, HitTester};
use crate::capture::segmentation::{MaskSet, SegmentationOutcome};
use crate::common::{Frame, FrameId, MaskBuffer};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    SegmentationPending,
    MasksReady,
    Selected,
    AnalysisPending,
    ResultReady,
    AnalysisFailed,
}

/// Transient messages for the UI, cleared by the next user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NoObjectFound,
}

/// What an analysis request looks at.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisTarget {
    Selection,
    FullFrame,
    Text(String),
}

impl AnalysisTarget {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisTarget::Selection | AnalysisTarget::FullFrame => AnalysisKind::Image,
            AnalysisTarget::Text(_) => AnalysisKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub token: RequestToken,
    pub target: AnalysisTarget,
    pub hints: AnalysisHints,
}

/// Inputs a worker needs to run one request without touching the session.
#[derive(Debug, Clone)]
pub enum JobInput {
    Cutout { mask: MaskBuffer, frame: Frame },
    Frame(Frame),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub request: AnalysisRequest,
    pub input: JobInput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Accepted(AnalysisResult),
    Failed,
    Discarded,
}

/// Everything an observer may render, copied out of the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: CaptureState,
    pub frame_id: Option<FrameId>,
    pub instance_count: usize,
    pub selected: Option<usize>,
    pub pending: Option<RequestToken>,
    pub preview: Option<Arc<RgbaImage>>,
    pub result: Option<AnalysisResult>,
    pub error: Option<Arc<SessionError>>,
    pub notice: Option<Notice>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            frame_id: None,
            instance_count: 0,
            selected: None,
            pending: None,
            preview: None,
            result: None,
            error: None,
            notice: None,
        }
    }
}

/// Sole owner of the frame, its masks, the selection and the live request.
///
/// The state is derived from which of these are present, so a field can never
/// disagree with the reported `CaptureState`.
pub struct CaptureSession {
    frame: Option<Frame>,
    masks: Option<MaskSet>,
    selection: Option<usize>,
    preview: Option<Arc<RgbaImage>>,
    pending: Option<AnalysisRequest>,
    last_request: Option<AnalysisRequest>,
    result: Option<AnalysisResult>,
    error: Option<Arc<SessionError>>,
    notice: Option<Notice>,
    issued: u64,
    hit_tester: HitTester,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(HitTester::default())
    }
}

impl CaptureSession {
    pub fn new(hit_tester: HitTester) -> Self {
        Self {
            frame: None,
            masks: None,
            selection: None,
            preview: None,
            pending: None,
            last_request: None,
            result: None,
            error: None,
            notice: None,
            issued: 0,
            hit_tester,
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.pending.is_some() {
            CaptureState::AnalysisPending
        } else if self.error.is_some() {
            CaptureState::AnalysisFailed
        } else if self.result.is_some() {
            CaptureState::ResultReady
        } else if self.selection.is_some() {
            CaptureState::Selected
        } else if self.masks.is_some() {
            CaptureState::MasksReady
        } else if self.frame.is_some() {
            CaptureState::SegmentationPending
        } else {
            CaptureState::Idle
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn masks(&self) -> Option<&MaskSet> {
        self.masks.as_ref()
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending.as_ref().map(|request| request.token)
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    /// Replaces whatever was captured before and waits for segmentation.
    pub fn begin_capture(&mut self, frame: Frame) -> Frame {
        self.reset();
        info!("Captured frame {} ({}x{})", frame.id(), frame.width(), frame.height());
        self.frame = Some(frame.clone());
        frame
    }

    /// Installs masks, and the preview rendered alongside them, for the current
    /// frame. Results computed for any other frame are dropped; returns whether
    /// the outcome was applied.
    pub fn apply_segmentation(
        &mut self,
        frame_id: FrameId,
        outcome: SegmentationOutcome,
        preview: Option<Arc<RgbaImage>>,
    ) -> bool {
        let Some(frame) = self.frame.as_ref() else {
            debug!("Dropping segmentation for frame {}: no frame held", frame_id);
            return false;
        };
        if frame.id() != frame_id || self.masks.is_some() {
            debug!("Dropping segmentation for superseded frame {}", frame_id);
            return false;
        }

        match outcome {
            SegmentationOutcome::Masks(masks) if masks.frame_id() == frame_id => {
                self.preview = preview;
                self.masks = Some(masks);
            }
            SegmentationOutcome::Masks(masks) => {
                debug!(
                    "Mask set for frame {} delivered as frame {}",
                    masks.frame_id(),
                    frame_id
                );
                return false;
            }
            SegmentationOutcome::NoInstancesFound => {
                self.frame = None;
                self.notice = Some(Notice::NoObjectFound);
            }
        }
        true
    }

    /// Resolves a tap into a selection change. Returns the new selection.
    pub fn tap(&mut self, point: DisplayPoint, display: DisplaySize) -> Option<usize> {
        let (Some(frame), Some(masks)) = (self.frame.as_ref(), self.masks.as_ref()) else {
            debug!("Ignoring tap without masks");
            return self.selection;
        };
        match self
            .hit_tester
            .locate(point, display, frame.pixel_size(), masks.instances())
        {
            Some(index) => self.toggle(index),
            None => self.clear_selection(),
        }
        self.selection
    }

    /// Selects `index`, or clears the selection when it is already selected.
    pub fn toggle(&mut self, index: usize) {
        let in_range = self.masks.as_ref().is_some_and(|masks| index < masks.len());
        if !in_range {
            debug!("Ignoring selection of missing instance {}", index);
            return;
        }
        let next = if self.selection == Some(index) {
            None
        } else {
            Some(index)
        };
        self.set_selection(next);
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(None);
    }

    fn set_selection(&mut self, next: Option<usize>) {
        if self.selection == next {
            return;
        }
        debug!("Selection {:?} -> {:?}", self.selection, next);
        self.selection = next;
        self.result = None;
        self.error = None;
        if let Some(pending) = &self.pending {
            if pending.target == AnalysisTarget::Selection {
                debug!("Selection changed, invalidating {}", pending.token);
                self.pending = None;
            }
        }
    }

    pub fn preview(&self) -> Option<Arc<RgbaImage>> {
        self.preview.clone()
    }

    /// Mask and frame of the current selection, cloned for a worker.
    pub fn cutout_source(&self) -> Result<(MaskBuffer, Frame), SessionError> {
        let frame = self.frame.as_ref().ok_or(SessionError::SelectionLost)?;
        let mask = self
            .selection
            .and_then(|index| self.masks.as_ref()?.get(index))
            .ok_or(SessionError::SelectionLost)?;
        Ok((mask.buffer.clone(), frame.clone()))
    }

    /// Issues a fresh token for `target`; any earlier token is now stale.
    pub fn begin_analysis(
        &mut self,
        target: AnalysisTarget,
        hints: AnalysisHints,
    ) -> Result<AnalysisJob, SessionError> {
        let input = match &target {
            AnalysisTarget::Selection => {
                let (mask, frame) = self.cutout_source()?;
                JobInput::Cutout { mask, frame }
            }
            AnalysisTarget::FullFrame => {
                JobInput::Frame(self.frame.clone().ok_or(SessionError::SelectionLost)?)
            }
            AnalysisTarget::Text(text) => JobInput::Text(text.clone()),
        };

        self.issued += 1;
        let request = AnalysisRequest {
            token: RequestToken::new(self.issued),
            target,
            hints,
        };
        if let Some(previous) = &self.pending {
            debug!("{} supersedes {}", request.token, previous.token);
        }
        info!("Issued {} for {:?} analysis", request.token, request.target.kind());

        self.pending = Some(request.clone());
        self.last_request = Some(request.clone());
        self.result = None;
        self.error = None;
        self.notice = None;
        Ok(AnalysisJob { request, input })
    }

    /// Re-issues the failed request under a new token.
    pub fn retry(&mut self) -> Result<AnalysisJob, SessionError> {
        if self.state() != CaptureState::AnalysisFailed {
            return Err(SessionError::NothingToRetry);
        }
        let last = self.last_request.clone().ok_or(SessionError::NothingToRetry)?;
        self.begin_analysis(last.target, last.hints)
    }

    /// Applies a worker's outcome if `token` is still the live one.
    pub fn complete_analysis(
        &mut self,
        token: RequestToken,
        outcome: Result<AnalysisResult, SessionError>,
    ) -> Completion {
        if self.pending_token() != Some(token) {
            debug!("Discarding stale {}", token);
            return Completion::Discarded;
        }
        self.pending = None;
        match outcome {
            Ok(result) => {
                info!("{} resolved: {} -> {}", token, result.item(), result.bin());
                self.result = Some(result.clone());
                Completion::Accepted(result)
            }
            Err(e) => {
                warn!("{} failed: {}", token, e);
                self.error = Some(Arc::new(e));
                Completion::Failed
            }
        }
    }

    /// Back to `Idle`; the live token, if any, is invalidated.
    pub fn clear(&mut self) {
        self.reset();
        info!("Session cleared");
    }

    fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Reset invalidates {}", pending.token);
        }
        self.frame = None;
        self.masks = None;
        self.selection = None;
        self.preview = None;
        self.last_request = None;
        self.result = None;
        self.error = None;
        self.notice = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            frame_id: self.frame.as_ref().map(Frame::id),
            instance_count: self.masks.as_ref().map_or(0, MaskSet::len),
            selected: self.selection,
            pending: self.pending_token(),
            preview: self.preview.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            notice: self.notice,
        }
    }
}
