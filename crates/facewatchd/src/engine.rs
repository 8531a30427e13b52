use facewatch_core::overlay::{render_faces, Canvas};
use facewatch_core::reference::{ReferenceError, ReferenceImage, ReferenceStore};
use facewatch_core::{AnalyzerError, CameraFailure, FaceAnalyzer, MatcherCache, ReferenceState};
use facewatch_hw::{CameraError, FrameSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("camera lost after {failures} consecutive capture failures: {reason}")]
    CameraLost {
        failure: CameraFailure,
        failures: u32,
        reason: String,
    },
    #[error("analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of one detection tick.
#[derive(Debug)]
pub enum TickReport {
    /// No camera is open.
    NoSource,
    /// A frame was analyzed and held no face (or was too dark to try).
    NoFaces,
    Faces {
        count: usize,
        canvas: Canvas,
        reference: ReferenceSnapshot,
    },
}

/// Reference state tagged with the generation it was resolved under.
///
/// The generation moves forward on every upload and restore, so a reply
/// computed against an older reference can be told apart from a newer one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSnapshot {
    pub generation: u64,
    pub state: ReferenceState,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub analysis_max_width: u32,
    pub max_capture_failures: u32,
    pub warmup_frames: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analysis_max_width: 640,
            max_capture_failures: 10,
            warmup_frames: 4,
        }
    }
}

/// Opens (or reopens) the frame source.
pub type SourceOpener<S> = Box<dyn FnMut() -> Result<S, CameraError> + Send>;

/// Everything one detection tick needs, owned by the engine thread.
pub struct Pipeline<S, A> {
    source: Option<S>,
    opener: SourceOpener<S>,
    analyzer: A,
    store: ReferenceStore,
    cache: MatcherCache,
    options: PipelineOptions,
    capture_failures: u32,
    generation: u64,
}

impl<S: FrameSource, A: FaceAnalyzer> Pipeline<S, A> {
    pub fn new(
        analyzer: A,
        store: ReferenceStore,
        opener: SourceOpener<S>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source: None,
            opener,
            analyzer,
            store,
            cache: MatcherCache::new(),
            options,
            capture_failures: 0,
            generation: 0,
        }
    }

    /// Open the source, replacing any current one, and discard warmup frames.
    pub fn open_source(&mut self) -> Result<(u32, u32), EngineError> {
        self.source = None;
        let mut source = (self.opener)()?;
        if self.options.warmup_frames > 0 {
            tracing::info!(count = self.options.warmup_frames, "discarding warmup frames");
            source.warm_up(self.options.warmup_frames);
        }
        let resolution = source.resolution();
        tracing::info!(width = resolution.0, height = resolution.1, "frame source ready");
        self.source = Some(source);
        self.capture_failures = 0;
        Ok(resolution)
    }

    #[cfg(test)]
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Grab, analyze and render one frame.
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(TickReport::NoSource);
        };

        let frame = match source.grab() {
            Ok(frame) => {
                self.capture_failures = 0;
                frame
            }
            Err(e) => {
                self.capture_failures += 1;
                tracing::warn!(
                    error = %e,
                    failures = self.capture_failures,
                    "frame capture failed"
                );
                if self.capture_failures >= self.options.max_capture_failures {
                    self.source = None;
                    return Err(EngineError::CameraLost {
                        failure: e.failure(),
                        failures: self.capture_failures,
                        reason: e.to_string(),
                    });
                }
                return Ok(TickReport::NoFaces);
            }
        };

        if frame.is_dark {
            tracing::debug!(
                seq = frame.sequence,
                brightness = frame.avg_brightness(),
                "skipping dark frame"
            );
            return Ok(TickReport::NoFaces);
        }

        let native = frame.resolution();
        let small = frame.downscaled(self.options.analysis_max_width);
        let faces = self.analyzer.analyze(&small.data, small.width, small.height)?;
        if faces.is_empty() {
            return Ok(TickReport::NoFaces);
        }

        let faces: Vec<_> = faces
            .iter()
            .map(|f| f.rescaled(small.resolution(), native))
            .collect();
        let reference = self.reference_state();

        let mut canvas = Canvas::new(native.0, native.1);
        render_faces(&mut canvas, &faces, self.cache.matcher());
        tracing::debug!(
            faces = faces.len(),
            matching = reference.state.has_matcher(),
            generation = reference.generation,
            "frame rendered"
        );

        Ok(TickReport::Faces {
            count: faces.len(),
            canvas,
            reference,
        })
    }

    /// Replace the active reference with an uploaded image.
    pub fn set_reference(&mut self, data_uri: &str) -> Result<ReferenceSnapshot, EngineError> {
        let image = ReferenceImage::from_data_uri(data_uri)?;
        self.store.set(image);
        self.generation += 1;
        Ok(self.reference_state())
    }

    pub fn restore_default(&mut self) -> ReferenceSnapshot {
        self.store.restore_default();
        self.generation += 1;
        self.reference_state()
    }

    pub fn reference_state(&mut self) -> ReferenceSnapshot {
        ReferenceSnapshot {
            generation: self.generation,
            state: self.cache.resolve(&self.store, &mut self.analyzer),
        }
    }
}

/// Messages sent from the poller and D-Bus handlers to the engine thread.
pub(crate) enum EngineRequest {
    Tick {
        reply: oneshot::Sender<Result<TickReport, EngineError>>,
    },
    OpenSource {
        reply: oneshot::Sender<Result<(u32, u32), EngineError>>,
    },
    SetReference {
        data_uri: String,
        reply: oneshot::Sender<Result<ReferenceSnapshot, EngineError>>,
    },
    RestoreDefault {
        reply: oneshot::Sender<ReferenceSnapshot>,
    },
    ReferenceState {
        reply: oneshot::Sender<ReferenceSnapshot>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        self.request(|reply| EngineRequest::Tick { reply }).await?
    }

    pub async fn open_source(&self) -> Result<(u32, u32), EngineError> {
        self.request(|reply| EngineRequest::OpenSource { reply })
            .await?
    }

    pub async fn set_reference(&self, data_uri: String) -> Result<ReferenceSnapshot, EngineError> {
        self.request(|reply| EngineRequest::SetReference { data_uri, reply })
            .await?
    }

    pub async fn restore_default(&self) -> Result<ReferenceSnapshot, EngineError> {
        self.request(|reply| EngineRequest::RestoreDefault { reply })
            .await
    }

    pub async fn reference_state(&self) -> Result<ReferenceSnapshot, EngineError> {
        self.request(|reply| EngineRequest::ReferenceState { reply })
            .await
    }
}

/// Spawn the pipeline on a dedicated OS thread.
///
/// Inference is blocking and CPU-bound, so it never runs on the async
/// runtime. Requests are served one at a time in arrival order.
pub fn spawn_engine<S, A>(mut pipeline: Pipeline<S, A>) -> Result<EngineHandle, EngineError>
where
    S: FrameSource + 'static,
    A: FaceAnalyzer + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Tick { reply } => {
                        let _ = reply.send(pipeline.tick());
                    }
                    EngineRequest::OpenSource { reply } => {
                        let _ = reply.send(pipeline.open_source());
                    }
                    EngineRequest::SetReference { data_uri, reply } => {
                        let _ = reply.send(pipeline.set_reference(&data_uri));
                    }
                    EngineRequest::RestoreDefault { reply } => {
                        let _ = reply.send(pipeline.restore_default());
                    }
                    EngineRequest::ReferenceState { reply } => {
                        let _ = reply.send(pipeline.reference_state());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facewatch_core::reference::encode_data_uri;
    use facewatch_core::types::{Expression, GenderEstimate};
    use facewatch_core::{
        BoundingBox, Descriptor, DetectedFace, Expressions, Gender,
    };
    use facewatch_hw::Frame;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub(crate) fn face_at(x: f32, y: f32, descriptor: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y,
                width: 80.0,
                height: 100.0,
                confidence: 0.9,
                landmarks: None,
            },
            landmarks: vec![(x + 20.0, y + 30.0)],
            age: 40.2,
            gender: GenderEstimate {
                gender: Gender::Female,
                probability: 0.9,
            },
            expressions: Expressions {
                scores: vec![(Expression::Happy, 0.8)],
            },
            descriptor: Descriptor::new(descriptor),
        }
    }

    pub(crate) fn png_data_uri(shade: u8) -> String {
        let img = image::GrayImage::from_pixel(4, 4, image::Luma([shade]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        encode_data_uri("image/png", out.get_ref())
    }

    /// Scripted frames; an empty script yields bright frames forever.
    pub(crate) struct FakeSource {
        pub script: VecDeque<Result<Frame, CameraError>>,
        pub resolution: (u32, u32),
    }

    impl FakeSource {
        pub(crate) fn bright(width: u32, height: u32) -> Self {
            Self {
                script: VecDeque::new(),
                resolution: (width, height),
            }
        }
    }

    impl FrameSource for FakeSource {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            let (w, h) = self.resolution;
            self.script
                .pop_front()
                .unwrap_or_else(|| Ok(Frame::new(vec![128; (w * h) as usize], w, h, 0)))
        }

        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }
    }

    /// Returns the same faces for every frame; records analyzed sizes.
    pub(crate) struct FakeAnalyzer {
        pub faces: Vec<DetectedFace>,
        pub reference: Vec<Descriptor>,
        pub analyzed: Arc<Mutex<Vec<(u32, u32)>>>,
        pub describe_calls: Arc<Mutex<usize>>,
    }

    impl FakeAnalyzer {
        pub(crate) fn new(faces: Vec<DetectedFace>, reference: Vec<Descriptor>) -> Self {
            Self {
                faces,
                reference,
                analyzed: Arc::default(),
                describe_calls: Arc::default(),
            }
        }
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn analyze(
            &mut self,
            _frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.analyzed.lock().unwrap().push((width, height));
            Ok(self.faces.clone())
        }

        fn describe(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Descriptor>, AnalyzerError> {
            *self.describe_calls.lock().unwrap() += 1;
            Ok(self.reference.clone())
        }
    }

    fn pipeline(
        source: FakeSource,
        analyzer: FakeAnalyzer,
        default: Option<ReferenceImage>,
        options: PipelineOptions,
    ) -> Pipeline<FakeSource, FakeAnalyzer> {
        let mut source = Some(source);
        let opener: SourceOpener<FakeSource> = Box::new(move || {
            source
                .take()
                .ok_or_else(|| CameraError::DeviceNotFound("fake".into()))
        });
        Pipeline::new(analyzer, ReferenceStore::new(default), opener, options)
    }

    fn no_warmup() -> PipelineOptions {
        PipelineOptions {
            warmup_frames: 0,
            ..PipelineOptions::default()
        }
    }

    fn text_lines(canvas: &Canvas) -> Vec<String> {
        canvas
            .ops
            .iter()
            .filter_map(|op| match op {
                facewatch_core::DrawOp::TextField { lines, .. } => Some(lines.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_tick_without_source() {
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![], vec![]),
            None,
            no_warmup(),
        );
        assert!(matches!(p.tick().unwrap(), TickReport::NoSource));
    }

    #[test]
    fn test_no_faces_draws_nothing() {
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![], vec![]),
            None,
            no_warmup(),
        );
        p.open_source().unwrap();
        assert!(matches!(p.tick().unwrap(), TickReport::NoFaces));
    }

    #[test]
    fn test_faces_without_reference_have_no_verdict() {
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![face_at(1.0, 1.0, vec![1.0, 0.0])], vec![]),
            None,
            no_warmup(),
        );
        p.open_source().unwrap();
        let TickReport::Faces {
            count,
            canvas,
            reference,
        } = p.tick().unwrap()
        else {
            panic!("expected faces");
        };
        assert_eq!(count, 1);
        assert!(!reference.state.has_matcher());
        assert_eq!(text_lines(&canvas), vec!["female (90%)", "40 years"]);
    }

    #[test]
    fn test_uploaded_reference_drives_verdict() {
        let analyzer = FakeAnalyzer::new(
            vec![face_at(1.0, 1.0, vec![1.0, 0.0])],
            vec![Descriptor::new(vec![1.0, 0.0])],
        );
        let describe_calls = analyzer.describe_calls.clone();
        let mut p = pipeline(FakeSource::bright(8, 8), analyzer, None, no_warmup());
        p.open_source().unwrap();

        let snapshot = p.set_reference(&png_data_uri(90)).unwrap();
        assert!(snapshot.state.has_matcher());
        assert_eq!(snapshot.generation, 1);

        for _ in 0..3 {
            let TickReport::Faces { canvas, .. } = p.tick().unwrap() else {
                panic!("expected faces");
            };
            assert!(text_lines(&canvas).contains(&"Face Recognized / Matched".to_string()));
        }
        // Matcher built once for the upload, reused across ticks.
        assert_eq!(*describe_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_bad_upload_keeps_previous_reference() {
        let default = ReferenceImage::from_data_uri(&png_data_uri(10)).unwrap();
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![], vec![Descriptor::new(vec![1.0])]),
            Some(default),
            no_warmup(),
        );
        let before = p.reference_state();
        assert!(matches!(
            p.set_reference("data:text/plain;base64,aGVsbG8="),
            Err(EngineError::Reference(_))
        ));
        assert_eq!(p.reference_state(), before);
    }

    #[test]
    fn test_restore_default_after_upload() {
        let default = ReferenceImage::from_data_uri(&png_data_uri(10)).unwrap();
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![], vec![Descriptor::new(vec![1.0])]),
            Some(default),
            no_warmup(),
        );
        p.set_reference(&png_data_uri(200)).unwrap();
        let snapshot = p.restore_default();
        assert_eq!(snapshot.generation, 2);
        assert!(matches!(
            snapshot.state,
            ReferenceState::Active {
                origin: facewatch_core::reference::ReferenceOrigin::Default,
                faces: 1
            }
        ));
    }

    #[test]
    fn test_dark_frames_skip_analysis() {
        let mut source = FakeSource::bright(4, 4);
        source.script.push_back(Ok(Frame::new(vec![0; 16], 4, 4, 0)));
        let analyzer = FakeAnalyzer::new(vec![face_at(0.0, 0.0, vec![1.0])], vec![]);
        let analyzed = analyzer.analyzed.clone();
        let mut p = pipeline(source, analyzer, None, no_warmup());
        p.open_source().unwrap();

        assert!(matches!(p.tick().unwrap(), TickReport::NoFaces));
        assert!(analyzed.lock().unwrap().is_empty());
        assert!(matches!(p.tick().unwrap(), TickReport::Faces { .. }));
    }

    #[test]
    fn test_wide_frames_are_downscaled_and_mapped_back() {
        let analyzer = FakeAnalyzer::new(vec![face_at(100.0, 50.0, vec![1.0])], vec![]);
        let analyzed = analyzer.analyzed.clone();
        let mut p = pipeline(
            FakeSource::bright(1280, 720),
            analyzer,
            None,
            no_warmup(),
        );
        p.open_source().unwrap();

        let TickReport::Faces { canvas, .. } = p.tick().unwrap() else {
            panic!("expected faces");
        };
        assert_eq!(analyzed.lock().unwrap()[0], (640, 360));
        assert_eq!((canvas.width, canvas.height), (1280, 720));
        let anchor = canvas
            .ops
            .iter()
            .find_map(|op| match op {
                facewatch_core::DrawOp::TextField { anchor, .. } => Some(*anchor),
                _ => None,
            })
            .unwrap();
        // top-right of (100, 50, 80x100) scaled by 2
        assert_eq!(anchor, (360.0, 100.0));
    }

    #[test]
    fn test_repeated_capture_failures_lose_camera() {
        let mut source = FakeSource::bright(4, 4);
        for _ in 0..3 {
            source
                .script
                .push_back(Err(CameraError::CaptureFailed("timeout".into())));
        }
        let mut p = pipeline(
            source,
            FakeAnalyzer::new(vec![], vec![]),
            None,
            PipelineOptions {
                max_capture_failures: 3,
                warmup_frames: 0,
                ..PipelineOptions::default()
            },
        );
        p.open_source().unwrap();

        assert!(matches!(p.tick().unwrap(), TickReport::NoFaces));
        assert!(matches!(p.tick().unwrap(), TickReport::NoFaces));
        let err = p.tick().unwrap_err();
        assert!(matches!(
            err,
            EngineError::CameraLost {
                failure: CameraFailure::Unknown,
                failures: 3,
                ..
            }
        ));
        assert!(!p.has_source());
        assert!(matches!(p.tick().unwrap(), TickReport::NoSource));
    }

    #[test]
    fn test_open_failure_surfaces_camera_error() {
        let mut p = pipeline(
            FakeSource::bright(4, 4),
            FakeAnalyzer::new(vec![], vec![]),
            None,
            no_warmup(),
        );
        p.open_source().unwrap();
        // The fake opener only yields one source.
        let err = p.open_source().unwrap_err();
        assert!(matches!(err, EngineError::Camera(CameraError::DeviceNotFound(_))));
        assert!(!p.has_source());
    }

    #[test]
    fn test_warmup_discards_frames() {
        let mut source = FakeSource::bright(4, 4);
        for _ in 0..2 {
            source.script.push_back(Ok(Frame::new(vec![0; 16], 4, 4, 0)));
        }
        let mut p = pipeline(
            source,
            FakeAnalyzer::new(vec![face_at(0.0, 0.0, vec![1.0])], vec![]),
            None,
            PipelineOptions {
                warmup_frames: 2,
                ..PipelineOptions::default()
            },
        );
        p.open_source().unwrap();
        // Both dark frames were consumed by warmup.
        assert!(matches!(p.tick().unwrap(), TickReport::Faces { .. }));
    }

    #[tokio::test]
    async fn test_engine_thread_round_trip() {
        let p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(vec![face_at(0.0, 0.0, vec![1.0])], vec![]),
            None,
            no_warmup(),
        );
        let engine = spawn_engine(p).unwrap();
        assert!(matches!(engine.tick().await.unwrap(), TickReport::NoSource));
        assert_eq!(engine.open_source().await.unwrap(), (8, 8));
        assert!(matches!(
            engine.tick().await.unwrap(),
            TickReport::Faces { count: 1, .. }
        ));
        assert!(matches!(
            engine.reference_state().await.unwrap().state,
            ReferenceState::Unavailable { .. }
        ));
    }

    #[test]
    fn test_ticks_carry_reference_generation() {
        let mut p = pipeline(
            FakeSource::bright(8, 8),
            FakeAnalyzer::new(
                vec![face_at(1.0, 1.0, vec![1.0, 0.0])],
                vec![Descriptor::new(vec![1.0, 0.0])],
            ),
            None,
            no_warmup(),
        );
        p.open_source().unwrap();
        let TickReport::Faces { reference, .. } = p.tick().unwrap() else {
            panic!("expected faces");
        };
        assert_eq!(reference.generation, 0);

        let uploaded = p.set_reference(&png_data_uri(90)).unwrap();
        let TickReport::Faces { reference, .. } = p.tick().unwrap() else {
            panic!("expected faces");
        };
        assert_eq!(reference, uploaded);
    }
}
