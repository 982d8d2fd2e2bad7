//! The engine thread.
//!
//! One dedicated OS thread exclusively owns the detector, the recognizer,
//! the gallery, the model store and the live in-memory model. Requests
//! arrive over an mpsc channel and are answered over oneshot channels, so
//! training and recognition are strictly serialized: a recognition can never
//! observe a half-swapped model, and the artifact on disk is only ever
//! replaced atomically after a training pass fully succeeds.

use crate::config::{Backend, Config};
use badger_core::detector::{FaceDetector, OnnxFaceDetector};
use badger_core::gallery::GalleryError;
use badger_core::matcher::MatchError;
use badger_core::mock::{MockFaceDetector, MockRecognizer};
use badger_core::model::ModelStoreError;
use badger_core::recognizer::{OnnxRecognizer, Recognizer};
use badger_core::trainer::{self, TrainError, TrainingReport};
use badger_core::types::DecodeError;
use badger_core::{
    decode_grayscale, EmployeeId, GalleryStore, MatchDecision, Matcher, ModelStore,
    RecognitionModel,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] ModelStoreError),
    #[error("no trained model available yet")]
    ModelNotTrained,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Engine view reported by the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub model_classes: usize,
    pub enrolled_identities: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        id: EmployeeId,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<TrainingReport, EngineError>>,
    },
    TrainAll {
        reply: oneshot::Sender<Result<TrainingReport, EngineError>>,
    },
    TrainOne {
        id: EmployeeId,
        reply: oneshot::Sender<Result<TrainingReport, EngineError>>,
    },
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<MatchDecision, EngineError>>,
    },
    ListGallery {
        reply: oneshot::Sender<Result<Vec<(EmployeeId, usize)>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Persist a reference photo (replace semantics) and retrain.
    pub async fn enroll(&self, id: EmployeeId, image: Vec<u8>) -> Result<TrainingReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll { id, image, reply })
            .await
    }

    /// Rebuild the model from the full gallery.
    pub async fn train_all(&self) -> Result<TrainingReport, EngineError> {
        self.request(|reply| EngineRequest::TrainAll { reply }).await
    }

    /// Retrain triggered for one identity (full-gallery rebuild after an
    /// existence check).
    pub async fn train_one(&self, id: EmployeeId) -> Result<TrainingReport, EngineError> {
        self.request(|reply| EngineRequest::TrainOne { id, reply })
            .await
    }

    /// Score a probe photo against the current model.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<MatchDecision, EngineError> {
        self.request(|reply| EngineRequest::Recognize { image, reply })
            .await
    }

    /// Enrolled identities with their photo counts.
    pub async fn list_gallery(&self) -> Result<Vec<(EmployeeId, usize)>, EngineError> {
        self.request(|reply| EngineRequest::ListGallery { reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Everything the engine thread owns.
pub struct EngineParts {
    pub detector: Box<dyn FaceDetector + Send>,
    pub recognizer: Box<dyn Recognizer + Send>,
    pub gallery: GalleryStore,
    pub store: ModelStore,
    pub matcher: Matcher,
}

/// Build the configured backend and spawn the engine.
pub fn spawn_from_config(config: &Config) -> anyhow::Result<EngineHandle> {
    let (detector, recognizer): (Box<dyn FaceDetector + Send>, Box<dyn Recognizer + Send>) =
        match config.backend {
            Backend::Onnx => (
                Box::new(OnnxFaceDetector::load(&config.detector_model_path)?),
                Box::new(OnnxRecognizer::load(&config.embedding_model_path)?),
            ),
            Backend::Mock => {
                tracing::warn!("running with the mock backend; matches are not biometric");
                (Box::new(MockFaceDetector), Box::new(MockRecognizer))
            }
        };

    let parts = EngineParts {
        detector,
        recognizer,
        gallery: GalleryStore::new(config.photo_root.clone()),
        store: ModelStore::new(config.model_path.clone()),
        matcher: config.matcher(),
    };
    Ok(spawn(parts)?)
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the persisted artifact if one exists; otherwise attempts one
/// training pass so a freshly seeded gallery is usable at boot. A failed
/// boot training is logged, never fatal.
pub fn spawn(parts: EngineParts) -> Result<EngineHandle, EngineError> {
    let EngineParts {
        mut detector,
        mut recognizer,
        gallery,
        store,
        matcher,
    } = parts;

    let mut model = store.load()?;
    if let Some(loaded) = &model {
        tracing::info!(
            path = %store.path().display(),
            classes = loaded.class_count(),
            "loaded trained model"
        );
    } else {
        match trainer::train_all(&gallery, recognizer.as_mut()) {
            Ok((trained, report)) => {
                store.replace(&trained)?;
                tracing::info!(
                    images = report.images,
                    identities = report.identities,
                    "initial model trained"
                );
                model = Some(trained);
            }
            Err(TrainError::EmptyTrainingSet) => {
                tracing::info!("gallery is empty; starting without a trained model");
            }
            Err(err) => {
                tracing::warn!(error = %err, "initial training failed; starting without a model");
            }
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("badger-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { id, image, reply } => {
                        let result = run_enroll(
                            &gallery,
                            &store,
                            recognizer.as_mut(),
                            &mut model,
                            id,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::TrainAll { reply } => {
                        let result = run_retrain(&gallery, &store, recognizer.as_mut(), &mut model, None);
                        let _ = reply.send(result);
                    }
                    EngineRequest::TrainOne { id, reply } => {
                        let result =
                            run_retrain(&gallery, &store, recognizer.as_mut(), &mut model, Some(id));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let result = run_recognize(
                            &matcher,
                            detector.as_mut(),
                            recognizer.as_mut(),
                            model.as_ref(),
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::ListGallery { reply } => {
                        let result = gallery
                            .enumerate_all()
                            .map(|all| {
                                all.into_iter()
                                    .map(|(id, photos)| (id, photos.len()))
                                    .collect()
                            })
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let result = gallery.enumerate_all().map_err(EngineError::from).map(
                            |all| EngineStatus {
                                model_loaded: model.is_some(),
                                model_classes: model.as_ref().map_or(0, |m| m.class_count()),
                                enrolled_identities: all.len(),
                            },
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn run_enroll(
    gallery: &GalleryStore,
    store: &ModelStore,
    recognizer: &mut dyn Recognizer,
    model: &mut Option<RecognitionModel>,
    id: EmployeeId,
    image: &[u8],
) -> Result<TrainingReport, EngineError> {
    gallery.enroll(id, image)?;
    run_retrain(gallery, store, recognizer, model, None)
}

/// One training pass; the in-memory model and the artifact are only swapped
/// after the pass fully succeeds.
fn run_retrain(
    gallery: &GalleryStore,
    store: &ModelStore,
    recognizer: &mut dyn Recognizer,
    model: &mut Option<RecognitionModel>,
    scope: Option<EmployeeId>,
) -> Result<TrainingReport, EngineError> {
    let (trained, report) = match scope {
        Some(id) => trainer::train_one(gallery, id, recognizer)?,
        None => trainer::train_all(gallery, recognizer)?,
    };
    store.replace(&trained)?;
    *model = Some(trained);
    Ok(report)
}

fn run_recognize(
    matcher: &Matcher,
    detector: &mut dyn FaceDetector,
    recognizer: &mut dyn Recognizer,
    model: Option<&RecognitionModel>,
    image: &[u8],
) -> Result<MatchDecision, EngineError> {
    let probe = decode_grayscale(image)?;
    let model = model.ok_or(EngineError::ModelNotTrained)?;
    Ok(matcher.identify(&probe, model, detector, recognizer)?)
}
