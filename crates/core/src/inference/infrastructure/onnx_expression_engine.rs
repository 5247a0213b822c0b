/// Expression-scoring engine using ONNX Runtime via `ort`.
///
/// The session lives on a dedicated worker thread; `detect_async` hands the
/// request over a channel and the worker reports through the registered
/// [`ResultListener`].
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use ndarray::Array4;

use crate::inference::domain::engine_options::EngineOptions;
use crate::inference::domain::inference_engine::{
    EngineFactory, InferenceEngine, InferenceRuntimeError, InitError, ResultListener,
};
use crate::inference::domain::inference_result::{
    Category, InferenceRequest, InferenceResult, Subject,
};
use crate::shared::constants::{BLENDSHAPE_LABELS, EXPRESSION_MODEL_NAME};
use crate::shared::frame::NormalizedFrame;
use crate::shared::model_resolver::{self, ModelResolveError};

use super::execution_provider::execution_providers_for;

/// Fallback input resolution when the model's input shape is dynamic.
const DEFAULT_INPUT_SIZE: usize = 224;

/// Builds [`OnnxExpressionEngine`]s, resolving the model asset on demand.
#[derive(Debug, Clone, Default)]
pub struct OnnxExpressionEngineFactory {
    model_url: Option<String>,
    bundled_dir: Option<PathBuf>,
}

impl OnnxExpressionEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Download location used when the model is in neither the cache nor
    /// the bundled directory.
    pub fn with_model_url(mut self, url: impl Into<String>) -> Self {
        self.model_url = Some(url.into());
        self
    }

    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(dir.into());
        self
    }

    fn model_path(&self, options: &EngineOptions) -> Result<PathBuf, InitError> {
        if let Some(ref path) = options.model_path {
            if !path.is_file() {
                return Err(InitError::MissingModel(path.display().to_string()));
            }
            return Ok(path.clone());
        }

        let progress: model_resolver::ProgressFn = Box::new(|done, total| {
            if total > 0 {
                log::debug!("Downloading {EXPRESSION_MODEL_NAME}: {done}/{total} bytes");
            }
        });
        model_resolver::resolve(
            EXPRESSION_MODEL_NAME,
            self.model_url.as_deref(),
            self.bundled_dir.as_deref(),
            Some(progress),
        )
        .map_err(|e| match e {
            ModelResolveError::NotFound(name) => InitError::MissingModel(name),
            other => InitError::MissingModel(other.to_string()),
        })
    }
}

impl EngineFactory for OnnxExpressionEngineFactory {
    fn create(
        &self,
        options: &EngineOptions,
        listener: Arc<dyn ResultListener>,
    ) -> Result<Box<dyn InferenceEngine>, InitError> {
        let providers = execution_providers_for(options.backend)?;
        let labels = match options.labels_path {
            Some(ref path) => load_labels(path)?,
            None => BLENDSHAPE_LABELS.iter().map(|l| l.to_string()).collect(),
        };
        let model_path = self.model_path(options)?;

        let session = build_session(&model_path, providers)
            .map_err(|e| InitError::Engine(format!("{}: {e}", model_path.display())))?;
        let input_size = model_input_size(&session);
        log::info!(
            "Loaded expression model {} ({input_size}x{input_size}, {} labels, backend {})",
            model_path.display(),
            labels.len(),
            options.backend
        );

        let worker = ExpressionWorker {
            session,
            input_size,
            labels,
            min_presence: options.min_presence_confidence,
            max_subjects: options.max_subjects,
            listener,
        };
        OnnxExpressionEngine::spawn(worker)
            .map(|engine| Box::new(engine) as Box<dyn InferenceEngine>)
    }
}

fn build_session(
    model_path: &Path,
    providers: Vec<ort::execution_providers::ExecutionProviderDispatch>,
) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = ort::session::Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_inter_threads(1)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(providers)?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Square input resolution read from the model's NCHW input shape.
fn model_input_size(session: &ort::session::Session) -> usize {
    session
        .inputs()
        .first()
        .and_then(|input| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                if shape.len() >= 4 && shape[2] > 0 {
                    Some(shape[2] as usize)
                } else {
                    None
                }
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_INPUT_SIZE)
}

/// Engine handle owned by the inference gate.
pub struct OnnxExpressionEngine {
    requests: Option<Sender<InferenceRequest>>,
}

impl OnnxExpressionEngine {
    fn spawn(worker: ExpressionWorker) -> Result<Self, InitError> {
        let (tx, rx) = crossbeam_channel::unbounded::<InferenceRequest>();
        // Detached: the thread ends once the request sender is dropped.
        std::thread::Builder::new()
            .name("browtap-inference".into())
            .spawn(move || {
                let mut worker = worker;
                for request in rx {
                    worker.handle(request);
                }
                log::debug!("Inference worker exiting");
            })
            .map_err(|e| InitError::Engine(format!("failed to spawn inference worker: {e}")))?;

        Ok(Self { requests: Some(tx) })
    }
}

impl InferenceEngine for OnnxExpressionEngine {
    fn detect_async(&mut self, request: InferenceRequest) -> Result<(), InferenceRuntimeError> {
        let id = request.id;
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| InferenceRuntimeError::new(id, "engine closed"))?;
        tx.send(request)
            .map_err(|_| InferenceRuntimeError::new(id, "inference worker stopped"))
    }

    fn close(&mut self) {
        // The worker drains a running request, reports it, then exits.
        self.requests = None;
    }
}

impl Drop for OnnxExpressionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

struct ExpressionWorker {
    session: ort::session::Session,
    input_size: usize,
    labels: Vec<String>,
    min_presence: f32,
    max_subjects: usize,
    listener: Arc<dyn ResultListener>,
}

impl ExpressionWorker {
    fn handle(&mut self, request: InferenceRequest) {
        match self.infer(&request) {
            Ok(subjects) => self
                .listener
                .on_result(InferenceResult::with_subjects(&request, subjects)),
            Err(e) => self
                .listener
                .on_error(InferenceRuntimeError::new(request.id, e.to_string())),
        }
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<Subject>, Box<dyn std::error::Error>> {
        let input_tensor = to_input_tensor(&request.frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("expression model produced no outputs".into());
        }

        let scores = outputs[0].try_extract_array::<f32>()?;
        let (rows, width) = match scores.shape() {
            &[n] => (1, n),
            &[rows, n] => (rows, n),
            &[1, rows, n] => (rows, n),
            other => return Err(format!("unexpected score shape: {other:?}").into()),
        };
        let flat: Vec<f32> = scores.iter().copied().collect();

        let presence: Option<Vec<f32>> = if outputs.len() > 1 {
            Some(outputs[1].try_extract_array::<f32>()?.iter().copied().collect())
        } else {
            None
        };

        let layout = ScoreLayout { rows, width };
        Ok(collect_subjects(
            &flat,
            layout,
            presence.as_deref(),
            &self.labels,
            self.min_presence,
            self.max_subjects,
        ))
    }
}

/// Nearest-neighbour resize of an upright RGB frame into a `[1, 3, S, S]`
/// tensor with values in [0, 1].
fn to_input_tensor(frame: &NormalizedFrame, size: usize) -> Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    if src_h == 0 || src_w == 0 {
        return tensor;
    }

    for y in 0..size {
        let src_y = (y * src_h / size).min(src_h - 1);
        for x in 0..size {
            let src_x = (x * src_w / size).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }
    tensor
}

#[derive(Debug, Clone, Copy)]
struct ScoreLayout {
    rows: usize,
    width: usize,
}

/// Turns raw model output into subjects, one per score row.
///
/// Rows whose presence score falls below `min_presence` are dropped. Logits
/// are squashed with a sigmoid when any value falls outside [0, 1].
fn collect_subjects(
    flat: &[f32],
    layout: ScoreLayout,
    presence: Option<&[f32]>,
    labels: &[String],
    min_presence: f32,
    max_subjects: usize,
) -> Vec<Subject> {
    if layout.width == 0 {
        return Vec::new();
    }
    let logits = flat.iter().any(|v| !(0.0..=1.0).contains(v));

    flat.chunks(layout.width)
        .take(layout.rows)
        .enumerate()
        .filter(|(row, _)| match presence.and_then(|p| p.get(*row)) {
            Some(&p) => unit_score(p, !(0.0..=1.0).contains(&p)) >= min_presence,
            None => true,
        })
        .take(max_subjects)
        .map(|(_, row)| Subject {
            categories: row
                .iter()
                .enumerate()
                .map(|(i, &raw)| {
                    let name = labels
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("category_{i}"));
                    Category::new(name, unit_score(raw, logits))
                })
                .collect(),
        })
        .collect()
}

fn unit_score(raw: f32, is_logit: bool) -> f32 {
    if is_logit {
        1.0 / (1.0 + (-raw).exp())
    } else {
        raw
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>, InitError> {
    let text = fs::read_to_string(path).map_err(|e| {
        InitError::InvalidOptions(format!("cannot read labels {}: {e}", path.display()))
    })?;
    let labels = parse_labels(&text);
    if labels.is_empty() {
        return Err(InitError::InvalidOptions(format!(
            "labels file {} is empty",
            path.display()
        )));
    }
    Ok(labels)
}

fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
