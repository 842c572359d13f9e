use std::path::Path;

use anyhow::{Context, bail};
use inference_common::class_names::ClassNames;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;

/// Metadata key Ultralytics exports write the class table under.
const NAMES_METADATA_KEY: &str = "names";

/// Loads an onnx model into an ort session on the cpu, or on cuda if asked.
///
/// Cuda may silently fall back to cpu if the provider is unavailable.
pub fn build_session(model_path: &Path, cuda: bool) -> anyhow::Result<Session> {
    if !model_path.is_file() {
        bail!("model file {model_path:?} not found");
    }

    let (ep, ep_name) = if cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };

    let session = Session::builder()?
        .with_execution_providers([ep])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load model {model_path:?}"))?;
    log::debug!("{session:?}");

    log::info!("Prepared ort {ep_name} session with model: {model_path:?}");
    Ok(session)
}

/// Class names embedded in the model metadata, if the exporter wrote any.
pub fn class_names_from_session(session: &Session) -> anyhow::Result<Option<ClassNames>> {
    let metadata = session.metadata()?;
    let Some(raw) = metadata.custom(NAMES_METADATA_KEY)? else {
        return Ok(None);
    };
    let names = ClassNames::from_metadata(&raw).context("failed to parse model class names")?;
    Ok(Some(names))
}
