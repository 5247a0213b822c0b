use ort::execution_providers::ExecutionProviderDispatch;

use crate::inference::domain::engine_options::ComputeBackend;
use crate::inference::domain::inference_engine::InitError;

/// Return the preferred ONNX execution providers for the current platform.
///
/// ONNX Runtime falls back to CPU for any node the provider cannot run.
pub fn preferred_execution_providers() -> Vec<ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Providers to register for `backend`. An empty list means plain CPU.
pub fn execution_providers_for(
    backend: ComputeBackend,
) -> Result<Vec<ExecutionProviderDispatch>, InitError> {
    match backend {
        ComputeBackend::Cpu => Ok(Vec::new()),
        ComputeBackend::Accelerated => {
            let providers = preferred_execution_providers();
            if providers.is_empty() {
                return Err(InitError::UnsupportedBackend(format!(
                    "no accelerated execution provider on {}",
                    std::env::consts::OS
                )));
            }
            Ok(providers)
        }
    }
}
