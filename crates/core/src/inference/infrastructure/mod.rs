pub mod execution_provider;
pub mod onnx_expression_engine;
