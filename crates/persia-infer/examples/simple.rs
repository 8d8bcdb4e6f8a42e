use std::process::ExitCode;
use std::time::Duration;

use persia_infer::directory::EnvDirectory;
use persia_infer::{
    DenseFeature, InferenceAdapter, PersiaBatch, RequestEnvelope, SparseFeature, StartupContext,
};

/// Usage: `PERSIA_MIDDLEWARE_ADDRS=host:port cargo run --example simple -- <model folder or repo>`
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let model_source = std::env::args().nth(1).unwrap_or_else(|| "./model".to_string());
    let mut context = StartupContext::new(model_source);
    context.readiness.timeout = Duration::from_secs(30);

    let adapter = InferenceAdapter::initialize(&context, &EnvDirectory::default()).await?;

    let batch = PersiaBatch::new()
        .add_dense(DenseFeature::new(vec![0.1, 0.2, 0.3, 0.4], 2))
        .add_sparse(SparseFeature::new("user_id", vec![vec![17], vec![42, 7]]));

    let prediction = adapter
        .handle(&[RequestEnvelope::from_batch(batch.to_bytes()?)])
        .await?;
    println!("Prediction: {:?}", prediction);

    Ok(ExitCode::SUCCESS)
}
