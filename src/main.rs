use std::sync::Arc;

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use classifier_rs::{Args, AppState, ClassifierConfig, ImageClassifier, ModelKind, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();
    let model = ModelKind::from_name(&args.model);
    info!(
        model = model.name(),
        description = model.description(),
        device = args.device.as_deref().unwrap_or("auto-detect"),
        "starting classification API"
    );

    let config = ClassifierConfig {
        model,
        device: args.device.clone(),
        weights: args.weights.clone(),
        labels: args.labels.clone(),
    };
    let state = Arc::new(AppState {
        classifier: ImageClassifier::new(config),
    });

    if args.warm_up {
        if let Err(e) = state.classifier.warm_up().await {
            warn!(error = %e, "warm-up failed, the load will be retried on the first request");
        }
    }

    let app = router(Arc::clone(&state), args.body_limit);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
