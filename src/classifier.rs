use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use ndarray::Array1;
use tokio::sync::OnceCell;
use tokio::task;

use crate::error::ClassifierError;
use crate::labels::LabelSet;
use crate::model::{ModelKind, OnnxScorer, Scorer};
use crate::postprocess;
use crate::preprocess::{PreprocessConfig, Processor};

/// Construction seam for the scorer. Production code loads an ONNX session;
/// tests inject counting or failing mocks.
pub type ScorerFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Scorer>> + Send + Sync>;

/// Startup configuration for the classification service. Read once,
/// immutable thereafter.
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    pub model: ModelKind,
    /// "cpu" or "cuda"; auto-detected when unset.
    pub device: Option<String>,
    /// Local ONNX weights; resolved through the cache dir when unset.
    pub weights: Option<PathBuf>,
    /// Ordered class label list, one label per line.
    pub labels: Option<PathBuf>,
}

/// A single ranked prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Image classification service owning a lazily-initialized scorer.
///
/// The scorer is constructed at most once per service instance, on the first
/// prediction or an explicit [`warm_up`](Self::warm_up), even under
/// concurrent calls. A failed construction leaves the cell empty, so the
/// next request re-attempts the load.
pub struct ImageClassifier {
    labels: LabelSet,
    processor: Processor,
    scorer: OnceCell<Arc<dyn Scorer>>,
    factory: ScorerFactory,
}

impl ImageClassifier {
    /// Creates a service that loads the configured ONNX model on first use.
    pub fn new(config: ClassifierConfig) -> Self {
        let labels = LabelSet::resolve(config.labels.as_deref());
        let factory: ScorerFactory = Arc::new(move || {
            let scorer = OnnxScorer::load(
                config.model,
                config.device.as_deref(),
                config.weights.as_deref(),
            )?;
            Ok(Arc::new(scorer) as Arc<dyn Scorer>)
        });
        Self::with_scorer_factory(labels, factory)
    }

    /// Creates a service with an explicit label set and scorer factory.
    pub fn with_scorer_factory(labels: LabelSet, factory: ScorerFactory) -> Self {
        Self {
            labels,
            processor: Processor::new(PreprocessConfig::default()),
            scorer: OnceCell::new(),
            factory,
        }
    }

    /// True iff the scorer has completed loading.
    pub fn is_ready(&self) -> bool {
        self.scorer.initialized()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Forces scorer construction without running a prediction.
    pub async fn warm_up(&self) -> Result<(), ClassifierError> {
        self.ensure_loaded().await.map(|_| ())
    }

    /// Classifies `image`, returning the `top_k` most probable classes in
    /// descending confidence order.
    pub async fn predict(
        &self,
        image: &DynamicImage,
        top_k: usize,
    ) -> Result<Vec<Prediction>, ClassifierError> {
        if top_k < 1 || top_k > self.labels.len() {
            return Err(ClassifierError::InvalidArgument(format!(
                "top_k must be between 1 and {}, got {top_k}",
                self.labels.len()
            )));
        }

        let scorer = Arc::clone(self.ensure_loaded().await?);
        let tensor = self.processor.transform(image)?;

        // The forward pass is compute-bound and may block; keep it off the
        // async executor.
        let logits = task::spawn_blocking(move || scorer.score(&tensor))
            .await
            .map_err(|e| ClassifierError::Prediction(anyhow::anyhow!("inference task failed: {e}")))?
            .map_err(ClassifierError::Prediction)?;

        self.rank(&logits, top_k)
    }

    fn rank(&self, logits: &Array1<f32>, top_k: usize) -> Result<Vec<Prediction>, ClassifierError> {
        if logits.len() != self.labels.len() {
            return Err(ClassifierError::Prediction(anyhow::anyhow!(
                "scorer produced {} scores for {} labels",
                logits.len(),
                self.labels.len()
            )));
        }

        let probabilities = postprocess::softmax(logits);
        let predictions = postprocess::top_k(&probabilities, top_k)
            .into_iter()
            .map(|(index, confidence)| Prediction {
                label: match self.labels.get(index) {
                    Some(name) => name.to_string(),
                    None => format!("class_{index}"),
                },
                confidence,
            })
            .collect();

        Ok(predictions)
    }

    /// At-most-once scorer construction. Concurrent callers block on the
    /// cell; exactly one runs the factory, the rest observe the finished
    /// scorer. Loading may hit disk or network, so it runs on the blocking
    /// pool.
    async fn ensure_loaded(&self) -> Result<&Arc<dyn Scorer>, ClassifierError> {
        self.scorer
            .get_or_try_init(|| async {
                tracing::info!("loading model...");
                let factory = Arc::clone(&self.factory);
                let scorer = task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| {
                        ClassifierError::Initialization(anyhow::anyhow!("load task failed: {e}"))
                    })?
                    .map_err(ClassifierError::Initialization)?;
                tracing::info!("model loaded successfully");
                Ok(scorer)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    struct FixedScorer {
        logits: Vec<f32>,
    }

    impl Scorer for FixedScorer {
        fn score(&self, _input: &ndarray::Array4<f32>) -> anyhow::Result<Array1<f32>> {
            Ok(Array1::from_vec(self.logits.clone()))
        }
    }

    struct FailingScorer;

    impl Scorer for FailingScorer {
        fn score(&self, _input: &ndarray::Array4<f32>) -> anyhow::Result<Array1<f32>> {
            anyhow::bail!("device out of memory")
        }
    }

    fn counting_classifier(
        num_classes: usize,
        logits: Vec<f32>,
    ) -> (ImageClassifier, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let factory: ScorerFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedScorer { logits: logits.clone() }) as Arc<dyn Scorer>)
        });
        (
            ImageClassifier::with_scorer_factory(LabelSet::synthetic(num_classes), factory),
            loads,
        )
    }

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([180, 40, 40])))
    }

    #[tokio::test]
    async fn predict_returns_exactly_top_k_predictions() {
        let (classifier, _) = counting_classifier(10, (0..10).map(|i| i as f32).collect());
        for k in [1, 3, 10] {
            let predictions = classifier.predict(&test_image(), k).await.unwrap();
            assert_eq!(predictions.len(), k);
        }
    }

    #[tokio::test]
    async fn predict_handles_large_images_with_max_top_k() {
        let (classifier, _) = counting_classifier(1000, (0..1000).map(|i| i as f32 / 100.0).collect());
        let large = DynamicImage::ImageRgb8(RgbImage::from_pixel(1000, 1000, Rgb([1, 2, 3])));
        let predictions = classifier.predict(&large, 10).await.unwrap();
        assert_eq!(predictions.len(), 10);
    }

    #[tokio::test]
    async fn predict_rejects_out_of_range_top_k() {
        let (classifier, loads) = counting_classifier(10, vec![0.0; 10]);

        for k in [0, 11] {
            let err = classifier.predict(&test_image(), k).await.unwrap_err();
            assert!(matches!(err, ClassifierError::InvalidArgument(_)), "k={k}");
        }
        // Validation happens before any model work.
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn predictions_are_descending_and_in_unit_interval() {
        let (classifier, _) =
            counting_classifier(6, vec![0.3, 2.5, -1.0, 2.5, 0.0, 1.1]);
        let predictions = classifier.predict(&test_image(), 6).await.unwrap();

        for pair in predictions.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        for p in &predictions {
            assert!((0.0..=1.0).contains(&p.confidence));
        }

        let total: f32 = predictions.iter().map(|p| p.confidence).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn equal_logits_rank_lower_index_first() {
        let (classifier, _) = counting_classifier(4, vec![1.0; 4]);
        let predictions = classifier.predict(&test_image(), 4).await.unwrap();
        let labels: Vec<&str> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["class_0", "class_1", "class_2", "class_3"]);
    }

    #[tokio::test]
    async fn repeated_predictions_are_identical() {
        let (classifier, _) = counting_classifier(8, vec![0.1, 0.9, 0.4, 0.7, 0.2, 0.6, 0.3, 0.8]);
        let first = classifier.predict(&test_image(), 5).await.unwrap();
        let second = classifier.predict(&test_image(), 5).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn scorer_loads_lazily_and_only_once() {
        let (classifier, loads) = counting_classifier(5, vec![0.0; 5]);

        assert!(!classifier.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        classifier.predict(&test_image(), 1).await.unwrap();
        assert!(classifier.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        classifier.predict(&test_image(), 1).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_up_constructs_the_scorer() {
        let (classifier, loads) = counting_classifier(5, vec![0.0; 5]);
        classifier.warm_up().await.unwrap();
        assert!(classifier.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_predictions_construct_the_scorer_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let factory: ScorerFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // Slow construction widens the race window.
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(FixedScorer { logits: vec![0.5; 5] }) as Arc<dyn Scorer>)
        });
        let classifier = Arc::new(ImageClassifier::with_scorer_factory(
            LabelSet::synthetic(5),
            factory,
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let classifier = Arc::clone(&classifier);
            handles.push(tokio::spawn(async move {
                classifier.predict(&test_image(), 3).await
            }));
        }
        for handle in handles {
            let predictions = handle.await.unwrap().unwrap();
            assert_eq!(predictions.len(), 3);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_construction_is_retried_on_the_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let factory: ScorerFactory = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("weights missing")
            }
            Ok(Arc::new(FixedScorer { logits: vec![0.5; 5] }) as Arc<dyn Scorer>)
        });
        let classifier =
            ImageClassifier::with_scorer_factory(LabelSet::synthetic(5), factory);

        let err = classifier.predict(&test_image(), 1).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Initialization(_)));
        assert!(!classifier.is_ready());

        classifier.predict(&test_image(), 1).await.unwrap();
        assert!(classifier.is_ready());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scoring_failure_surfaces_as_prediction_error() {
        let factory: ScorerFactory =
            Arc::new(|| Ok(Arc::new(FailingScorer) as Arc<dyn Scorer>));
        let classifier =
            ImageClassifier::with_scorer_factory(LabelSet::synthetic(5), factory);

        let err = classifier.predict(&test_image(), 1).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Prediction(_)));
        // A forward-pass failure does not invalidate the loaded scorer.
        assert!(classifier.is_ready());
    }

    #[tokio::test]
    async fn label_mismatch_surfaces_as_prediction_error() {
        let factory: ScorerFactory = Arc::new(|| {
            Ok(Arc::new(FixedScorer { logits: vec![0.5; 10] }) as Arc<dyn Scorer>)
        });
        let classifier =
            ImageClassifier::with_scorer_factory(LabelSet::synthetic(1000), factory);

        let err = classifier.predict(&test_image(), 5).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Prediction(_)));
    }
}
