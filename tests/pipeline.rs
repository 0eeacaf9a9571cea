use approx::assert_abs_diff_eq;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs;
use std::sync::Arc;
use tempfile::{NamedTempFile, tempdir};

use pyrexia::encode::EncodingError;
use pyrexia::explain::{
    ExplainError, Explainer, Explanation, LinearExplainer, OutputScale, SamplingExplainer,
};
use pyrexia::model::{Classifier, LogisticModel, ModelService, Standardization};
use pyrexia::pipeline::{ErrorCategory, ExplanationOutcome, PipelineError, RiskPipeline};
use pyrexia::risk::RiskTier;
use pyrexia::schema::{FEATURE_COUNT, FEATURE_SCHEMA, FeatureKind, reference_pool};
use pyrexia::types::{PatientInput, RawValue};

/// A plausible fitted model: fever risk rises with operative time, stone
/// burden, hydronephrosis and positive urine leukocytes.
fn fitted_model() -> LogisticModel {
    let coefficients = vec![
        -0.35, 0.12, 0.45, 0.10, -0.20, 0.08, -0.05, 0.30, 0.06, 0.10, 0.55, 0.80, -0.25, 0.40,
        0.35,
    ];
    let mut mean = vec![0.0; FEATURE_COUNT];
    let mut scale = vec![1.0; FEATURE_COUNT];
    for (idx, spec) in FEATURE_SCHEMA.iter().enumerate() {
        if let FeatureKind::Numeric { min, max, default } = spec.kind {
            mean[idx] = default;
            scale[idx] = (max - min) / 4.0;
        }
    }
    let mut model = LogisticModel::new(-1.6, coefficients);
    model.description = Some("integration test model".to_string());
    model.standardization = Some(Standardization { mean, scale });
    model.background = reference_pool();
    model
}

fn write_model(model: &LogisticModel) -> NamedTempFile {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    model.save(file.path()).expect("Failed to save model");
    file
}

fn random_patient(rng: &mut StdRng) -> PatientInput {
    let mut input = PatientInput::new();
    for spec in &FEATURE_SCHEMA {
        match spec.kind {
            FeatureKind::Numeric { min, max, .. } => {
                input.set(spec.name, RawValue::Number(rng.gen_range(min..=max)))
            }
            FeatureKind::Categorical { options, .. } => {
                let option = options.choose(rng).expect("options are never empty");
                input.set(spec.name, option.option)
            }
        }
    }
    input
}

#[test]
fn defaults_assessment_from_a_saved_artifact() {
    let file = write_model(&fitted_model());
    let pipeline = RiskPipeline::new(
        Arc::new(ModelService::new(file.path())),
        Box::new(SamplingExplainer::default()),
    );

    let input = PatientInput::defaults();
    let assessment = pipeline.assess(&input).expect("defaults must assess");

    // All numeric fields sit at the standardisation mean; only the active
    // categorical codes move the linear predictor.
    let eta: f64 = -1.6 + 0.10 * 1.0 - 0.25 * 1.0;
    assert_abs_diff_eq!(
        assessment.prediction.probability,
        1.0 / (1.0 + (-eta).exp()),
        epsilon = 1e-9
    );
    assert_eq!(assessment.prediction.tier, RiskTier::Low);

    let explanation = assessment
        .explanation
        .explanation()
        .expect("explanation should be available");
    assert_eq!(explanation.scale, OutputScale::Probability);
    assert_eq!(explanation.background_size, 5);
    assert!(explanation.additivity_gap() < 1e-3);

    let again = pipeline.assess(&input).expect("second assessment");
    assert_eq!(again, assessment);
}

#[test]
fn sampling_attributions_add_up_for_random_patients() {
    let model = fitted_model();
    let pipeline = RiskPipeline::new(
        Arc::new(ModelService::preloaded(model)),
        Box::new(SamplingExplainer::new(5, 16, 3)),
    );
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..12 {
        let input = random_patient(&mut rng);
        assert!(input.validate().is_ok(), "{input:?}");
        let assessment = pipeline.assess(&input).expect("random patient must assess");
        let explanation = assessment.explanation.explanation().expect("explanation");
        assert_abs_diff_eq!(
            explanation.output,
            assessment.prediction.probability,
            epsilon = 1e-12
        );
        assert!(
            explanation.additivity_gap() < 1e-3,
            "gap {} for {:?}",
            explanation.additivity_gap(),
            input
        );
    }
}

#[test]
fn linear_attributions_are_exact_in_log_odds() {
    let model = fitted_model();
    let pipeline = RiskPipeline::new(
        Arc::new(ModelService::preloaded(model.clone())),
        Box::new(LinearExplainer),
    );
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..10 {
        let assessment = pipeline
            .assess(&random_patient(&mut rng))
            .expect("random patient must assess");
        let explanation = assessment.explanation.explanation().expect("explanation");
        assert_eq!(explanation.scale, OutputScale::LogOdds);
        assert_abs_diff_eq!(
            explanation.output,
            model.log_odds(assessment.features.as_view()).unwrap(),
            epsilon = 1e-9
        );
        assert!(explanation.additivity_gap() < 1e-9);
    }
}

#[test]
fn more_hydronephrosis_never_lowers_the_risk() {
    let pipeline =
        RiskPipeline::without_explanations(Arc::new(ModelService::preloaded(fitted_model())));
    let probabilities: Vec<f64> = ["None", "Mild", "Moderate", "Severe"]
        .iter()
        .map(|grade| {
            pipeline
                .assess(&PatientInput::defaults().with("degree_of_hydronephrosis", *grade))
                .unwrap()
                .prediction
                .probability
        })
        .collect();
    for pair in probabilities.windows(2) {
        assert!(pair[0] < pair[1], "{probabilities:?}");
    }
}

#[test]
fn missing_or_corrupt_artifacts_are_unavailable() {
    let dir = tempdir().expect("temporary directory");
    let missing = RiskPipeline::without_explanations(Arc::new(ModelService::new(
        dir.path().join("absent.toml"),
    )));
    let err = missing.assess(&PatientInput::defaults()).unwrap_err();
    assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    assert_eq!(err.category(), ErrorCategory::PredictionUnavailable);

    let corrupt_path = dir.path().join("corrupt.toml");
    fs::write(&corrupt_path, "intercept = \"not a number\"\n").unwrap();
    let corrupt = RiskPipeline::without_explanations(Arc::new(ModelService::new(&corrupt_path)));
    assert!(matches!(
        corrupt.assess(&PatientInput::defaults()),
        Err(PipelineError::ModelUnavailable(_))
    ));
}

#[test]
fn missing_model_is_reported_before_the_input_is_encoded() {
    let dir = tempdir().expect("temporary directory");
    let pipeline = RiskPipeline::new(
        Arc::new(ModelService::new(dir.path().join("absent.toml"))),
        Box::new(SamplingExplainer::default()),
    );
    let input = PatientInput::defaults().with("Sex", "Other");

    let err = pipeline.assess(&input).unwrap_err();
    assert!(matches!(err, PipelineError::ModelUnavailable(_)), "{err:?}");
    assert_eq!(err.category(), ErrorCategory::PredictionUnavailable);

    fitted_model().save(&dir.path().join("absent.toml")).unwrap();
    assert!(matches!(
        pipeline.assess(&input),
        Err(PipelineError::Encoding(EncodingError::UnknownOption { .. }))
    ));
}

#[test]
fn model_dropped_in_after_a_failed_load_is_picked_up() {
    let dir = tempdir().expect("temporary directory");
    let path = dir.path().join("model.toml");
    let service = Arc::new(ModelService::new(&path));
    let pipeline = RiskPipeline::without_explanations(Arc::clone(&service));

    assert!(pipeline.assess(&PatientInput::defaults()).is_err());
    fitted_model().save(&path).unwrap();
    assert!(pipeline.assess(&PatientInput::defaults()).is_ok());
    assert!(service.is_loaded());
}

#[test]
fn a_fourteen_feature_artifact_is_a_shape_mismatch() {
    let mut model = fitted_model();
    model.feature_names.pop();
    model.coefficients.pop();
    model.standardization = None;
    model.background.clear();
    let file = write_model(&model);

    let pipeline = RiskPipeline::without_explanations(Arc::new(ModelService::new(file.path())));
    let err = pipeline.assess(&PatientInput::defaults()).unwrap_err();
    assert!(matches!(err, PipelineError::ShapeMismatch(_)), "{err:?}");
    assert_eq!(err.category(), ErrorCategory::InternalConfiguration);
}

#[test]
fn invalid_options_fail_encoding() {
    let pipeline =
        RiskPipeline::without_explanations(Arc::new(ModelService::preloaded(fitted_model())));
    let err = pipeline
        .assess(&PatientInput::defaults().with("Channel_size", "22F"))
        .unwrap_err();
    match err {
        PipelineError::Encoding(EncodingError::UnknownOption { field, allowed, .. }) => {
            assert_eq!(field, "Channel_size");
            assert_eq!(allowed, "18F, 20F");
        }
        other => panic!("Expected UnknownOption, got {other:?}"),
    }
}

#[test]
fn out_of_range_values_still_score_in_the_core() {
    let pipeline =
        RiskPipeline::without_explanations(Arc::new(ModelService::preloaded(fitted_model())));
    let input = PatientInput::defaults().with("Operative_time", 500.0);
    assert!(matches!(
        input.validate(),
        Err(EncodingError::OutOfRange { .. })
    ));
    let assessment = pipeline.assess(&input).expect("the core does not clamp");
    assert_eq!(assessment.features[2], 500.0);
}

struct Unstable;

impl Explainer for Unstable {
    fn name(&self) -> &'static str {
        "unstable"
    }

    fn explain(
        &self,
        _: &dyn Classifier,
        _: ArrayView2<f64>,
        _: ArrayView1<f64>,
    ) -> Result<Explanation, ExplainError> {
        Err(ExplainError::NumericalInstability(
            "background covariance is singular".to_string(),
        ))
    }
}

#[test]
fn explanation_failures_degrade_gracefully() {
    let models = Arc::new(ModelService::preloaded(fitted_model()));
    let plain = RiskPipeline::without_explanations(Arc::clone(&models));
    let failing = RiskPipeline::new(models, Box::new(Unstable));

    let input = PatientInput::defaults().with("UrineLeuk_bin", ">0");
    let expected = plain.assess(&input).unwrap();
    let degraded = failing.assess(&input).unwrap();

    assert_eq!(degraded.prediction, expected.prediction);
    assert_eq!(degraded.features, expected.features);
    match degraded.explanation {
        ExplanationOutcome::Unavailable { reason } => {
            assert!(reason.contains("singular"), "{reason}")
        }
        other => panic!("Expected Unavailable, got {other:?}"),
    }
}
