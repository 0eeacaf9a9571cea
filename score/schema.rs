//! # Feature Schema
//!
//! The static, ordered description of every input the fever model consumes.
//! The order of `FEATURE_SCHEMA` is the order the classifier was trained on,
//! and every categorical field carries its own encoding table so that the
//! options a form offers and the integer codes the model sees are declared in
//! exactly one place.

use serde::Serialize;

/// Number of model inputs. Artifacts are validated against this at load time.
pub const FEATURE_COUNT: usize = 15;

/// One selectable option of a categorical field together with its model code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryCode {
    pub option: &'static str,
    pub code: u8,
}

impl CategoryCode {
    pub const fn new(option: &'static str, code: u8) -> Self {
        Self { option, code }
    }
}

/// The two shapes an input field can take.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// A measured quantity that passes through to the model unchanged.
    Numeric { min: f64, max: f64, default: f64 },
    /// A fixed option set, encoded through its table.
    Categorical {
        options: &'static [CategoryCode],
        default: &'static str,
    },
}

/// A typed descriptor for a single model input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(flatten)]
    pub kind: FeatureKind,
}

impl FeatureSpec {
    /// Looks up the integer code for a categorical option.
    /// Always `None` for numeric fields.
    pub fn code_for(&self, option: &str) -> Option<u8> {
        match self.kind {
            FeatureKind::Categorical { options, .. } => options
                .iter()
                .find(|candidate| candidate.option == option)
                .map(|candidate| candidate.code),
            FeatureKind::Numeric { .. } => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, FeatureKind::Numeric { .. })
    }

    /// The option names in display order, empty for numeric fields.
    pub fn option_names(&self) -> Vec<&'static str> {
        match self.kind {
            FeatureKind::Categorical { options, .. } => {
                options.iter().map(|candidate| candidate.option).collect()
            }
            FeatureKind::Numeric { .. } => Vec::new(),
        }
    }

    /// The encoded value of this field's default, as the model would see it.
    pub fn default_code(&self) -> f64 {
        match self.kind {
            FeatureKind::Numeric { default, .. } => default,
            FeatureKind::Categorical { default, .. } => {
                self.code_for(default).map(f64::from).unwrap_or(0.0)
            }
        }
    }
}

const SEX: &[CategoryCode] = &[CategoryCode::new("Male", 1), CategoryCode::new("Female", 0)];

const YES_NO: &[CategoryCode] = &[CategoryCode::new("No", 0), CategoryCode::new("Yes", 1)];

const URINE_LEUKOCYTES: &[CategoryCode] =
    &[CategoryCode::new("=0", 0), CategoryCode::new(">0", 1)];

// The 18F sheath is the reference level and is coded 1.
const CHANNEL_SIZE: &[CategoryCode] =
    &[CategoryCode::new("18F", 1), CategoryCode::new("20F", 0)];

// Ordinal: codes follow clinical severity.
const HYDRONEPHROSIS: &[CategoryCode] = &[
    CategoryCode::new("None", 0),
    CategoryCode::new("Mild", 1),
    CategoryCode::new("Moderate", 2),
    CategoryCode::new("Severe", 3),
];

const MAYO_SCORE: &[CategoryCode] = &[CategoryCode::new("<3", 0), CategoryCode::new("≥3", 1)];

const fn numeric(
    name: &'static str,
    label: &'static str,
    min: f64,
    max: f64,
    default: f64,
) -> FeatureSpec {
    FeatureSpec {
        name,
        label,
        kind: FeatureKind::Numeric { min, max, default },
    }
}

const fn categorical(
    name: &'static str,
    label: &'static str,
    options: &'static [CategoryCode],
    default: &'static str,
) -> FeatureSpec {
    FeatureSpec {
        name,
        label,
        kind: FeatureKind::Categorical { options, default },
    }
}

/// Every model input, in training order.
pub static FEATURE_SCHEMA: [FeatureSpec; FEATURE_COUNT] = [
    numeric("LMR", "Lymphocyte to Monocyte Ratio", 0.0, 100.0, 5.0),
    numeric(
        "Preoperative_N",
        "Preoperative Neutrophil Count (×10^9/L)",
        0.0,
        30.0,
        4.0,
    ),
    numeric("Operative_time", "Operative Time (minutes)", 10.0, 300.0, 60.0),
    numeric(
        "Preoperative_WBC",
        "Preoperative White Blood Cell Count (×10^9/L)",
        0.0,
        30.0,
        7.0,
    ),
    numeric(
        "Preoperative_L",
        "Preoperative Lymphocyte Count (×10^9/L)",
        0.0,
        10.0,
        1.8,
    ),
    numeric("PLR", "Platelet to Lymphocyte Ratio", 0.0, 1000.0, 120.0),
    numeric(
        "Preoperative_hemoglobin",
        "Preoperative Hemoglobin (g/L)",
        50.0,
        200.0,
        130.0,
    ),
    numeric("Number_of_stones", "Number of Stones", 1.0, 20.0, 1.0),
    numeric("BMI", "Body Mass Index (kg/m²)", 10.0, 50.0, 24.0),
    categorical("Sex", "Sex", SEX, "Male"),
    categorical("Diabetes_mellitus", "Diabetes Mellitus", YES_NO, "No"),
    categorical("UrineLeuk_bin", "Urine Leukocytes", URINE_LEUKOCYTES, "=0"),
    categorical("Channel_size", "Channel Size", CHANNEL_SIZE, "18F"),
    categorical(
        "degree_of_hydronephrosis",
        "Degree of Hydronephrosis",
        HYDRONEPHROSIS,
        "None",
    ),
    categorical("MayoScore_bin", "Mayo Score", MAYO_SCORE, "<3"),
];

/// Position of a feature in the model's input vector.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_SCHEMA.iter().position(|spec| spec.name == name)
}

pub fn feature_spec(name: &str) -> Option<&'static FeatureSpec> {
    FEATURE_SCHEMA.iter().find(|spec| spec.name == name)
}

pub fn feature_names() -> impl Iterator<Item = &'static str> {
    FEATURE_SCHEMA.iter().map(|spec| spec.name)
}

/// Quantiles of each numeric range used to spread the reference rows.
const REFERENCE_QUANTILES: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

/// A deterministic pool of encoded reference rows, used as the explanation
/// background when a model artifact ships none of its own.
///
/// Row 0 is the all-defaults patient. Each following row places every numeric
/// field at one quantile of its declared range and cycles categorical fields
/// through their option codes, so every code appears in the pool.
pub fn reference_pool() -> Vec<Vec<f64>> {
    let mut rows = Vec::with_capacity(REFERENCE_QUANTILES.len() + 1);
    rows.push(FEATURE_SCHEMA.iter().map(FeatureSpec::default_code).collect());

    for (row_idx, quantile) in REFERENCE_QUANTILES.iter().enumerate() {
        let row = FEATURE_SCHEMA
            .iter()
            .map(|spec| match spec.kind {
                FeatureKind::Numeric { min, max, .. } => min + (max - min) * quantile,
                FeatureKind::Categorical { options, .. } => {
                    f64::from(options[row_idx % options.len()].code)
                }
            })
            .collect();
        rows.push(row);
    }
    rows
}
