//! Plain-text rendering of an assessment for the terminal.

use crate::explain::{Explanation, OutputScale};
use crate::pipeline::{Assessment, ExplanationOutcome};
use crate::schema::feature_spec;
use std::fmt;

const DISCLAIMER: &str = "This result is for reference only and does not replace clinical judgement. \
The model was trained on historical data and may not apply to every clinical setting.";

const LIKELY_CAUSES: [&str; 3] = [
    "the explanation method is not supported for this model type",
    "the model artifact does not match the current feature schema",
    "the input values differ in format from those seen in training",
];

/// Displays an `Assessment` as a human-readable report.
pub struct Report<'a>(pub &'a Assessment);

pub fn render_text(assessment: &Assessment) -> String {
    Report(assessment).to_string()
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prediction = &self.0.prediction;
        writeln!(f, "Prediction Results")?;
        writeln!(f, "==================")?;
        writeln!(f, "Risk: {} [{}]", prediction.tier.label(), prediction.tier.color())?;
        writeln!(f, "P(Fever) = {:.2}%", prediction.percentage)?;
        writeln!(f)?;
        writeln!(f, "Interpretation")?;
        writeln!(
            f,
            "  Predicted probability of post-operative fever: {:.2}%",
            prediction.percentage
        )?;
        writeln!(f, "  Risk level: {}", prediction.tier.label())?;
        writeln!(f)?;

        match &self.0.explanation {
            ExplanationOutcome::Available(explanation) => write_explanation(f, explanation)?,
            ExplanationOutcome::Unavailable { reason } => {
                writeln!(f, "Feature impact analysis unavailable: {reason}")?;
                writeln!(f, "Likely causes:")?;
                for (idx, cause) in LIKELY_CAUSES.iter().enumerate() {
                    writeln!(f, "  {}. {}", idx + 1, cause)?;
                }
                writeln!(f)?;
            }
            ExplanationOutcome::Disabled => {}
        }

        writeln!(f, "Note: {DISCLAIMER}")
    }
}

fn scale_name(scale: OutputScale) -> &'static str {
    match scale {
        OutputScale::Probability => "probability",
        OutputScale::LogOdds => "log-odds",
    }
}

fn label_of(feature: &str) -> &str {
    feature_spec(feature).map_or(feature, |spec| spec.label)
}

fn write_explanation(f: &mut fmt::Formatter<'_>, explanation: &Explanation) -> fmt::Result {
    writeln!(
        f,
        "Feature Impact Analysis ({} method, {} scale, {} background points)",
        explanation.method,
        scale_name(explanation.scale),
        explanation.background_size
    )?;
    writeln!(f, "  Positive values push fever risk up, negative values push it down.")?;
    for contribution in explanation.ranked() {
        let direction = if contribution.contribution > 0.0 {
            "up"
        } else if contribution.contribution < 0.0 {
            "down"
        } else {
            "none"
        };
        writeln!(
            f,
            "  {:<42} value {:>9.3}  impact {:>+10.5}  {}",
            label_of(&contribution.feature),
            contribution.value,
            contribution.contribution,
            direction
        )?;
    }
    writeln!(f)?;

    writeln!(f, "Waterfall")?;
    writeln!(f, "  {:<42} {:>10.5}", "Expected value (baseline)", explanation.baseline)?;
    for step in explanation.waterfall() {
        if step.contribution == 0.0 {
            continue;
        }
        writeln!(
            f,
            "  {:<42} {:>+10.5} -> {:.5}",
            label_of(&step.feature),
            step.contribution,
            step.end
        )?;
    }
    writeln!(f, "  {:<42} {:>10.5}", "Model output", explanation.output)?;
    writeln!(f)
}
