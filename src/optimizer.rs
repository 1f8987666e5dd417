//! Evaluator-optimizer convergence loop
//!
//! Generate -> Evaluate -> (Refine -> Evaluate)* until the overall score
//! reaches the threshold or the iteration cap is hit. Both endings are
//! ordinary outcomes; only a content-service failure is an error.

use crate::content::{self, check_percent, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 80.0;

/// Dimensions the evaluator is asked to score.
pub const QUALITY_DIMENSIONS: &[&str] = &["completeness", "accuracy", "actionability", "clarity", "risk_assessment"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Recommendation {
    #[serde(alias = "buy", alias = "BUY")]
    Buy,
    #[serde(alias = "hold", alias = "HOLD")]
    Hold,
    #[serde(alias = "sell", alias = "SELL")]
    Sell,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::Buy => "Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Sell => "Sell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestmentAnalysis {
    pub ticker: String,
    pub recommendation: Recommendation,
    pub target_price: f64,
    pub thesis: String,
    #[serde(default)]
    pub catalysts: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub financial_highlights: Vec<String>,
    pub conclusion: String,
}

impl StructuredOutput for InvestmentAnalysis {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "investment_analysis",
        required_fields: &["ticker", "recommendation", "target_price", "thesis", "conclusion"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.target_price.is_finite() && self.target_price > 0.0) {
            return Err(format!("target_price must be positive, got {}", self.target_price));
        }
        Ok(())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, heading: &str, items: &[String]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(f, "\n{}:", heading)?;
    for item in items {
        writeln!(f, "- {}", item)?;
    }
    Ok(())
}

impl fmt::Display for InvestmentAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} (target ${:.2})",
            self.ticker, self.recommendation, self.target_price
        )?;
        writeln!(f, "\nThesis: {}", self.thesis)?;
        write_list(f, "Catalysts", &self.catalysts)?;
        write_list(f, "Risks", &self.risks)?;
        write_list(f, "Financial highlights", &self.financial_highlights)?;
        write!(f, "\nConclusion: {}", self.conclusion)
    }
}

#[derive(Debug, Deserialize)]
struct EvaluationAnswer {
    scores: BTreeMap<String, f64>,
    #[serde(default)]
    feedback: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

impl StructuredOutput for EvaluationAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "quality_evaluation",
        required_fields: &["scores", "feedback"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        if self.scores.is_empty() {
            return Err("scores must name at least one dimension".to_string());
        }
        for (dimension, score) in &self.scores {
            check_percent(dimension, *score)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityEvaluation {
    pub scores: BTreeMap<String, f64>,
    pub overall: f64,
    pub feedback: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub meets_threshold: bool,
}

impl QualityEvaluation {
    /// Build an evaluation whose overall score is the mean of `scores`,
    /// whatever the service claimed.
    pub fn from_scores(
        scores: BTreeMap<String, f64>,
        feedback: Vec<String>,
        strengths: Vec<String>,
        weaknesses: Vec<String>,
        threshold: f64,
    ) -> Self {
        let overall = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        Self {
            meets_threshold: overall >= threshold,
            scores,
            overall,
            feedback,
            strengths,
            weaknesses,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementEntry {
    pub iteration: u32,
    pub analysis: InvestmentAnalysis,
    pub evaluation: QualityEvaluation,
}

impl RefinementEntry {
    pub fn analysis_text(&self) -> String {
        self.analysis.to_string()
    }
}

/// Transcript of every iteration, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinementHistory {
    entries: Vec<RefinementEntry>,
}

impl RefinementHistory {
    fn push(&mut self, entry: RefinementEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RefinementEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&RefinementEntry> {
        self.entries.last()
    }

    /// Highest overall score; the earliest entry wins a tie.
    pub fn best_entry(&self) -> Option<&RefinementEntry> {
        self.entries.iter().fold(None, |best: Option<&RefinementEntry>, e| match best {
            Some(b) if b.evaluation.overall >= e.evaluation.overall => Some(b),
            _ => Some(e),
        })
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.evaluation.overall).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged,
    Capped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub final_analysis: InvestmentAnalysis,
    pub final_evaluation: QualityEvaluation,
    pub history: RefinementHistory,
    pub termination: Termination,
}

impl OptimizationOutcome {
    pub fn iterations(&self) -> usize {
        self.history.len()
    }
}

enum LoopState {
    Generate,
    Evaluate(InvestmentAnalysis),
    Refine(InvestmentAnalysis, QualityEvaluation),
}

pub struct EvaluatorOptimizerLoop {
    service: Arc<dyn ContentService>,
}

impl EvaluatorOptimizerLoop {
    pub fn new(service: Arc<dyn ContentService>) -> Self {
        Self { service }
    }

    pub async fn run(
        &self,
        subject: &str,
        seed_data: &Value,
        max_iterations: u32,
        threshold: f64,
    ) -> Result<OptimizationOutcome> {
        if max_iterations == 0 {
            return Err(OrchestrationError::InvalidInput("max_iterations must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&threshold) {
            return Err(OrchestrationError::InvalidInput(format!(
                "threshold must be within [0, 100], got {}",
                threshold
            )));
        }

        info!(subject, max_iterations, threshold, "Starting evaluator-optimizer loop");

        let mut history = RefinementHistory::default();
        let mut iteration = 1u32;
        let mut state = LoopState::Generate;

        loop {
            state = match state {
                LoopState::Generate => LoopState::Evaluate(self.generate(subject, seed_data).await?),
                LoopState::Evaluate(analysis) => {
                    let evaluation = self.evaluate(subject, &analysis, threshold).await?;
                    debug!(iteration, overall = evaluation.overall, "Evaluated analysis");

                    history.push(RefinementEntry {
                        iteration,
                        analysis: analysis.clone(),
                        evaluation: evaluation.clone(),
                    });

                    let termination = if evaluation.meets_threshold {
                        Some(Termination::Converged)
                    } else if iteration >= max_iterations {
                        Some(Termination::Capped)
                    } else {
                        None
                    };

                    if let Some(termination) = termination {
                        info!(
                            subject,
                            iterations = history.len(),
                            overall = evaluation.overall,
                            ?termination,
                            "Evaluator-optimizer loop finished"
                        );
                        return Ok(OptimizationOutcome {
                            final_analysis: analysis,
                            final_evaluation: evaluation,
                            history,
                            termination,
                        });
                    }

                    LoopState::Refine(analysis, evaluation)
                }
                LoopState::Refine(analysis, evaluation) => {
                    iteration += 1;
                    LoopState::Evaluate(self.refine(subject, &analysis, &evaluation).await?)
                }
            };
        }
    }

    async fn generate(&self, subject: &str, seed_data: &Value) -> Result<InvestmentAnalysis> {
        content::generate(
            self.service.as_ref(),
            ContentTask::GenerateAnalysis,
            "Write an investment analysis with a Buy/Hold/Sell recommendation and a price target.",
            json!({ "ticker": subject, "data": seed_data }),
        )
        .await
    }

    async fn evaluate(&self, subject: &str, analysis: &InvestmentAnalysis, threshold: f64) -> Result<QualityEvaluation> {
        let answer: EvaluationAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::EvaluateAnalysis,
            "Score this analysis from 0 to 100 on each dimension and list specific improvements.",
            json!({
                "ticker": subject,
                "analysis": analysis,
                "dimensions": QUALITY_DIMENSIONS,
            }),
        )
        .await?;

        Ok(QualityEvaluation::from_scores(
            answer.scores,
            answer.feedback,
            answer.strengths,
            answer.weaknesses,
            threshold,
        ))
    }

    async fn refine(
        &self,
        subject: &str,
        analysis: &InvestmentAnalysis,
        evaluation: &QualityEvaluation,
    ) -> Result<InvestmentAnalysis> {
        content::generate(
            self.service.as_ref(),
            ContentTask::RefineAnalysis,
            "Rewrite the analysis to address every feedback item while keeping what already works.",
            json!({
                "ticker": subject,
                "analysis": analysis,
                "feedback": evaluation.feedback,
                "weaknesses": evaluation.weaknesses,
                "scores": evaluation.scores,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ScriptedContentService;

    fn analysis(thesis: &str) -> Value {
        json!({
            "ticker": "ACME",
            "recommendation": "buy",
            "target_price": 120.0,
            "thesis": thesis,
            "catalysts": ["new plant"],
            "risks": ["input costs"],
            "conclusion": "Accumulate"
        })
    }

    fn evaluation(score: f64) -> Value {
        json!({
            "scores": {"completeness": score, "accuracy": score, "actionability": score},
            "overall_score": 12.0,
            "feedback": [format!("improve beyond {}", score)]
        })
    }

    fn service_with_scores(scores: &[f64]) -> ScriptedContentService {
        let mut service = ScriptedContentService::new()
            .with_response(ContentTask::GenerateAnalysis, analysis("v1"))
            .with_default(ContentTask::RefineAnalysis, analysis("refined"));
        for s in scores {
            service = service.with_response(ContentTask::EvaluateAnalysis, evaluation(*s));
        }
        service
    }

    #[tokio::test]
    async fn test_converges_on_third_iteration() {
        let service = Arc::new(service_with_scores(&[60.0, 75.0, 95.0]));
        let eo = EvaluatorOptimizerLoop::new(service.clone());
        let outcome = eo.run("ACME", &json!({}), 3, 90.0).await.unwrap();

        assert_eq!(outcome.iterations(), 3);
        assert_eq!(outcome.termination, Termination::Converged);
        assert!(outcome.final_evaluation.meets_threshold);
        assert_eq!(outcome.history.scores(), vec![60.0, 75.0, 95.0]);
        assert_eq!(service.calls_for(ContentTask::RefineAnalysis).len(), 2);
    }

    #[tokio::test]
    async fn test_capped_when_threshold_never_met() {
        let service = Arc::new(service_with_scores(&[60.0, 50.0]));
        let eo = EvaluatorOptimizerLoop::new(service);
        let outcome = eo.run("ACME", &json!({}), 2, 90.0).await.unwrap();

        assert_eq!(outcome.termination, Termination::Capped);
        assert_eq!(outcome.iterations(), 2);
        assert!(!outcome.final_evaluation.meets_threshold);
        // Regression is kept in the transcript.
        assert_eq!(outcome.history.best_entry().unwrap().iteration, 1);
        assert_eq!(outcome.final_analysis.thesis, "refined");
    }

    #[tokio::test]
    async fn test_first_draft_good_enough() {
        let service = Arc::new(service_with_scores(&[85.0]));
        let eo = EvaluatorOptimizerLoop::new(service.clone());
        let outcome = eo.run("ACME", &json!({}), 5, 80.0).await.unwrap();

        assert_eq!(outcome.iterations(), 1);
        assert_eq!(outcome.termination, Termination::Converged);
        assert!(service.calls_for(ContentTask::RefineAnalysis).is_empty());
    }

    #[tokio::test]
    async fn test_overall_is_recomputed_mean() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(ContentTask::GenerateAnalysis, analysis("v1"))
                .with_response(
                    ContentTask::EvaluateAnalysis,
                    json!({"scores": {"completeness": 70, "accuracy": 90}, "overall_score": 99, "feedback": []}),
                ),
        );
        let eo = EvaluatorOptimizerLoop::new(service);
        let outcome = eo.run("ACME", &json!({}), 1, 90.0).await.unwrap();

        assert_eq!(outcome.final_evaluation.overall, 80.0);
        assert_eq!(outcome.termination, Termination::Capped);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_schema_violation() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(ContentTask::GenerateAnalysis, analysis("v1"))
                .with_response(ContentTask::EvaluateAnalysis, evaluation(140.0)),
        );
        let eo = EvaluatorOptimizerLoop::new(service);
        let err = eo.run("ACME", &json!({}), 3, 90.0).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::SchemaViolation { schema: "quality_evaluation", .. }));
    }

    #[tokio::test]
    async fn test_non_positive_target_price_rejected() {
        let mut bad = analysis("v1");
        bad["target_price"] = json!(0.0);
        let service = Arc::new(ScriptedContentService::new().with_response(ContentTask::GenerateAnalysis, bad));
        let eo = EvaluatorOptimizerLoop::new(service);
        assert!(eo.run("ACME", &json!({}), 3, 90.0).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let eo = EvaluatorOptimizerLoop::new(Arc::new(ScriptedContentService::new()));
        assert!(eo.run("ACME", &json!({}), 0, 90.0).await.is_err());
        assert!(eo.run("ACME", &json!({}), 3, 101.0).await.is_err());
        assert!(eo.run("ACME", &json!({}), 3, f64::NAN).await.is_err());
    }

    #[test]
    fn test_best_entry_prefers_earliest_tie() {
        let make = |iteration, score| RefinementEntry {
            iteration,
            analysis: serde_json::from_value(analysis("x")).unwrap(),
            evaluation: QualityEvaluation::from_scores(
                BTreeMap::from([("accuracy".to_string(), score)]),
                vec![],
                vec![],
                vec![],
                90.0,
            ),
        };
        let mut history = RefinementHistory::default();
        history.push(make(1, 70.0));
        history.push(make(2, 85.0));
        history.push(make(3, 85.0));
        assert_eq!(history.best_entry().unwrap().iteration, 2);
    }

    #[test]
    fn test_analysis_text() {
        let a: InvestmentAnalysis = serde_json::from_value(analysis("Strong moat")).unwrap();
        let text = a.to_string();
        assert!(text.starts_with("ACME: Buy (target $120.00)"));
        assert!(text.contains("- new plant"));
        assert!(!text.contains("Financial highlights"));
    }
}
