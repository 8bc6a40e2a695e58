//! Investment profile extraction

use super::Stage;
use crate::error::{OrchestrationError, Result};
use crate::llm::TextGenerator;
use crate::models::{Context, Intent, ProfileAnalysis, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const PROFILE_ANALYSIS_PROMPT: &str = r#"You are an investment profile analyzer. Extract key investment characteristics from the user's message.

User Message: "{user_message}"
Previous Context: {conversation_history}

Extract and classify the following information:
1. Risk Tolerance (conservative/moderate/aggressive)
2. Investment Horizon (short/medium/long)
3. Age Range: young (18-35), middle-aged (36-55), senior (55+)
4. Income Level: low, medium, high (based on context clues)
5. Investment Goals: List specific goals mentioned (retirement, house, education, etc.)

Respond in this exact format:
RISK_TOLERANCE: [conservative/moderate/aggressive]
INVESTMENT_HORIZON: [short/medium/long]
AGE_RANGE: [young/middle-aged/senior]
INCOME_LEVEL: [low/medium/high]
INVESTMENT_GOALS: [goal1, goal2, goal3]
REASONING: [2-3 sentence explanation of your analysis]
"#;

pub struct ProfileAnalyzer {
    generator: Arc<dyn TextGenerator>,
}

impl ProfileAnalyzer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

/// Parse the `KEY: value` reply. Fails when no recognized key is present.
pub fn parse_profile(raw: &str) -> Result<ProfileAnalysis> {
    let mut profile = ProfileAnalysis {
        risk_tolerance: "moderate".to_string(),
        investment_horizon: "medium".to_string(),
        age_range: "middle-aged".to_string(),
        income_level: "medium".to_string(),
        investment_goals: Vec::new(),
        reasoning: String::new(),
    };
    let mut recognized = 0;

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_start_matches('[').trim_end_matches(']').trim();

        match key.trim().to_lowercase().as_str() {
            "risk_tolerance" => profile.risk_tolerance = value.to_lowercase(),
            "investment_horizon" => profile.investment_horizon = value.to_lowercase(),
            "age_range" => profile.age_range = value.to_lowercase(),
            "income_level" => profile.income_level = value.to_lowercase(),
            "investment_goals" => {
                profile.investment_goals = value
                    .split(',')
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect()
            }
            "reasoning" => profile.reasoning = value.to_string(),
            _ => continue,
        }
        recognized += 1;
    }

    if recognized == 0 {
        return Err(OrchestrationError::Stage(
            "profile response contained no recognizable fields".to_string(),
        ));
    }

    Ok(profile)
}

#[async_trait]
impl Stage for ProfileAnalyzer {
    fn name(&self) -> &'static str {
        "profile_analyzer"
    }

    fn intent(&self) -> Intent {
        Intent::ProfileAnalysis
    }

    async fn apply(&self, context: &Context) -> Result<StageOutput> {
        let prompt = PROFILE_ANALYSIS_PROMPT
            .replace("{user_message}", &context.user_message)
            .replace("{conversation_history}", &format!("{:?}", context.conversation_history));

        let raw = self.generator.generate(&prompt).await?;
        let profile = parse_profile(&raw)?;

        debug!(
            risk = %profile.risk_tolerance,
            horizon = %profile.investment_horizon,
            "Profile extracted"
        );

        Ok(StageOutput::Profile(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedGenerator;

    const REPLY: &str = "RISK_TOLERANCE: Aggressive\n\
        INVESTMENT_HORIZON: long\n\
        AGE_RANGE: young\n\
        INCOME_LEVEL: medium\n\
        INVESTMENT_GOALS: [retirement, house]\n\
        REASONING: Young investor with a long runway.";

    #[test]
    fn test_parse_full_reply() {
        let profile = parse_profile(REPLY).unwrap();
        assert_eq!(profile.risk_tolerance, "aggressive");
        assert_eq!(profile.age_range, "young");
        assert_eq!(profile.investment_goals, vec!["retirement", "house"]);
        assert_eq!(profile.reasoning, "Young investor with a long runway.");
    }

    #[test]
    fn test_parse_partial_reply_keeps_defaults() {
        let profile = parse_profile("RISK_TOLERANCE: conservative").unwrap();
        assert_eq!(profile.risk_tolerance, "conservative");
        assert_eq!(profile.investment_horizon, "medium");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_profile("Sure! Happy to help.").is_err());
    }

    #[tokio::test]
    async fn test_stage_output() {
        let stage = ProfileAnalyzer::new(Arc::new(CannedGenerator::new(REPLY)));
        let ctx = Context::new("I'm 28 and saving for retirement", vec![]);

        match stage.apply(&ctx).await.unwrap() {
            StageOutput::Profile(p) => assert_eq!(p.investment_horizon, "long"),
            other => panic!("unexpected output: {:?}", other),
        }
    }
}
