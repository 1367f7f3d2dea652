#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Heuristic reward for bot responses.
//!
//! The [`RewardScorer`] rates a response by keyword presence and length. It
//! is a pure function of its inputs and the configured bounds, so the same
//! response always earns the same reward.

pub mod error;

use agentlern_core::{Config, ContextMap};
use serde::{Deserialize, Serialize};

pub use error::{Result, RewardError};

/// Keywords signalling a completed action.
pub const SUCCESS_KEYWORDS: &[&str] = &["完了", "登録", "作成", "設定", "追加", "削除"];
/// Keywords signalling a failed action.
pub const ERROR_KEYWORDS: &[&str] = &["エラー", "失敗", "できません", "見つかりません"];
pub const EMOJI_MARKERS: &[&str] = &["✅", "📅", "⏰", "📝", "🔔", "👍"];

// The analysis flags use narrower sets than the scorer.
const ANALYSIS_SUCCESS_KEYWORDS: &[&str] = &["完了", "登録", "作成", "設定"];
const ANALYSIS_ERROR_KEYWORDS: &[&str] = &["エラー", "失敗", "できません"];
const ANALYSIS_EMOJI_MARKERS: &[&str] = &["✅", "📅", "⏰", "📝", "🔔"];

const SUCCESS_BONUS: f64 = 0.3;
/// Bonus for an error message long enough to explain itself
const EXPLAINED_ERROR_BONUS: f64 = 0.1;
const TERSE_ERROR_PENALTY: f64 = 0.2;
/// Error responses longer than this many characters count as explained
const EXPLAINED_ERROR_MIN_CHARS: usize = 20;
const LENGTH_BAND: std::ops::RangeInclusive<usize> = 10..=200;
const LENGTH_BAND_BONUS: f64 = 0.2;
const OVERLONG_CHARS: usize = 500;
const OVERLONG_PENALTY: f64 = 0.1;
const EMOJI_BONUS: f64 = 0.1;

const DEFAULT_FAILURE_REWARD: f64 = -0.5;
const DEFAULT_SUCCESS_REWARD: f64 = 1.0;

/// Scores bot responses within `[failure_reward, success_reward]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardScorer {
    failure_reward: f64,
    success_reward: f64,
}

impl Default for RewardScorer {
    fn default() -> Self {
        Self {
            failure_reward: DEFAULT_FAILURE_REWARD,
            success_reward: DEFAULT_SUCCESS_REWARD,
        }
    }
}

impl RewardScorer {
    /// Creates a scorer with custom bounds.
    ///
    /// # Errors
    /// Returns [`RewardError::InvalidBounds`] for non-finite bounds or
    /// `failure_reward > success_reward`.
    pub fn new(failure_reward: f64, success_reward: f64) -> Result<Self> {
        if !failure_reward.is_finite()
            || !success_reward.is_finite()
            || failure_reward > success_reward
        {
            return Err(RewardError::InvalidBounds {
                failure: failure_reward,
                success: success_reward,
            });
        }
        Ok(Self {
            failure_reward,
            success_reward,
        })
    }

    /// Uses the reward bounds of the runtime config.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.failure_reward, cfg.success_reward)
    }

    #[must_use]
    pub fn failure_reward(&self) -> f64 {
        self.failure_reward
    }

    #[must_use]
    pub fn success_reward(&self) -> f64 {
        self.success_reward
    }

    /// Rates `bot_output`. An empty or whitespace-only response gets the
    /// failure reward regardless of any other rule.
    #[must_use]
    pub fn score(&self, _user_input: &str, bot_output: &str, _context: &ContextMap) -> f64 {
        if bot_output.trim().is_empty() {
            return self.failure_reward;
        }

        let length = bot_output.chars().count();
        let mut reward = 0.0;

        if contains_any(bot_output, SUCCESS_KEYWORDS) {
            reward += SUCCESS_BONUS;
        }

        if contains_any(bot_output, ERROR_KEYWORDS) {
            if length > EXPLAINED_ERROR_MIN_CHARS {
                reward += EXPLAINED_ERROR_BONUS;
            } else {
                reward -= TERSE_ERROR_PENALTY;
            }
        }

        if LENGTH_BAND.contains(&length) {
            reward += LENGTH_BAND_BONUS;
        } else if length > OVERLONG_CHARS {
            reward -= OVERLONG_PENALTY;
        }

        if contains_any(bot_output, EMOJI_MARKERS) {
            reward += EMOJI_BONUS;
        }

        reward.clamp(self.failure_reward, self.success_reward)
    }

    /// Scores a hypothetical response and reports which indicators it carries.
    #[must_use]
    pub fn analyze(
        &self,
        user_input: &str,
        bot_output: &str,
        task_type: Option<&str>,
    ) -> ResponseAnalysis {
        let mut context = ContextMap::new();
        context.insert(
            "task_type".to_string(),
            task_type.map_or(serde_json::Value::Null, |t| t.into()),
        );
        let reward = self.score(user_input, bot_output, &context);

        ResponseAnalysis {
            reward,
            reward_level: RewardLevel::from_reward(reward),
            response_length: bot_output.chars().count(),
            has_success_indicator: contains_any(bot_output, ANALYSIS_SUCCESS_KEYWORDS),
            has_error_indicator: contains_any(bot_output, ANALYSIS_ERROR_KEYWORDS),
            has_emoji: contains_any(bot_output, ANALYSIS_EMOJI_MARKERS),
        }
    }
}

/// Coarse quality bucket of a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardLevel {
    Excellent,
    Good,
    NeedsImprovement,
    Poor,
}

impl RewardLevel {
    #[must_use]
    pub fn from_reward(reward: f64) -> Self {
        if reward > 0.7 {
            Self::Excellent
        } else if reward > 0.3 {
            Self::Good
        } else if reward > 0.0 {
            Self::NeedsImprovement
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseAnalysis {
    pub reward: f64,
    pub reward_level: RewardLevel,
    /// In characters.
    pub response_length: usize,
    pub has_success_indicator: bool,
    pub has_error_indicator: bool,
    pub has_emoji: bool,
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn score(output: &str) -> f64 {
        RewardScorer::default().score("入力", output, &ContextMap::new())
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn empty_and_blank_outputs_get_failure_reward() {
        let scorer = RewardScorer::default();
        assert_close(scorer.score("", "", &ContextMap::new()), -0.5);
        assert_close(scorer.score("何か", "   ", &ContextMap::new()), -0.5);
        assert_close(scorer.score("何か", "\n\t\u{3000}", &ContextMap::new()), -0.5);
    }

    #[test]
    fn success_keyword_and_length_band_add_up() {
        // 10 characters exactly sits inside the band.
        assert_close(score("予定を登録しました。"), 0.5);
    }

    #[test]
    fn short_output_misses_length_band() {
        assert_close(score("登録しました"), 0.3);
        assert_close(score("はい"), 0.0);
    }

    #[test]
    fn terse_error_is_penalized() {
        assert_close(score("エラーです"), -0.2);
    }

    #[test]
    fn explained_error_earns_partial_credit() {
        let output = "エラーが発生しました。時間をおいてもう一度お試しください。";
        assert!(output.chars().count() > 20);
        assert_close(score(output), 0.3);
    }

    #[test]
    fn overlong_output_is_penalized() {
        let output = "あ".repeat(600);
        assert_close(score(&output), -0.1);
    }

    #[test]
    fn length_between_band_and_overlong_is_neutral() {
        let output = "あ".repeat(300);
        assert_close(score(&output), 0.0);
    }

    #[test]
    fn emoji_bonus_is_monotonic() {
        let with_emoji = score("予定を完了しました ✅");
        let without = score("予定を完了しました");
        assert!(with_emoji >= without);
    }

    #[test]
    fn result_is_clamped_to_custom_bounds() {
        let scorer = RewardScorer::new(-0.1, 0.4).expect("bounds are valid");
        let high = scorer.score("", "✅ 明日の15:00に「会議」を登録しました。", &ContextMap::new());
        assert_close(high, 0.4);
        let low = scorer.score("", "エラーです", &ContextMap::new());
        assert_close(low, -0.1);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(RewardScorer::new(1.0, -1.0).is_err());
        assert!(RewardScorer::new(f64::NAN, 1.0).is_err());
        assert!(RewardScorer::new(-0.5, f64::INFINITY).is_err());
    }

    #[test]
    fn score_is_deterministic_and_bounded() {
        let scorer = RewardScorer::default();
        let long = "削除".repeat(400);
        let outputs = [
            "",
            "✅",
            "📅 今週の予定です:\n- 2/7 15:00 会議\n- 2/8 10:00 歯医者",
            "見つかりません",
            "エラー: 予定の登録に失敗しました。もう一度お試しください 🔔",
            long.as_str(),
        ];
        for output in outputs {
            let first = scorer.score("q", output, &ContextMap::new());
            let second = scorer.score("q", output, &ContextMap::new());
            assert!((first - second).abs() < f64::EPSILON);
            assert!((scorer.failure_reward()..=scorer.success_reward()).contains(&first));
        }
    }

    #[test]
    fn analysis_of_calendar_confirmation() {
        let analysis = RewardScorer::default().analyze(
            "明日の午後3時に会議を入れて",
            "✅ 明日の15:00に「会議」を登録しました。",
            Some("calendar_create"),
        );
        assert!(analysis.has_success_indicator);
        assert!(analysis.has_emoji);
        assert!(!analysis.has_error_indicator);
        assert!(matches!(
            analysis.reward_level,
            RewardLevel::Good | RewardLevel::Excellent
        ));
        assert_close(analysis.reward, 0.6);
    }

    #[test]
    fn analysis_flags_use_narrow_sets() {
        // 追加 counts for the score but not for the indicator.
        let analysis = RewardScorer::default().analyze("", "👍 追加しました", None);
        assert!(!analysis.has_success_indicator);
        assert!(!analysis.has_emoji);
    }

    #[test]
    fn reward_levels() {
        assert_eq!(RewardLevel::from_reward(0.8), RewardLevel::Excellent);
        assert_eq!(RewardLevel::from_reward(0.7), RewardLevel::Good);
        assert_eq!(RewardLevel::from_reward(0.3), RewardLevel::NeedsImprovement);
        assert_eq!(RewardLevel::from_reward(0.0), RewardLevel::Poor);
        let json = serde_json::to_string(&RewardLevel::NeedsImprovement).expect("serializes");
        assert_eq!(json, "\"needs_improvement\"");
    }
}
