#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Append-only log of user/bot interactions.
//!
//! The log lives in `<data_dir>/interactions.jsonl`, one JSON object per
//! line. It is read completely on [`InteractionLog::open`] and kept in
//! memory; every mutation reaches the file before it reaches memory, so both
//! copies agree once a call returns.

pub mod error;
pub mod export;

use agentlern_core::{
    clock, is_known_task_type, telemetry, ContextMap, EventSink, Interaction, NullSink,
    RewardEvent, Statistics, StepEvent, TrainingSample,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

pub use error::{CollectorError, Result};
pub use export::{ExportMetadata, ExportSnapshot};

const LOG_FILE: &str = "interactions.jsonl";
const MIN_REWARD: f64 = -1.0;
const MAX_REWARD: f64 = 1.0;

/// Interaction log backed by a JSONL file.
pub struct InteractionLog {
    data_dir: PathBuf,
    log_path: PathBuf,
    interactions: Vec<Interaction>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for InteractionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionLog")
            .field("log_path", &self.log_path)
            .field("interactions", &self.interactions.len())
            .finish_non_exhaustive()
    }
}

impl InteractionLog {
    /// Opens the log in `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Any line that does not parse as an [`Interaction`] fails the whole
    /// load with [`CollectorError::Corrupt`]. Blank lines are skipped.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let log_path = data_dir.join(LOG_FILE);
        let interactions = load_lines(&log_path)?;
        if !interactions.is_empty() {
            telemetry::info(&format!(
                "Loaded {} existing interactions from {}",
                interactions.len(),
                log_path.display()
            ));
        }
        Ok(Self {
            data_dir,
            log_path,
            interactions,
            sink: Arc::new(NullSink),
        })
    }

    /// Forwards recorded steps and amended rewards to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Interaction> {
        self.interactions.iter().find(|i| i.id == id)
    }

    /// Appends a new interaction, forwards it to the sink and returns its id.
    ///
    /// The id is `{user_id}_{YYYYMMDDhhmmssffffff}`. Two calls for the same
    /// user within one microsecond produce the same id; nothing guards
    /// against that.
    pub fn record(
        &mut self,
        user_id: &str,
        task_type: &str,
        user_message: &str,
        bot_response: &str,
        context: Option<ContextMap>,
        reward: Option<f64>,
    ) -> Result<String> {
        let (id, step) =
            self.append(user_id, task_type, user_message, bot_response, context, reward)?;
        forward_step(self.sink.as_ref(), &id, &step);
        Ok(id)
    }

    /// Like [`record`](Self::record) but hands the step back instead of
    /// forwarding it, so callers holding the log behind a lock can forward
    /// after releasing it.
    pub fn append(
        &mut self,
        user_id: &str,
        task_type: &str,
        user_message: &str,
        bot_response: &str,
        context: Option<ContextMap>,
        reward: Option<f64>,
    ) -> Result<(String, StepEvent)> {
        if let Some(r) = reward {
            validate_reward(r)?;
        }
        if !is_known_task_type(task_type) {
            telemetry::debug(&format!("Recording unlisted task type {task_type:?}"));
        }

        let now = OffsetDateTime::now_utc();
        let interaction = Interaction {
            id: format!("{user_id}_{}", clock::compact_micros(now)),
            timestamp: clock::iso8601(now),
            user_id: user_id.to_string(),
            task_type: task_type.to_string(),
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
            context: context.unwrap_or_default(),
            reward,
            feedback: None,
        };

        self.append_line(&interaction)?;
        let id = interaction.id.clone();

        let step = StepEvent {
            name: format!("line_bot_{task_type}"),
            input: interaction.user_message.clone(),
            output: interaction.bot_response.clone(),
            metadata: Some(json!({
                "user_id": interaction.user_id,
                "task_type": interaction.task_type,
                "timestamp": interaction.timestamp,
            })),
        };
        self.interactions.push(interaction);
        Ok((id, step))
    }

    /// Sets reward and feedback of an existing interaction, rewrites the
    /// whole log file and forwards the reward to the sink.
    ///
    /// # Errors
    /// [`CollectorError::NotFound`] for an unknown id,
    /// [`CollectorError::InvalidReward`] for a reward outside `[-1.0, 1.0]`.
    /// The log is unchanged in both cases.
    pub fn set_reward(&mut self, id: &str, reward: f64, feedback: Option<String>) -> Result<()> {
        let event = self.amend(id, reward, feedback)?;
        forward_reward(self.sink.as_ref(), id, &event);
        Ok(())
    }

    /// Like [`set_reward`](Self::set_reward) but returns the reward event
    /// instead of forwarding it.
    pub fn amend(
        &mut self,
        id: &str,
        reward: f64,
        feedback: Option<String>,
    ) -> Result<RewardEvent> {
        validate_reward(reward)?;
        let idx = self
            .interactions
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| CollectorError::NotFound(id.to_string()))?;

        let mut amended = self.interactions[idx].clone();
        amended.reward = Some(reward);
        amended.feedback = feedback;

        self.rewrite(
            self.interactions
                .iter()
                .enumerate()
                .map(|(i, rec)| if i == idx { &amended } else { rec }),
        )?;

        let event = RewardEvent {
            reward,
            metadata: Some(json!({
                "interaction_id": id,
                "feedback": amended.feedback,
            })),
        };
        self.interactions[idx] = amended;
        Ok(event)
    }

    /// Training samples, optionally limited to interactions rewarded with at
    /// least `min_reward`.
    ///
    /// Without a threshold every interaction is included and an unset reward
    /// shows up as `0.0`. With a threshold, unrewarded interactions are
    /// dropped. The iterator borrows the log; call again to restart.
    pub fn training_data(
        &self,
        min_reward: Option<f64>,
    ) -> impl Iterator<Item = TrainingSample> + '_ {
        self.interactions
            .iter()
            .filter(move |i| match min_reward {
                None => true,
                Some(min) => i.reward.is_some_and(|r| r >= min),
            })
            .map(Interaction::to_sample)
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let mut by_task: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_reward = 0.0;
        let mut rewarded = 0usize;

        for interaction in &self.interactions {
            *by_task.entry(interaction.task_type.clone()).or_insert(0) += 1;
            if let Some(reward) = interaction.reward {
                total_reward += reward;
                rewarded += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let average_reward = if rewarded == 0 {
            0.0
        } else {
            total_reward / rewarded as f64
        };

        Statistics {
            total_interactions: self.interactions.len(),
            interactions_by_task: by_task,
            average_reward,
            rewarded_count: rewarded,
        }
    }

    fn append_line(&self, interaction: &Interaction) -> Result<()> {
        let line = serde_json::to_string(interaction)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rewrite<'a>(&self, records: impl Iterator<Item = &'a Interaction>) -> Result<()> {
        let tmp_path = self.log_path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.log_path)?;
        Ok(())
    }
}

/// Sends a step returned by [`InteractionLog::append`]. Failures are logged.
pub fn forward_step(sink: &dyn EventSink, id: &str, step: &StepEvent) {
    if let Err(e) = sink.record_step(step) {
        telemetry::warn(&format!("Failed to forward step for {id}: {e}"));
    }
}

/// Sends a reward returned by [`InteractionLog::amend`]. Failures are logged.
pub fn forward_reward(sink: &dyn EventSink, id: &str, event: &RewardEvent) {
    if let Err(e) = sink.record_reward(event) {
        telemetry::warn(&format!("Failed to forward reward for {id}: {e}"));
    }
}

fn validate_reward(reward: f64) -> Result<()> {
    if reward.is_finite() && (MIN_REWARD..=MAX_REWARD).contains(&reward) {
        Ok(())
    } else {
        Err(CollectorError::InvalidReward(reward))
    }
}

fn load_lines(path: &Path) -> Result<Vec<Interaction>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut interactions = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let interaction =
            serde_json::from_str(&line).map_err(|source| CollectorError::Corrupt {
                line: idx + 1,
                source,
            })?;
        interactions.push(interaction);
    }
    Ok(interactions)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use agentlern_core::SinkError;
    use serde_json::Value;
    use std::sync::Mutex;

    type SinkResult = std::result::Result<(), SinkError>;

    fn temp_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "agentlern_collector_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[derive(Default)]
    struct RecordingSink {
        steps: Mutex<Vec<StepEvent>>,
        rewards: Mutex<Vec<RewardEvent>>,
    }

    impl EventSink for RecordingSink {
        fn open_session(&self, _name: &str, _metadata: &Value) -> SinkResult {
            Ok(())
        }
        fn record_step(&self, step: &StepEvent) -> SinkResult {
            self.steps.lock().unwrap().push(step.clone());
            Ok(())
        }
        fn record_reward(&self, reward: &RewardEvent) -> SinkResult {
            self.rewards.lock().unwrap().push(reward.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn open_session(&self, _name: &str, _metadata: &Value) -> SinkResult {
            Err(SinkError::Unavailable("down".into()))
        }
        fn record_step(&self, _step: &StepEvent) -> SinkResult {
            Err(SinkError::Unavailable("down".into()))
        }
        fn record_reward(&self, _reward: &RewardEvent) -> SinkResult {
            Err(SinkError::Rejected("500".into()))
        }
    }

    fn record_simple(
        log: &mut InteractionLog,
        user: &str,
        task: &str,
        reward: Option<f64>,
    ) -> String {
        log.record(
            user,
            task,
            "明日の午後3時に会議を入れて",
            "明日の15:00に「会議」を登録しました。",
            None,
            reward,
        )
        .expect("record should succeed")
    }

    #[test]
    fn record_generates_prefixed_id_and_persists_line() {
        let dir = temp_data_dir("record");
        let mut log = InteractionLog::open(&dir).unwrap();
        let mut context = ContextMap::new();
        context.insert("date".into(), json!("2026-02-07"));

        let id = log
            .record(
                "test_user",
                "calendar_create",
                "明日の午後3時に会議を入れて",
                "明日の15:00に「会議」を登録しました。",
                Some(context),
                None,
            )
            .unwrap();

        assert!(id.starts_with("test_user_"));
        assert_eq!(id.len(), "test_user_".len() + 20);
        let content = fs::read_to_string(log.log_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("2026-02-07"));
        assert!(content.contains("登録しました"));
    }

    #[test]
    fn reload_yields_identical_records() {
        let dir = temp_data_dir("reload");
        let mut log = InteractionLog::open(&dir).unwrap();
        for i in 0..5 {
            let reward = (i % 2 == 0).then_some(0.5);
            record_simple(&mut log, &format!("user{i}"), "task_create", reward);
        }

        let mut context = ContextMap::new();
        context.insert("date".into(), json!("2026-02-07"));
        context.insert(
            "event".into(),
            json!({"title": "会議", "attendees": ["alice", "bob"], "minutes": 30}),
        );
        let with_context = log
            .record(
                "carol",
                "calendar_create",
                "明日の午後3時に会議を入れて",
                "✅ 明日の15:00に「会議」を登録しました。",
                Some(context),
                None,
            )
            .unwrap();
        log.set_reward(&with_context, -0.25, Some("時間が違う".into()))
            .unwrap();
        let before = log.interactions().to_vec();

        let reopened = InteractionLog::open(&dir).unwrap();
        assert_eq!(reopened.len(), 6);
        assert_eq!(reopened.interactions(), before.as_slice());
        let amended = reopened.get(&with_context).unwrap();
        assert_eq!(amended.context["event"]["attendees"][1], "bob");
        assert_eq!(amended.feedback.as_deref(), Some("時間が違う"));
        assert_eq!(amended.reward, Some(-0.25));
    }

    #[test]
    fn set_reward_updates_memory_and_file() {
        let dir = temp_data_dir("set_reward");
        let mut log = InteractionLog::open(&dir).unwrap();
        let first = record_simple(&mut log, "alice", "calendar_create", None);
        let second = record_simple(&mut log, "bob", "calendar_create", None);

        log.set_reward(&second, 1.0, Some("正確に処理された".into()))
            .unwrap();

        assert_eq!(log.get(&second).unwrap().reward, Some(1.0));
        assert_eq!(log.get(&first).unwrap().reward, None);

        let reopened = InteractionLog::open(&dir).unwrap();
        let amended = reopened.get(&second).unwrap();
        assert_eq!(amended.reward, Some(1.0));
        assert_eq!(amended.feedback.as_deref(), Some("正確に処理された"));
        assert_eq!(reopened.get(&first).unwrap().reward, None);
        assert!(!dir.join("interactions.jsonl.tmp").exists());
    }

    #[test]
    fn set_reward_on_unknown_id_leaves_log_unchanged() {
        let dir = temp_data_dir("unknown_id");
        let mut log = InteractionLog::open(&dir).unwrap();
        record_simple(&mut log, "alice", "task_create", Some(0.2));
        let before = fs::read_to_string(log.log_path()).unwrap();

        let err = log.set_reward("nobody_1", 1.0, None).unwrap_err();
        assert!(matches!(err, CollectorError::NotFound(ref id) if id == "nobody_1"));
        assert_eq!(fs::read_to_string(log.log_path()).unwrap(), before);
        assert_eq!(log.interactions()[0].reward, Some(0.2));
    }

    #[test]
    fn out_of_range_rewards_are_rejected() {
        let dir = temp_data_dir("invalid_reward");
        let mut log = InteractionLog::open(&dir).unwrap();
        let id = record_simple(&mut log, "alice", "task_create", None);

        assert!(matches!(
            log.set_reward(&id, 1.5, None),
            Err(CollectorError::InvalidReward(_))
        ));
        assert!(matches!(
            log.record("alice", "task_create", "a", "b", None, Some(f64::NAN)),
            Err(CollectorError::InvalidReward(_))
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn corrupt_line_fails_load() {
        let dir = temp_data_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let mut log = InteractionLog::open(&dir).unwrap();
        record_simple(&mut log, "alice", "task_create", None);
        let mut file = OpenOptions::new().append(true).open(log.log_path()).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = InteractionLog::open(&dir).unwrap_err();
        assert!(matches!(err, CollectorError::Corrupt { line: 3, .. }));
    }

    #[test]
    fn training_data_threshold_filters_unrewarded_and_low() {
        let dir = temp_data_dir("training");
        let mut log = InteractionLog::open(&dir).unwrap();
        record_simple(&mut log, "a", "task_create", Some(0.9));
        record_simple(&mut log, "b", "task_create", Some(0.4));
        record_simple(&mut log, "c", "task_create", None);
        record_simple(&mut log, "d", "task_create", Some(0.5));

        let filtered: Vec<_> = log.training_data(Some(0.5)).collect();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|s| s.reward >= 0.5));

        let all: Vec<_> = log.training_data(None).collect();
        assert_eq!(all.len(), 4);
        assert!(all[2].reward.abs() < f64::EPSILON);

        // Restartable.
        assert_eq!(log.training_data(None).count(), 4);
    }

    #[test]
    fn statistics_average_over_rewarded_only() {
        let dir = temp_data_dir("stats");
        let mut log = InteractionLog::open(&dir).unwrap();
        record_simple(&mut log, "a", "calendar_create", Some(1.0));
        record_simple(&mut log, "b", "task_create", Some(-0.5));
        record_simple(&mut log, "c", "task_create", None);

        let stats = log.statistics();
        assert_eq!(stats.total_interactions, 3);
        assert_eq!(stats.rewarded_count, 2);
        assert!((stats.average_reward - 0.25).abs() < 1e-12);
        assert_eq!(stats.interactions_by_task.get("task_create"), Some(&2));
        assert_eq!(stats.interactions_by_task.get("calendar_create"), Some(&1));
    }

    #[test]
    fn statistics_of_empty_log() {
        let dir = temp_data_dir("stats_empty");
        let log = InteractionLog::open(&dir).unwrap();
        let stats = log.statistics();
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn sink_receives_steps_and_rewards() {
        let dir = temp_data_dir("sink");
        let sink = Arc::new(RecordingSink::default());
        let mut log = InteractionLog::open(&dir).unwrap().with_sink(sink.clone());

        let id = record_simple(&mut log, "alice", "calendar_create", None);
        log.set_reward(&id, 0.8, Some("good".into())).unwrap();

        let steps = sink.steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "line_bot_calendar_create");
        let rewards = sink.rewards.lock().unwrap();
        assert_eq!(rewards.len(), 1);
        assert!((rewards[0].reward - 0.8).abs() < f64::EPSILON);
        assert_eq!(
            rewards[0].metadata.as_ref().unwrap()["interaction_id"],
            json!(id)
        );
    }

    #[test]
    fn sink_failures_do_not_abort_mutations() {
        let dir = temp_data_dir("failing_sink");
        let mut log = InteractionLog::open(&dir)
            .unwrap()
            .with_sink(Arc::new(FailingSink));

        let id = record_simple(&mut log, "alice", "calendar_create", None);
        log.set_reward(&id, -1.0, None).unwrap();
        assert_eq!(log.get(&id).unwrap().reward, Some(-1.0));
    }

    #[test]
    fn append_and_amend_leave_forwarding_to_the_caller() {
        let dir = temp_data_dir("append");
        let sink = Arc::new(RecordingSink::default());
        let mut log = InteractionLog::open(&dir).unwrap().with_sink(sink.clone());

        let (id, step) = log
            .append(
                "alice",
                "reminder_set",
                "10分前に通知して",
                "⏰ 設定しました",
                None,
                None,
            )
            .unwrap();
        let event = log.amend(&id, 0.7, None).unwrap();
        assert!(sink.steps.lock().unwrap().is_empty());
        assert!(sink.rewards.lock().unwrap().is_empty());
        assert_eq!(step.name, "line_bot_reminder_set");
        assert_eq!(step.input, "10分前に通知して");
        assert_eq!(log.get(&id).unwrap().reward, Some(0.7));

        forward_step(sink.as_ref(), &id, &step);
        forward_reward(sink.as_ref(), &id, &event);
        assert_eq!(sink.steps.lock().unwrap().as_slice(), &[step]);
        assert_eq!(sink.rewards.lock().unwrap().as_slice(), &[event]);
    }

    #[test]
    fn unlisted_task_types_are_recorded() {
        let dir = temp_data_dir("unlisted_task");
        let mut log = InteractionLog::open(&dir).unwrap();
        assert!(!is_known_task_type("weather"));
        record_simple(&mut log, "alice", "weather", None);

        let reopened = InteractionLog::open(&dir).unwrap();
        assert_eq!(reopened.statistics().interactions_by_task.get("weather"), Some(&1));
    }
}
