//! Records a few calendar bot exchanges, rewards one of them and exports the
//! training snapshot.
//!
//! Run with: cargo run -p agentlern-collector --example collect_and_export [data_dir]

use agentlern_collector::InteractionLog;
use agentlern_core::ContextMap;
use serde_json::json;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "training_data".to_string());
    println!("=== agentlern: interaction collection ===\n");

    let mut log = InteractionLog::open(&data_dir)?;

    let exchanges = [
        (
            "calendar_create",
            "明日の午後3時に会議を入れて",
            "✅ 明日の15:00に「会議」を登録しました。",
        ),
        (
            "calendar_query",
            "今週の予定を教えて",
            "📅 今週の予定です:\n- 2/7 15:00 会議\n- 2/8 10:00 歯医者",
        ),
        (
            "task_create",
            "買い物リストに牛乳を追加",
            "✅ タスク「牛乳を買う」を追加しました。",
        ),
    ];

    let mut ids = Vec::new();
    for (task_type, message, response) in exchanges {
        let mut context = ContextMap::new();
        context.insert("source".to_string(), json!("example"));
        let id = log.record("example_user", task_type, message, response, Some(context), None)?;
        println!("📝 recorded {id} ({task_type})");
        ids.push(id);
    }

    if let Some(first) = ids.first() {
        log.set_reward(first, 1.0, Some("正確に処理された".to_string()))?;
        println!("👍 rewarded {first}");
    }

    println!("\n📊 Statistics:");
    println!("{}", serde_json::to_string_pretty(&log.statistics())?);

    let path = log.export(None)?;
    println!("\n💾 Exported snapshot to {}", path.display());

    Ok(())
}
