use storyboard_core::config::PipelineConfig;
use storyboard_core::events::TransitionEvent;
use storyboard_core::model::BudgetCategory;
use storyboard_core::storage::{RunReport, RunStats, SceneStatus, ShotOutcome};

use super::OutputFormat;

pub fn format_report(report: &RunReport, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Text => format_report_text(report),
    }
}

fn format_report_text(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run:      {}\n", report.run_id));
    out.push_str(&format!("Status:   {}\n", report.status));
    out.push_str(&format!(
        "Started:  {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    let elapsed = report.finished_at - report.started_at;
    out.push_str(&format!(
        "Duration: {:.1}s\n",
        elapsed.num_milliseconds() as f64 / 1000.0
    ));
    out.push_str(&format!(
        "Spent:    ${:.4} ({:.0}% of budget)\n",
        report.budget.total_spent(),
        report.budget.utilization() * 100.0
    ));

    out.push_str("\n--- Scenes ---\n");
    for scene in &report.scenes {
        let status = match scene.status {
            SceneStatus::Planned => format!("{} shots", scene.shot_count),
            SceneStatus::Unplannable => "unplannable".to_string(),
            SceneStatus::Skipped => "skipped".to_string(),
        };
        out.push_str(&format!("  scene {}: {status}", scene.scene_id));
        if let Some(reason) = &scene.reason {
            out.push_str(&format!(" ({reason})"));
        }
        out.push('\n');
    }

    if !report.shots.is_empty() {
        out.push_str(&format!("\n--- Shots ({}) ---\n", report.shots.len()));
        for shot in &report.shots {
            out.push_str(&format_shot_line(shot));
        }
    }
    out
}

fn format_shot_line(outcome: &ShotOutcome) -> String {
    let shot = &outcome.shot;
    let score = outcome
        .selected_score()
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "-".to_string());
    let marker = if shot.is_degraded() { " [degraded]" } else { "" };
    let action: String = shot.action.chars().take(48).collect();
    format!(
        "  {:<7} {:<9} score {score:<5} retries {}  {action}{marker}\n      {}\n",
        shot.id.to_string(),
        shot.state().to_string(),
        shot.retry_count(),
        shot.reason().unwrap_or("")
    )
}

pub fn format_stats(stats: &RunStats, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(stats).unwrap_or_default(),
        OutputFormat::Text => format_stats_text(stats),
    }
}

fn format_stats_text(stats: &RunStats) -> String {
    let mut out = String::new();
    out.push_str("Run Statistics\n");
    out.push_str("==============\n");
    out.push_str(&format!(
        "Scenes:          {} ({} unplannable)\n",
        stats.scenes, stats.scenes_unplannable
    ));
    out.push_str(&format!("Shots:           {}\n", stats.shots));
    out.push_str(&format!(
        "Accepted:        {} ({:.0}%)\n",
        stats.accepted,
        stats.accept_rate * 100.0
    ));
    out.push_str(&format!(
        "Abandoned:       {} ({} degraded)\n",
        stats.abandoned, stats.degraded
    ));
    out.push_str(&format!(
        "Retries:         {} total, {:.2} per shot\n",
        stats.total_retries, stats.avg_retries
    ));
    out.push_str(&format!(
        "Candidates:      {} ({} render failures)\n",
        stats.candidates, stats.render_failures
    ));
    out.push_str(&format!("Vision QA calls: {}\n", stats.vision_qa_calls));
    out.push_str(&format!("Memory entries:  {}\n", stats.memory_entries));
    out.push('\n');

    out.push_str("Spend:\n");
    for category in BudgetCategory::ALL {
        let spent = stats.spend.get(&category).copied().unwrap_or(0.0);
        out.push_str(&format!("  {:<10} ${spent:.4}\n", category.as_str()));
    }
    out.push_str(&format!(
        "  {:<10} ${:.4} ({:.0}% of budget)\n",
        "total",
        stats.total_spent,
        stats.utilization * 100.0
    ));
    out
}

pub fn format_events(events: &[&TransitionEvent], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(events).unwrap_or_default(),
        OutputFormat::Text => {
            if events.is_empty() {
                return "No transitions recorded.\n".to_string();
            }
            let mut out = String::new();
            for e in events {
                out.push_str(&format!(
                    "{}  {:<7} {} -> {}",
                    e.at.format("%H:%M:%S%.3f"),
                    e.shot_id.to_string(),
                    e.from,
                    e.to
                ));
                if !e.reason.is_empty() {
                    out.push_str(&format!("  ({})", e.reason));
                }
                out.push('\n');
            }
            out
        }
    }
}

pub fn format_config(config: &PipelineConfig, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(config).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = String::from("Config OK\n");
            out.push_str(&format!(
                "  variations:   {} per shot (max {})\n",
                config.variations_per_shot, config.max_variations
            ));
            out.push_str(&format!(
                "  retries:      {} (threshold {:.2})\n",
                config.max_retries, config.quality_threshold
            ));
            out.push_str(&format!(
                "  give up:      below {:.2} after a retry\n",
                config.give_up_below
            ));
            out.push_str(&format!(
                "  plan review:  {}\n",
                if config.review_plans { "on" } else { "off" }
            ));
            out.push_str(&format!(
                "  vision QA:    rate {:.2}, max {} per shot\n",
                config.vision_qa_sample_rate, config.max_vision_qa_per_shot
            ));
            out.push_str(&format!("  concurrency:  {}\n", config.concurrency));
            out.push_str("  budget:\n");
            for category in BudgetCategory::ALL {
                out.push_str(&format!(
                    "    {:<10} ${:.2}\n",
                    category.as_str(),
                    config.budget.limit(category)
                ));
            }
            if let Some(total) = config.budget.total {
                out.push_str(&format!("    {:<10} ${total:.2}\n", "total"));
            }
            out
        }
    }
}
