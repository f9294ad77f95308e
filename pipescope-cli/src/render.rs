//! Plain-text rendering of the dashboard view.

use pipescope_core::view::ViewStats;
use pipescope_core::{DashboardView, EngineNotice, NodeView, NoticeKind};
use std::fmt::Write;

const BAR_WIDTH: usize = 20;

/// Render the view as a compact table with a one-line header.
pub fn render_table(view: &DashboardView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", header(view));

    let id_width = view
        .nodes
        .iter()
        .map(|n| display_name(n).chars().count())
        .max()
        .unwrap_or(0)
        .max(5);

    for node in &view.nodes {
        let marker = if view.selected.as_deref() == Some(node.id.as_str()) {
            '>'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{marker} {:<id_width$}  {:<7}  {}",
            display_name(node),
            node.status.to_string(),
            progress(node),
        );
    }

    let active = view.edges.iter().filter(|e| e.is_active).count();
    let _ = write!(out, "  edges: {} ({} active)", view.edges.len(), active);

    if let Some(notice) = &view.notice {
        let _ = write!(out, "\n  ! {}", notice.message);
    }
    out
}

pub fn render_notice(notice: &EngineNotice) -> String {
    let label = match notice.kind {
        NoticeKind::FetchFailed => "fetch failed",
        NoticeKind::MalformedEvent => "bad event",
        NoticeKind::UpstreamError => "upstream",
    };
    format!("[{}] {}: {}", notice.at.format("%H:%M:%S"), label, notice.message)
}

fn header(view: &DashboardView) -> String {
    let ViewStats {
        snapshots_applied,
        events_applied,
        events_ignored,
        ..
    } = view.stats;
    let playing = if view.playing { "playing" } else { "paused" };
    let snapshot = view
        .snapshot_seq
        .map(|seq| format!("snapshot #{seq}"))
        .unwrap_or_else(|| "no snapshot".to_string());
    format!(
        "pipescope  {}  {}  {}  snapshots {}  events {} ({} ignored)",
        view.connection, playing, snapshot, snapshots_applied, events_applied, events_ignored
    )
}

fn display_name(node: &NodeView) -> &str {
    node.label.as_deref().unwrap_or(&node.id)
}

fn progress(node: &NodeView) -> String {
    let (Some(processed), Some(total), Some(percent)) =
        (node.processed, node.total, node.progress_percent)
    else {
        return String::new();
    };
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let approx = if node.simulated { "~" } else { "" };
    format!(
        "[{}{}] {approx}{processed}/{total} {percent:.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
    )
}
