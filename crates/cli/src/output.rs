//! Terminal rendering for events and statistics

use anyhow::Result;
use dirwatch::{EventKind, Statistics, WatchEvent, WatchMode};
use owo_colors::OwoColorize;

/// How events are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

fn label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Created => "created",
        EventKind::Changed => "changed",
        EventKind::Deleted => "deleted",
    }
}

fn mode_name(mode: WatchMode) -> &'static str {
    match mode {
        WatchMode::Unknown => "none",
        WatchMode::Stat => "stat",
        WatchMode::Inotify => "inotify",
        WatchMode::Daemon => "daemon",
        WatchMode::Native => "native",
    }
}

/// One event as a line, without the trailing newline
pub fn event_line(event: &WatchEvent, format: Format) -> Result<String> {
    match format {
        Format::Json => Ok(serde_json::to_string(event)?),
        Format::Text => {
            // Pad before coloring so columns line up
            let tag = format!("{:<8}", label(event.kind));
            let tag = match event.kind {
                EventKind::Created => tag.green().to_string(),
                EventKind::Changed => tag.yellow().to_string(),
                EventKind::Deleted => tag.red().to_string(),
            };
            Ok(format!("{} {}", tag, event.path.display()))
        }
    }
}

/// Multi-line statistics summary
pub fn statistics(stats: &Statistics, format: Format) -> Result<String> {
    if format == Format::Json {
        return Ok(serde_json::to_string(stats)?);
    }

    let mut out = String::new();
    let interval = stats
        .poll_interval_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "off".to_string());
    out.push_str(&format!(
        "{} {} backend, poll {}, {} entries\n",
        "stats:".bold(),
        stats.current_backend,
        interval,
        stats.entries.len()
    ));

    for entry in &stats.entries {
        let state = if entry.exists { "" } else { " (missing)" };
        out.push_str(&format!(
            "  {} [{}] {} client(s), {} dependent(s){}\n",
            entry.path.display(),
            mode_name(entry.backend),
            entry.clients.len(),
            entry.dependents.len(),
            state.dimmed()
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirwatch::Method;
    use std::path::PathBuf;

    fn event(kind: EventKind) -> WatchEvent {
        WatchEvent {
            path: PathBuf::from("/tmp/notes.txt"),
            kind,
        }
    }

    #[test]
    fn test_json_line() {
        let line = event_line(&event(EventKind::Deleted), Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["path"], "/tmp/notes.txt");
        assert_eq!(value["kind"], "deleted");
    }

    #[test]
    fn test_text_line_mentions_kind_and_path() {
        let line = event_line(&event(EventKind::Created), Format::Text).unwrap();
        assert!(line.contains("created"));
        assert!(line.ends_with("/tmp/notes.txt"));
    }

    #[test]
    fn test_statistics_text() {
        let stats = Statistics {
            current_backend: Method::Stat,
            poll_interval_ms: Some(500),
            entries: Vec::new(),
        };
        let text = statistics(&stats, Format::Text).unwrap();
        assert!(text.contains("stat backend"));
        assert!(text.contains("poll 500ms"));
        assert!(text.contains("0 entries"));
    }

    #[test]
    fn test_statistics_json() {
        let stats = Statistics {
            current_backend: Method::Inotify,
            poll_interval_ms: None,
            entries: Vec::new(),
        };
        let json = statistics(&stats, Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["poll_interval_ms"].is_null());
        assert!(value["entries"].as_array().unwrap().is_empty());
    }
}
