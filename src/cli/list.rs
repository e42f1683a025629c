use crate::config::AgentPaths;
use crate::storage::{Session, SessionStore};
use console::style;

pub async fn list(paths: &AgentPaths) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(paths).await?;
    let sessions = store.list_sessions().await?;

    if sessions.is_empty() {
        println!("No sessions found");
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "{:<38} {:<20} {:>8} {:>10} {:<9} {:<14} {}",
            "SESSION", "CREATED", "LINES", "SIZE", "UPLOADED", "MODE", "TAG"
        ))
        .bold()
    );
    for session in &sessions {
        println!("{}", format_row(session));
    }
    Ok(())
}

fn format_row(session: &Session) -> String {
    let uploaded = if session.is_uploaded { "yes" } else { "no" };
    format!(
        "{:<38} {:<20} {:>8} {:>10} {:<9} {:<14} {}",
        session.session_id,
        session.created_at.format("%Y-%m-%d %H:%M:%S"),
        session.line_count,
        format_size(session.size_bytes),
        uploaded,
        session.mode.as_str(),
        session.tag.as_deref().unwrap_or("-"),
    )
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionMode;
    use chrono::TimeZone;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_row() {
        let mut session = Session::new("abc", SessionMode::Anonymous, None);
        session.created_at = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        session.line_count = 12;
        session.size_bytes = 2048;
        let row = format_row(&session);
        assert!(row.starts_with("abc "));
        assert!(row.contains("2025-01-02 03:04:05"));
        assert!(row.contains("2.0 KB"));
        assert!(row.contains("anonymous"));
        assert!(row.ends_with(" -"));
    }
}
