use crate::cache::current_progress;
use chatbox_status_core::format::{format_time, format_time_f64, shorten};
use chatbox_status_core::{DisplayMode, PlaybackSnapshot, PushRecord};
use std::time::{Duration, Instant};

pub const NOTHING_PLAYING: &str = "⏸️ Nothing playing";
pub const NO_VIDEO: &str = "⏸️ No video detected";

const SECTION_SEPARATOR: &str = "\n\n";

/// Playback section: track lines while playing, a short "nothing playing"
/// notice during the grace window after a stop, otherwise empty.
pub fn render_playback(
    snapshot: &PlaybackSnapshot,
    now: Instant,
    paused_grace: Duration,
    max_name_len: usize,
) -> String {
    if snapshot.is_playing {
        let progress = current_progress(snapshot, now);
        return format!(
            "🎵 {}\n👤 {}\n⌛ {} / {}",
            shorten(&snapshot.track_name, max_name_len),
            shorten(&snapshot.artist_name, max_name_len),
            format_time(progress),
            format_time(snapshot.duration_secs),
        );
    }

    match snapshot.stopped_at {
        Some(at) if now.saturating_duration_since(at) < paused_grace => NOTHING_PLAYING.to_string(),
        _ => String::new(),
    }
}

/// Push section, empty unless the record is fresh and carries a title.
pub fn render_push(
    record: &PushRecord,
    now: Instant,
    freshness: Duration,
    max_name_len: usize,
) -> String {
    if record.title.is_empty() || !record.is_fresh(now, freshness) {
        return String::new();
    }

    let mut lines = vec![format!("📺 {}", shorten(&record.title, max_name_len))];
    if !record.source.is_empty() {
        lines.push(format!("👤 {}", shorten(&record.source, max_name_len)));
    }
    let total = if record.is_live {
        "LIVE".to_string()
    } else {
        format_time_f64(record.duration_secs)
    };
    lines.push(format!("⌛ {} / {}", format_time_f64(record.position_secs), total));
    lines.join("\n")
}

pub fn compose(mode: DisplayMode, system_info: &str, playback: &str, push: &str) -> String {
    match mode {
        DisplayMode::Full => {
            let media = if !push.is_empty() { push } else { playback };
            if media.is_empty() {
                system_info.to_string()
            } else {
                [system_info, media].join(SECTION_SEPARATOR)
            }
        }
        DisplayMode::System => system_info.to_string(),
        DisplayMode::Media => fallback(push, NO_VIDEO),
        DisplayMode::Spotify => fallback(playback, NOTHING_PLAYING),
    }
}

fn fallback(section: &str, placeholder: &str) -> String {
    if section.is_empty() {
        placeholder.to_string()
    } else {
        section.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbox_status_core::PushUpdate;

    const GRACE: Duration = Duration::from_secs(10);
    const FRESH: Duration = Duration::from_secs(10);

    fn push(title: &str, source: &str, live: bool, at: Instant) -> PushRecord {
        PushRecord::from_update(
            PushUpdate {
                title: title.to_string(),
                source: source.to_string(),
                duration_secs: 3_725.0,
                position_secs: 65.4,
                is_live: live,
            },
            at,
        )
    }

    #[test]
    fn push_section_layout() {
        let t = Instant::now();
        assert_eq!(
            render_push(&push("Talk", "Channel", false, t), t, FRESH, 60),
            "📺 Talk\n👤 Channel\n⌛ 1:05 / 1:02:05"
        );
        assert_eq!(
            render_push(&push("Stream", "", true, t), t, FRESH, 60),
            "📺 Stream\n⌛ 1:05 / LIVE"
        );
    }

    #[test]
    fn stale_or_untitled_push_is_empty() {
        let t = Instant::now();
        let rec = push("Talk", "Channel", false, t);
        assert!(render_push(&rec, t + FRESH, FRESH, 60).is_empty());
        assert!(render_push(&push("", "Channel", false, t), t, FRESH, 60).is_empty());
    }

    #[test]
    fn long_titles_are_shortened() {
        let t = Instant::now();
        let title = "t".repeat(80);
        let text = render_push(&push(&title, "c", false, t), t, FRESH, 20);
        let first = text.lines().next().unwrap();
        assert_eq!(first, format!("📺 {}…", "t".repeat(19)));
    }

    #[test]
    fn full_mode_prefers_push_over_playback() {
        assert_eq!(compose(DisplayMode::Full, "SYS", "PLAY", "PUSH"), "SYS\n\nPUSH");
        assert_eq!(compose(DisplayMode::Full, "SYS", "PLAY", ""), "SYS\n\nPLAY");
        assert_eq!(compose(DisplayMode::Full, "SYS", "", ""), "SYS");
    }

    #[test]
    fn single_source_modes_fall_back() {
        assert_eq!(compose(DisplayMode::System, "SYS", "PLAY", "PUSH"), "SYS");
        assert_eq!(compose(DisplayMode::Media, "SYS", "PLAY", ""), NO_VIDEO);
        assert_eq!(compose(DisplayMode::Media, "SYS", "", "PUSH"), "PUSH");
        assert_eq!(compose(DisplayMode::Spotify, "SYS", "", "PUSH"), NOTHING_PLAYING);
        assert_eq!(compose(DisplayMode::Spotify, "SYS", "PLAY", ""), "PLAY");
    }

    #[test]
    fn grace_window_after_stop() {
        let t = Instant::now();
        let snap = PlaybackSnapshot {
            fetched_at: Some(t),
            stopped_at: Some(t),
            ..Default::default()
        };

        assert_eq!(render_playback(&snap, t + Duration::from_secs(5), GRACE, 60), NOTHING_PLAYING);
        assert!(render_playback(&snap, t + Duration::from_secs(15), GRACE, 60).is_empty());
        assert!(render_playback(&PlaybackSnapshot::default(), t, GRACE, 60).is_empty());
    }
}
