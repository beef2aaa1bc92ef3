/// Renders a second count as `D:HH:MM:SS`, `H:MM:SS` or `M:SS`.
pub fn format_time(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let secs = total_secs % 60;

    if days > 0 {
        format!("{days}:{hours:02}:{minutes:02}:{secs:02}")
    } else if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Push producers report fractional seconds; negative and NaN become zero.
pub fn format_time_f64(secs: f64) -> String {
    let whole = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format_time(whole)
}

/// Truncates `name` to at most `max_len` characters, ending in `…` when cut.
pub fn shorten(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let mut out: String = name.chars().take(max_len.saturating_sub(1)).collect();
    out.push('…');
    out
}
