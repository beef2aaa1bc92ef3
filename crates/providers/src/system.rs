use crate::SystemInfoSource;
use chrono::format::{Item, StrftimeItems};
use std::fmt::Write;
use sysinfo::System;
use tracing::warn;

pub const DEFAULT_CLOCK_FORMAT: &str = "%I:%M %p";

/// GPU utilisation as shown on the system line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuReading {
    /// No GPU library available on this host or build.
    Unavailable,
    /// The library is loaded but the read failed.
    Failed,
    Percent(u32),
}

impl std::fmt::Display for GpuReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuReading::Unavailable => f.write_str("N/A"),
            GpuReading::Failed => f.write_str("Err"),
            GpuReading::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// CPU, GPU and memory load plus a wall clock line.
pub struct SysinfoSource {
    sys: System,
    gpu: gpu::GpuReader,
    clock_format: String,
}

impl SysinfoSource {
    pub fn new(clock_format: impl Into<String>) -> Self {
        let mut sys = System::new();
        // cpu usage is a delta between refreshes; prime the first sample
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            gpu: gpu::GpuReader::new(),
            clock_format: checked_clock_format(clock_format.into()),
        }
    }
}

impl SystemInfoSource for SysinfoSource {
    fn system_info(&mut self) -> String {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpu = self.sys.global_cpu_usage();
        let ram = memory_percent(self.sys.used_memory(), self.sys.total_memory());
        let gpu = self.gpu.read();
        let clock = render_clock(&chrono::Local::now(), &self.clock_format);

        render_system_info(&clock, cpu, gpu, ram)
    }
}

/// Rejects patterns chrono cannot render, falling back to the default.
pub fn checked_clock_format(format: String) -> String {
    let invalid = StrftimeItems::new(&format).any(|item| matches!(item, Item::Error));
    if invalid {
        warn!(clock_format = %format, fallback = DEFAULT_CLOCK_FORMAT, "invalid clock format");
        DEFAULT_CLOCK_FORMAT.to_string()
    } else {
        format
    }
}

fn render_clock<Tz>(now: &chrono::DateTime<Tz>, format: &str) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    if write!(out, "{}", now.format(format)).is_err() {
        out.clear();
        let _ = write!(out, "{}", now.format(DEFAULT_CLOCK_FORMAT));
    }
    out
}

fn memory_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

pub fn render_system_info(clock: &str, cpu_percent: f32, gpu: GpuReading, ram_percent: f32) -> String {
    format!("🕒 {clock}\nCPU:{cpu_percent:.0}% | GPU:{gpu} | RAM:{ram_percent:.0}%")
}

#[cfg(feature = "nvml")]
mod gpu {
    use super::GpuReading;
    use nvml_wrapper::Nvml;
    use tracing::{info, warn};

    pub struct GpuReader {
        nvml: Option<Nvml>,
    }

    impl GpuReader {
        pub fn new() -> Self {
            let nvml = match Nvml::init() {
                Ok(nvml) => Some(nvml),
                Err(err) => {
                    info!(error = %err, "nvml unavailable; gpu load not reported");
                    None
                }
            };
            Self { nvml }
        }

        pub fn read(&mut self) -> GpuReading {
            let Some(nvml) = self.nvml.as_ref() else {
                return GpuReading::Unavailable;
            };
            match nvml.device_by_index(0).and_then(|dev| dev.utilization_rates()) {
                Ok(util) => GpuReading::Percent(util.gpu),
                Err(err) => {
                    warn!(error = %err, "gpu stat read failed");
                    GpuReading::Failed
                }
            }
        }
    }
}

#[cfg(not(feature = "nvml"))]
mod gpu {
    use super::GpuReading;

    pub struct GpuReader;

    impl GpuReader {
        pub fn new() -> Self {
            Self
        }

        pub fn read(&mut self) -> GpuReading {
            GpuReading::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_rounded_percentages() {
        assert_eq!(
            render_system_info("09:41 PM", 12.4, GpuReading::Percent(33), 67.6),
            "🕒 09:41 PM\nCPU:12% | GPU:33% | RAM:68%"
        );
        assert_eq!(
            render_system_info("09:41 PM", 1.0, GpuReading::Unavailable, 2.0),
            "🕒 09:41 PM\nCPU:1% | GPU:N/A | RAM:2%"
        );
        assert_eq!(
            render_system_info("09:41 PM", 1.0, GpuReading::Failed, 2.0),
            "🕒 09:41 PM\nCPU:1% | GPU:Err | RAM:2%"
        );
    }

    #[test]
    fn memory_percent_handles_zero_total() {
        assert_eq!(memory_percent(5, 0), 0.0);
        assert_eq!(memory_percent(1, 4), 25.0);
    }

    #[test]
    fn unknown_clock_specifier_falls_back() {
        assert_eq!(checked_clock_format("%I:%M %Q".to_string()), DEFAULT_CLOCK_FORMAT);
        assert_eq!(checked_clock_format("%H:%M".to_string()), "%H:%M");

        let mut source = SysinfoSource::new("%I:%M %Q");
        let info = source.system_info();
        assert!(info.starts_with("🕒 "));
        assert!(info.contains(" | GPU:"));
    }

    #[test]
    fn clock_render_never_panics_on_bad_pattern() {
        let at = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 21, 5, 0).unwrap();
        assert_eq!(render_clock(&at, "%H:%M"), "21:05");
        assert_eq!(render_clock(&at, "%H %Q"), "09:05 PM");
    }

    #[test]
    fn live_reading_has_both_lines() {
        let mut source = SysinfoSource::new("%H:%M");
        let info = source.system_info();
        let mut lines = info.lines();
        assert!(lines.next().unwrap().starts_with("🕒 "));
        assert!(lines.next().unwrap().starts_with("CPU:"));
    }
}
