//! Process resource sampling.

use std::time::Duration;

use st_types::ResourceUsage;

/// Point-in-time usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub rss_bytes: u64,
    /// Cumulative user + system CPU time.
    pub cpu_seconds: f64,
}

/// Reads the usage of a running process. Returns `None` when the process is
/// gone or the platform offers no way to look.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: u32) -> Option<ResourceSample>;
}

/// Sampler backed by `/proc/<pid>/status` and `/proc/<pid>/stat`.
#[derive(Debug, Clone)]
pub struct ProcfsSampler {
    clock_ticks_per_sec: f64,
}

impl ProcfsSampler {
    /// Kernel USER_HZ on every mainstream Linux architecture.
    pub const DEFAULT_CLOCK_TICKS: f64 = 100.0;

    pub fn new() -> Self {
        Self {
            clock_ticks_per_sec: Self::DEFAULT_CLOCK_TICKS,
        }
    }
}

impl Default for ProcfsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcfsSampler {
    #[cfg(target_os = "linux")]
    fn sample(&self, pid: u32) -> Option<ResourceSample> {
        let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        Some(ResourceSample {
            rss_bytes: parse_vm_rss(&status)?,
            cpu_seconds: parse_cpu_ticks(&stat)? as f64 / self.clock_ticks_per_sec,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self, _pid: u32) -> Option<ResourceSample> {
        None
    }
}

/// Sampler that never observes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSampler;

impl ResourceSampler for NullSampler {
    fn sample(&self, _pid: u32) -> Option<ResourceSample> {
        None
    }
}

/// `VmRSS` from a `/proc/<pid>/status` dump, in bytes.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    let multiplier = match fields.next().map(str::to_ascii_lowercase).as_deref() {
        Some("kb") | None => 1024,
        Some("mb") => 1024 * 1024,
        Some("b") => 1,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

/// `utime + stime` from a `/proc/<pid>/stat` line, in clock ticks.
pub fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces and parentheses; fields resume
    // after the last ')'. Field 3 (state) is then index 0.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Folds periodic samples into a [`ResourceUsage`].
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    interval: Duration,
    usage: ResourceUsage,
}

impl UsageAccumulator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            usage: ResourceUsage::default(),
        }
    }

    pub fn add(&mut self, sample: ResourceSample) {
        let usage = &mut self.usage;
        usage.peak_memory_bytes = usage.peak_memory_bytes.max(sample.rss_bytes);
        usage.memory_mb_seconds +=
            sample.rss_bytes as f64 / (1024.0 * 1024.0) * self.interval.as_secs_f64();
        usage.cpu_seconds = usage.cpu_seconds.max(sample.cpu_seconds);
        usage.samples += 1;
    }

    pub fn finish(self) -> ResourceUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tjava\nState:\tS (sleeping)\nVmPeak:\t 3000000 kB\nVmRSS:\t  524288 kB\nThreads:\t42\n";

    const STAT: &str = "4242 (java (main)) S 1 4242 4242 0 -1 4194560 12345 0 0 0 250 50 0 0 20 0 42 0 100 3000000000 131072";

    #[test]
    fn parses_vm_rss_in_kilobytes() {
        assert_eq!(parse_vm_rss(STATUS), Some(512 * 1024 * 1024));
        assert_eq!(parse_vm_rss("Name:\tzombie\n"), None);
    }

    #[test]
    fn parses_cpu_ticks_after_command_name() {
        assert_eq!(parse_cpu_ticks(STAT), Some(300));
        assert_eq!(parse_cpu_ticks("garbage"), None);
    }

    #[test]
    fn accumulator_tracks_peak_area_and_cpu() {
        let mut acc = UsageAccumulator::new(Duration::from_millis(500));
        acc.add(ResourceSample {
            rss_bytes: 100 * 1024 * 1024,
            cpu_seconds: 0.5,
        });
        acc.add(ResourceSample {
            rss_bytes: 300 * 1024 * 1024,
            cpu_seconds: 1.25,
        });
        let usage = acc.finish();

        assert_eq!(usage.peak_memory_bytes, 300 * 1024 * 1024);
        assert_eq!(usage.memory_mb_seconds, 200.0);
        assert_eq!(usage.cpu_seconds, 1.25);
        assert_eq!(usage.samples, 2);
    }

    #[test]
    fn null_sampler_sees_nothing() {
        assert!(NullSampler.sample(std::process::id()).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn procfs_samples_current_process() {
        let sample = ProcfsSampler::new().sample(std::process::id()).unwrap();
        assert!(sample.rss_bytes > 0);
        assert!(sample.cpu_seconds >= 0.0);
        assert!(ProcfsSampler::new().sample(u32::MAX).is_none());
    }
}
