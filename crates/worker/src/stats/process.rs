//! Process resource usage via `/proc` and `getrusage`.

use std::time::Instant;

/// One reading of this process's resource usage. Fields are `None` when
/// the platform does not expose them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    pub memory_bytes: Option<u64>,
    pub cpu_seconds: Option<f64>,
    /// CPU time over wall time since the previous sample, in percent of
    /// one core.
    pub cpu_percent: Option<f64>,
}

/// Samples usage and derives CPU percent from consecutive samples.
#[derive(Debug, Default)]
pub struct ProcessSampler {
    previous: Option<(Instant, f64)>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self) -> ProcessUsage {
        let now = Instant::now();
        let cpu_seconds = cpu_seconds();

        let cpu_percent = match (self.previous, cpu_seconds) {
            (Some((then, cpu_then)), Some(cpu_now)) => {
                let wall = now.duration_since(then).as_secs_f64();
                (wall > 0.0).then(|| ((cpu_now - cpu_then).max(0.0) / wall) * 100.0)
            }
            _ => None,
        };
        if let Some(cpu) = cpu_seconds {
            self.previous = Some((now, cpu));
        }

        ProcessUsage {
            memory_bytes: resident_memory_bytes(),
            cpu_seconds,
            cpu_percent,
        }
    }
}

/// Current RSS from `/proc/self/statm`, falling back to peak RSS.
fn resident_memory_bytes() -> Option<u64> {
    statm_resident_bytes().or_else(peak_resident_bytes)
}

fn statm_resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * page_size()?)
}

#[cfg(unix)]
fn page_size() -> Option<u64> {
    // Safety: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (size > 0).then_some(size as u64)
}

#[cfg(not(unix))]
fn page_size() -> Option<u64> {
    None
}

#[cfg(unix)]
fn rusage_self() -> Option<libc::rusage> {
    use std::mem::MaybeUninit;

    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    // Safety: getrusage fills the struct on success.
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    (ret == 0).then(|| unsafe { usage.assume_init() })
}

#[cfg(unix)]
fn cpu_seconds() -> Option<f64> {
    let usage = rusage_self()?;
    let secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some(secs(usage.ru_utime) + secs(usage.ru_stime))
}

#[cfg(unix)]
fn peak_resident_bytes() -> Option<u64> {
    let usage = rusage_self()?;
    let max_rss = u64::try_from(usage.ru_maxrss).ok()?;
    // Bytes on macOS, kilobytes everywhere else.
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

#[cfg(not(unix))]
fn cpu_seconds() -> Option<f64> {
    None
}

#[cfg(not(unix))]
fn peak_resident_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_no_cpu_percent() {
        let mut sampler = ProcessSampler::new();
        assert_eq!(sampler.sample().cpu_percent, None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_reports_memory_and_cpu() {
        let mut sampler = ProcessSampler::new();
        let first = sampler.sample();
        assert!(first.memory_bytes.unwrap() > 0);
        assert!(first.cpu_seconds.unwrap() >= 0.0);

        // Burn a little CPU so the delta is measurable.
        let mut x = 0u64;
        for i in 0..2_000_000u64 {
            x = x.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(x);

        let second = sampler.sample();
        assert!(second.cpu_percent.unwrap() >= 0.0);
    }
}
