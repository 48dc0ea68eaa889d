// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Internal command metrics.
//!
//! This module is intentionally tiny: the client façade records per-command
//! latency and key/value sizes, and the backoffer records charged sleeps.
//!
//! The Prometheus integration is optional (feature `prometheus`). When
//! disabled, this module compiles to a no-op implementation.

#[cfg(feature = "prometheus")]
mod imp {
    use std::sync::OnceLock;
    use std::time::Duration;
    use std::time::Instant;

    use log::warn;
    use prometheus::register_histogram_vec;
    use prometheus::HistogramVec;

    struct Metrics {
        cmd_duration: Option<HistogramVec>,
        key_size: Option<HistogramVec>,
        value_size: Option<HistogramVec>,
        backoff_sleep: Option<HistogramVec>,
    }

    static METRICS: OnceLock<Metrics> = OnceLock::new();

    fn metrics() -> &'static Metrics {
        METRICS.get_or_init(Metrics::register)
    }

    impl Metrics {
        fn register_histogram_vec(
            name: &'static str,
            help: &'static str,
            labels: &'static [&'static str],
        ) -> Option<HistogramVec> {
            match register_histogram_vec!(name, help, labels) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("failed to register prometheus histogram vec {name}: {e:?}");
                    None
                }
            }
        }

        fn register() -> Metrics {
            Metrics {
                cmd_duration: Self::register_histogram_vec(
                    "rangekv_raw_cmd_duration_seconds",
                    "Bucketed histogram of raw command durations.",
                    &["type"],
                ),
                key_size: Self::register_histogram_vec(
                    "rangekv_raw_key_size_bytes",
                    "Bucketed histogram of raw command key sizes.",
                    &["type"],
                ),
                value_size: Self::register_histogram_vec(
                    "rangekv_raw_value_size_bytes",
                    "Bucketed histogram of raw command value sizes.",
                    &["type"],
                ),
                backoff_sleep: Self::register_histogram_vec(
                    "rangekv_backoff_sleep_seconds",
                    "Bucketed histogram of charged backoff sleeps.",
                    &["type"],
                ),
            }
        }
    }

    /// Observes the command duration when dropped. Commands whose contract
    /// distinguishes failures in the metric label call `fail` first.
    pub(crate) struct CmdTimer {
        cmd: &'static str,
        failed: bool,
        start: Instant,
    }

    impl CmdTimer {
        pub(crate) fn fail(&mut self) {
            self.failed = true;
        }
    }

    impl Drop for CmdTimer {
        fn drop(&mut self) {
            if let Some(cmd_duration) = &metrics().cmd_duration {
                let label = if self.failed {
                    format!("{}_error", self.cmd)
                } else {
                    self.cmd.to_owned()
                };
                cmd_duration
                    .with_label_values(&[label.as_str()])
                    .observe(self.start.elapsed().as_secs_f64());
            }
        }
    }

    pub(crate) fn observe_cmd_duration(cmd: &'static str) -> CmdTimer {
        CmdTimer {
            cmd,
            failed: false,
            start: Instant::now(),
        }
    }

    pub(crate) fn observe_key_size(cmd: &'static str, size: usize) {
        if let Some(key_size) = &metrics().key_size {
            key_size.with_label_values(&[cmd]).observe(size as f64);
        }
    }

    pub(crate) fn observe_value_size(cmd: &'static str, size: usize) {
        if let Some(value_size) = &metrics().value_size {
            value_size.with_label_values(&[cmd]).observe(size as f64);
        }
    }

    pub(crate) fn observe_backoff_sleep(name: &'static str, duration: Duration) {
        if let Some(backoff_sleep) = &metrics().backoff_sleep {
            backoff_sleep
                .with_label_values(&[name])
                .observe(duration.as_secs_f64());
        }
    }
}

#[cfg(not(feature = "prometheus"))]
mod imp {
    use std::time::Duration;

    pub(crate) struct CmdTimer;

    impl CmdTimer {
        pub(crate) fn fail(&mut self) {}
    }

    pub(crate) fn observe_cmd_duration(_cmd: &'static str) -> CmdTimer {
        CmdTimer
    }

    pub(crate) fn observe_key_size(_cmd: &'static str, _size: usize) {}

    pub(crate) fn observe_value_size(_cmd: &'static str, _size: usize) {}

    pub(crate) fn observe_backoff_sleep(_name: &'static str, _duration: Duration) {}
}

pub(crate) use imp::observe_backoff_sleep;
pub(crate) use imp::observe_cmd_duration;
pub(crate) use imp::observe_key_size;
pub(crate) use imp::observe_value_size;
