//! Consumer fleet sizing algorithms.
//!
//! An algorithm recommends a total process count for a group on every
//! supervisor tick. `ConstantAutoscale` is a fixed floor; `PredictiveAutoscale`
//! samples queue depth and only scales up while the backlog is growing over
//! both a short and a long window, so a transient spike does not spawn a
//! fleet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::config::AutoscaleConfig;

/// Recommends the total number of consumer processes for a group.
#[async_trait]
pub trait AutoscaleAlgorithm: Send {
    async fn recommended_processes(&mut self, current: usize) -> usize;
}

/// Always recommends the configured floor.
pub struct ConstantAutoscale {
    floor: usize,
}

impl ConstantAutoscale {
    pub fn new(floor: usize) -> Self {
        Self { floor: floor.max(1) }
    }
}

#[async_trait]
impl AutoscaleAlgorithm for ConstantAutoscale {
    async fn recommended_processes(&mut self, _current: usize) -> usize {
        self.floor
    }
}

/// Depth-trend autoscaler.
///
/// Samples the combined depth of the group's queues each tick, keeps a
/// long-window history, and re-evaluates at most once per short window.
/// When both the short- and long-window trends are positive the backlog is
/// genuinely outpacing the fleet and one more process is recommended (capped
/// at the group maximum); otherwise the recommendation drops back to the
/// minimum and burst processes drain away.
pub struct PredictiveAutoscale {
    broker: Arc<dyn Broker>,
    queues: Vec<String>,
    minimum: usize,
    maximum: usize,
    short_window: Duration,
    long_window: Duration,
    measurements: VecDeque<(Instant, u64)>,
    last_evaluation: Option<Instant>,
    last_recommendation: usize,
}

impl PredictiveAutoscale {
    pub fn new(
        broker: Arc<dyn Broker>,
        queues: Vec<String>,
        minimum: usize,
        maximum: usize,
        config: &AutoscaleConfig,
    ) -> Self {
        Self {
            broker,
            queues,
            minimum,
            maximum,
            short_window: Duration::from_secs(config.short_window_seconds),
            long_window: Duration::from_secs(config.long_window_seconds),
            measurements: VecDeque::new(),
            last_evaluation: None,
            last_recommendation: minimum,
        }
    }

    /// Record a depth sample and produce a recommendation. Split from the
    /// broker fetch so the decision logic is testable with synthetic clocks.
    fn observe(&mut self, now: Instant, depth: u64, current: usize) -> usize {
        self.measurements.push_back((now, depth));
        while let Some(&(taken, _)) = self.measurements.front() {
            if now.duration_since(taken) > self.long_window {
                self.measurements.pop_front();
            } else {
                break;
            }
        }

        if let Some(last) = self.last_evaluation {
            if now.duration_since(last) < self.short_window {
                return self.last_recommendation;
            }
        }
        self.last_evaluation = Some(now);

        let short_trend = self.trend(now, self.short_window, depth);
        let long_trend = self.trend(now, self.long_window, depth);
        debug!(
            queues = ?self.queues,
            depth,
            short_trend,
            long_trend,
            "autoscale evaluation"
        );

        self.last_recommendation = if short_trend > 0 && long_trend > 0 {
            (current + 1).min(self.maximum)
        } else {
            self.minimum
        };
        self.last_recommendation
    }

    /// Depth change over the given window: now minus the oldest sample
    /// still inside it. Zero when the window holds a single sample.
    fn trend(&self, now: Instant, window: Duration, depth_now: u64) -> i64 {
        self.measurements
            .iter()
            .find(|(taken, _)| now.duration_since(*taken) <= window)
            .map(|&(_, oldest)| depth_now as i64 - oldest as i64)
            .unwrap_or(0)
    }

    async fn sample_depth(&self) -> Option<u64> {
        let mut total = 0;
        for queue in &self.queues {
            match self.broker.queue_len(queue).await {
                Ok(len) => total += len,
                Err(err) => {
                    warn!(queue = %queue, error = %err, "depth sample failed, skipping tick");
                    return None;
                }
            }
        }
        Some(total)
    }
}

#[async_trait]
impl AutoscaleAlgorithm for PredictiveAutoscale {
    async fn recommended_processes(&mut self, current: usize) -> usize {
        match self.sample_depth().await {
            Some(depth) => self.observe(Instant::now(), depth, current),
            None => self.last_recommendation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockBroker;

    fn predictive(minimum: usize, maximum: usize) -> PredictiveAutoscale {
        let config = AutoscaleConfig {
            short_window_seconds: 60,
            long_window_seconds: 900,
            ..AutoscaleConfig::default()
        };
        PredictiveAutoscale::new(
            Arc::new(MockBroker::new()),
            vec!["q".to_string()],
            minimum,
            maximum,
            &config,
        )
    }

    #[tokio::test]
    async fn constant_recommends_its_floor() {
        let mut autoscale = ConstantAutoscale::new(3);
        assert_eq!(autoscale.recommended_processes(1).await, 3);
        assert_eq!(autoscale.recommended_processes(10).await, 3);

        // A zero floor is lifted to one.
        let mut degenerate = ConstantAutoscale::new(0);
        assert_eq!(degenerate.recommended_processes(0).await, 1);
    }

    #[test]
    fn growing_backlog_on_both_windows_scales_up_by_one() {
        let mut autoscale = predictive(2, 6);
        let start = Instant::now();

        autoscale.observe(start, 100, 3);
        autoscale.observe(start + Duration::from_secs(30), 180, 3);
        let later = start + Duration::from_secs(61);
        assert_eq!(autoscale.observe(later, 250, 3), 4);
    }

    #[test]
    fn shrinking_backlog_recommends_the_minimum() {
        let mut autoscale = predictive(2, 6);
        let start = Instant::now();

        autoscale.observe(start, 500, 5);
        autoscale.observe(start + Duration::from_secs(30), 300, 5);
        let later = start + Duration::from_secs(61);
        assert_eq!(autoscale.observe(later, 100, 5), 2);
    }

    #[test]
    fn recommendation_is_capped_at_the_maximum() {
        let mut autoscale = predictive(1, 4);
        let start = Instant::now();

        autoscale.observe(start, 10, 4);
        autoscale.observe(start + Duration::from_secs(30), 200, 4);
        let later = start + Duration::from_secs(61);
        assert_eq!(autoscale.observe(later, 500, 4), 4);
    }

    #[test]
    fn evaluations_are_rate_limited_to_the_short_window() {
        let mut autoscale = predictive(1, 6);
        let start = Instant::now();

        autoscale.observe(start, 10, 2);
        // Growing depth, but inside the short window: the previous
        // recommendation stands.
        let soon = start + Duration::from_secs(10);
        assert_eq!(autoscale.observe(soon, 500, 2), 1);

        let later = start + Duration::from_secs(61);
        assert_eq!(autoscale.observe(later, 900, 2), 3);
    }

    #[test]
    fn samples_beyond_the_long_window_are_discarded() {
        let mut autoscale = predictive(1, 6);
        let start = Instant::now();

        autoscale.observe(start, 1_000, 2);
        let much_later = start + Duration::from_secs(1_000);
        // The old high sample is gone; a single fresh sample has no trend.
        assert_eq!(autoscale.observe(much_later, 500, 2), 1);
        assert_eq!(autoscale.measurements.len(), 1);
    }
}
