//! Aggregates run outcomes into the summary printed once every planned attempt has finished
//! (spec.md §9 supplement: "a summary of successes/failures/latency printed at the end of the
//! run", grounded on `NECROHammer.cpp`'s `Client::Shutdown`, which this implementation gives an
//! actual body to).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    UnknownAccount,
    WrongClientVersion,
    WrongPassword,
    TransportFailure,
}

struct Sample {
    outcome: Outcome,
    latency: Duration,
}

#[derive(Default)]
pub struct Report {
    samples: Vec<Sample>,
}

impl Report {
    pub fn new() -> Report {
        Report::default()
    }

    pub fn record(&mut self, outcome: Outcome, latency: Duration) {
        self.samples.push(Sample { outcome, latency });
    }

    pub fn attempts(&self) -> usize {
        self.samples.len()
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.samples.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn print(&self) {
        let attempts = self.attempts();
        let successes = self.count(Outcome::Success);

        println!("hammer run complete: {} attempts, {} successes, {} failures", attempts, successes, attempts - successes);

        for outcome in [
            Outcome::UnknownAccount,
            Outcome::WrongClientVersion,
            Outcome::WrongPassword,
            Outcome::TransportFailure,
        ] {
            let count = self.count(outcome);
            if count > 0 {
                println!("  {:?}: {}", outcome, count);
            }
        }

        if attempts == 0 {
            return;
        }

        let millis: Vec<f64> = self.samples.iter().map(|s| s.latency.as_secs_f64() * 1000.0).collect();
        let min = millis.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = millis.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = millis.iter().sum::<f64>() / millis.len() as f64;

        println!("  latency (ms): min={:.2} mean={:.2} max={:.2}", min, max, mean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_outcomes_and_bounds_latency_across_a_mixed_run() {
        let mut report = Report::new();
        report.record(Outcome::Success, Duration::from_millis(10));
        report.record(Outcome::WrongPassword, Duration::from_millis(30));
        report.record(Outcome::Success, Duration::from_millis(20));

        assert_eq!(report.attempts(), 3);
        assert_eq!(report.count(Outcome::Success), 2);
        assert_eq!(report.count(Outcome::WrongPassword), 1);
        assert_eq!(report.count(Outcome::TransportFailure), 0);
    }

    #[test]
    fn printing_an_empty_report_does_not_panic() {
        Report::new().print();
    }
}
