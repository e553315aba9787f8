//! Synthetic message traffic for exercising a rate limiter.
//!
//! The simulation plays a stream of messages from a small pool of users
//! through a [`RateLimiter`], in one or more phases separated by a pause, and
//! records which messages were admitted and how long denied users had to wait.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::info;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// What happened to a single simulated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Sequential message id, starting at 1 and continuing across phases
    pub message_id: u32,
    /// Sending user
    pub user_id: u32,
    /// Whether the limiter admitted the message
    pub admitted: bool,
    /// Time until the user may send again, as reported after the attempt
    pub wait: Duration,
}

/// Collected outcomes of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Outcomes in sending order
    pub outcomes: Vec<MessageOutcome>,
}

impl SimulationReport {
    /// Number of admitted messages.
    pub fn admitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.admitted).count()
    }

    /// Number of denied messages.
    pub fn denied(&self) -> usize {
        self.outcomes.len() - self.admitted()
    }
}

/// Drives synthetic traffic through a limiter.
pub struct Simulation {
    config: SimulationConfig,
    limiter: Arc<dyn RateLimiter>,
}

impl Simulation {
    /// Create a simulation after validating its traffic shape.
    pub fn new(config: SimulationConfig, limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, limiter })
    }

    /// Play every phase and return the collected outcomes.
    pub async fn run(&self) -> SimulationReport {
        let mut report = SimulationReport::default();

        for phase in 0..self.config.phases {
            if phase > 0 {
                let pause = self.config.pause_between_phases();
                info!(pause = ?pause, "Waiting before next phase");
                tokio::time::sleep(pause).await;
            }

            info!(phase = phase + 1, "Simulating message stream");

            for offset in 1..=self.config.messages_per_phase {
                let message_id = phase * self.config.messages_per_phase + offset;
                report.outcomes.push(self.send(message_id));
                tokio::time::sleep(self.jitter()).await;
            }
        }

        info!(
            admitted = report.admitted(),
            denied = report.denied(),
            "Simulation finished"
        );
        report
    }

    /// Send one message through the limiter.
    pub fn send(&self, message_id: u32) -> MessageOutcome {
        let user_id = message_id % self.config.users + 1;
        let key = user_id.to_string();

        let admitted = self.limiter.record(&key);
        let wait = self.limiter.time_until_allowed(&key);

        if admitted {
            info!(message = message_id, user = user_id, "Message admitted");
        } else {
            info!(
                message = message_id,
                user = user_id,
                wait = %format!("{:.1}s", wait.as_secs_f64()),
                "Message rate limited"
            );
        }

        MessageOutcome {
            message_id,
            user_id,
            admitted,
            wait,
        }
    }

    fn jitter(&self) -> Duration {
        let millis =
            rand::thread_rng().gen_range(self.config.min_delay_ms..=self.config.max_delay_ms);
        Duration::from_millis(millis)
    }
}
