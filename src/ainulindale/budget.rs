//! Budget Tracker
//!
//! Accumulates the dollar cost and token usage reported by every
//! `llm.response` event, across the life of the process (`total_*`) and
//! per board run (`run_*`, reset on `board.started`). Crossing 70 % of
//! either ceiling publishes `budget.warning`; reaching 100 % publishes
//! `budget.exceeded`, which the board runner answers with a graceful
//! stop. A ceiling of zero disables that dimension.
//!
//! Totals are monotonic for the process lifetime — nothing ever
//! decrements them.

use crate::ainulindale::event_bus::{EngineEvent, EventBus, EventPayload, EventSubscriber};
use async_trait::async_trait;
use std::error::Error;
use std::sync::{Mutex, Weak};

/// Warning threshold as a fraction of either ceiling.
const WARNING_FRACTION: f64 = 0.70;

/// Spending ceilings. Zero means unlimited for that dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetLimits {
    pub max_dollars: f64,
    pub max_tokens: u64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy)]
pub struct BudgetSnapshot {
    pub max_dollars: f64,
    pub max_tokens: u64,
    pub total_dollars: f64,
    pub total_tokens: u64,
    pub run_dollars: f64,
    pub run_tokens: u64,
}

/// Standing relative to the ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStanding {
    Ok,
    Warning,
    Exceeded,
}

/// Outcome of recording one usage report.
#[derive(Debug, Clone, Copy)]
pub struct BudgetReport {
    pub standing: BudgetStanding,
    /// This report moved the tracker across the warning threshold.
    pub crossed_warning: bool,
    /// This report moved the tracker across the ceiling.
    pub crossed_exceeded: bool,
    pub snapshot: BudgetSnapshot,
}

#[derive(Default)]
struct BudgetState {
    total_dollars: f64,
    total_tokens: u64,
    run_dollars: f64,
    run_tokens: u64,
    warned: bool,
    exceeded: bool,
}

/// The process-wide budget tracker.
///
/// Subscribe it to the bus (wildcard) so it sees `llm.response` and
/// `board.started`; it publishes its own threshold events through the
/// weak bus handle.
pub struct BudgetTracker {
    limits: BudgetLimits,
    bus: Weak<EventBus>,
    state: Mutex<BudgetState>,
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits, bus: Weak<EventBus>) -> Self {
        Self {
            limits,
            bus,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Record one usage report and compute threshold crossings.
    pub fn record(&self, tokens: u64, dollars: f64) -> BudgetReport {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total_dollars += dollars;
        state.total_tokens += tokens;
        state.run_dollars += dollars;
        state.run_tokens += tokens;

        let dollar_fraction = fraction(state.total_dollars, self.limits.max_dollars);
        let token_fraction = fraction(state.total_tokens as f64, self.limits.max_tokens as f64);
        let worst = dollar_fraction.max(token_fraction);

        let standing = if worst >= 1.0 {
            BudgetStanding::Exceeded
        } else if worst >= WARNING_FRACTION {
            BudgetStanding::Warning
        } else {
            BudgetStanding::Ok
        };

        let crossed_exceeded = standing == BudgetStanding::Exceeded && !state.exceeded;
        let crossed_warning =
            standing == BudgetStanding::Warning && !state.warned && !crossed_exceeded;
        if worst >= WARNING_FRACTION {
            state.warned = true;
        }
        if standing == BudgetStanding::Exceeded {
            state.exceeded = true;
        }

        BudgetReport {
            standing,
            crossed_warning,
            crossed_exceeded,
            snapshot: snapshot_of(&state, &self.limits),
        }
    }

    /// Reset run counters and threshold latches (board start).
    pub fn reset_run(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.run_dollars = 0.0;
        state.run_tokens = 0;
        state.warned = false;
        state.exceeded = false;
    }

    /// Current counters.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        snapshot_of(&state, &self.limits)
    }
}

fn fraction(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

fn snapshot_of(state: &BudgetState, limits: &BudgetLimits) -> BudgetSnapshot {
    BudgetSnapshot {
        max_dollars: limits.max_dollars,
        max_tokens: limits.max_tokens,
        total_dollars: state.total_dollars,
        total_tokens: state.total_tokens,
        run_dollars: state.run_dollars,
        run_tokens: state.run_tokens,
    }
}

#[async_trait]
impl EventSubscriber for BudgetTracker {
    async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        match &event.payload {
            EventPayload::LlmResponse { usage, cost, .. } => {
                let report = self.record(usage.total_tokens, *cost);
                let bus = match self.bus.upgrade() {
                    Some(bus) => bus,
                    None => return Ok(()),
                };
                if report.crossed_warning {
                    log::warn!(
                        "budget: warning threshold crossed (${:.2}, {} tokens)",
                        report.snapshot.total_dollars,
                        report.snapshot.total_tokens
                    );
                    bus.publish(EngineEvent::new(
                        event.board_id.clone(),
                        None,
                        EventPayload::BudgetWarning {
                            dollars: report.snapshot.total_dollars,
                            tokens: report.snapshot.total_tokens,
                            dollar_fraction: fraction(
                                report.snapshot.total_dollars,
                                self.limits.max_dollars,
                            ),
                            token_fraction: fraction(
                                report.snapshot.total_tokens as f64,
                                self.limits.max_tokens as f64,
                            ),
                        },
                    ))
                    .await;
                }
                if report.crossed_exceeded {
                    log::error!(
                        "budget: ceiling exceeded (${:.2}, {} tokens)",
                        report.snapshot.total_dollars,
                        report.snapshot.total_tokens
                    );
                    bus.publish(EngineEvent::new(
                        event.board_id.clone(),
                        None,
                        EventPayload::BudgetExceeded {
                            dollars: report.snapshot.total_dollars,
                            tokens: report.snapshot.total_tokens,
                        },
                    ))
                    .await;
                }
            }
            EventPayload::BoardStarted => self.reset_run(),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker(max_dollars: f64, max_tokens: u64) -> BudgetTracker {
        BudgetTracker::new(
            BudgetLimits {
                max_dollars,
                max_tokens,
            },
            Weak::new(),
        )
    }

    #[test]
    fn test_warning_then_exceeded_sequence() {
        // Spec scenario S4 arithmetic.
        let tracker = tracker(1.0, 0);
        let first = tracker.record(100, 0.40);
        assert_eq!(first.standing, BudgetStanding::Ok);
        assert!(!first.crossed_warning);

        let second = tracker.record(100, 0.40);
        assert_eq!(second.standing, BudgetStanding::Warning);
        assert!(second.crossed_warning);

        let third = tracker.record(100, 0.30);
        assert_eq!(third.standing, BudgetStanding::Exceeded);
        assert!(third.crossed_exceeded);
        assert!(!third.crossed_warning);
        assert!((third.snapshot.total_dollars - 1.10).abs() < 1e-9);
    }

    #[test]
    fn test_warning_fires_once_per_run() {
        let tracker = tracker(1.0, 0);
        assert!(tracker.record(0, 0.75).crossed_warning);
        assert!(!tracker.record(0, 0.05).crossed_warning);
    }

    #[test]
    fn test_zero_max_means_unlimited() {
        let tracker = tracker(0.0, 0);
        let report = tracker.record(10_000_000, 9999.0);
        assert_eq!(report.standing, BudgetStanding::Ok);
    }

    #[test]
    fn test_token_ceiling_is_independent() {
        let tracker = tracker(0.0, 1_000);
        assert_eq!(tracker.record(800, 0.0).standing, BudgetStanding::Warning);
        assert_eq!(tracker.record(300, 0.0).standing, BudgetStanding::Exceeded);
    }

    #[test]
    fn test_totals_are_monotonic_across_run_resets() {
        let tracker = tracker(1.0, 0);
        tracker.record(100, 0.50);
        tracker.reset_run();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.run_tokens, 0);
        assert_eq!(snapshot.total_tokens, 100);
        assert!((snapshot.total_dollars - 0.50).abs() < 1e-9);
        tracker.record(1, 0.01);
        assert!(tracker.snapshot().total_dollars > 0.50);
    }

    #[tokio::test]
    async fn test_subscriber_publishes_threshold_events() {
        use crate::ainulindale::llm::TokenUsage;
        use tokio::sync::Mutex as AsyncMutex;

        struct KindRecorder {
            kinds: AsyncMutex<Vec<String>>,
        }

        #[async_trait]
        impl EventSubscriber for KindRecorder {
            async fn on_event(
                &self,
                event: &EngineEvent,
            ) -> Result<(), Box<dyn Error + Send + Sync>> {
                self.kinds.lock().await.push(event.kind().to_string());
                Ok(())
            }
        }

        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(BudgetTracker::new(
            BudgetLimits {
                max_dollars: 1.0,
                max_tokens: 0,
            },
            Arc::downgrade(&bus),
        ));
        bus.subscribe_all("budget", tracker.clone());
        let recorder = Arc::new(KindRecorder {
            kinds: AsyncMutex::new(Vec::new()),
        });
        bus.subscribe("rec-warn", "budget.warning", recorder.clone());
        bus.subscribe("rec-exceeded", "budget.exceeded", recorder.clone());

        for cost in [0.40, 0.40, 0.30].iter() {
            bus.publish(EngineEvent::new(
                "b",
                None,
                EventPayload::LlmResponse {
                    agent_id: "a".to_string(),
                    usage: TokenUsage::new(10, 10),
                    cost: *cost,
                },
            ))
            .await;
        }

        let kinds = recorder.kinds.lock().await;
        assert_eq!(*kinds, vec!["budget.warning", "budget.exceeded"]);
    }
}
