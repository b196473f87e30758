use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use j1939rt_bus::{Subscription, TimerHandle};
use j1939rt_proto::DecodedMessage;
use j1939rt_runtime::{J1939Tx, Module, ModuleContext};

use crate::request;

const PGN_EEC1: u32 = 0xF004;

/// Static configuration for [`EngineSimulator`]: the source address it
/// broadcasts under and the tick rate.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sa: u8,
    pub rate_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { sa: 0x00, rate_ms: 100 }
    }
}

struct State {
    rpm: f64,
    torque_percent: u8,
    running: bool,
}

/// Simulates an Electronic Engine Controller, broadcasting EEC1 (PGN
/// 0xF004) at a configured rate and answering PGN requests for it.
pub struct EngineSimulator {
    config: EngineConfig,
    state: Arc<Mutex<State>>,
    subscription: Option<Subscription>,
    timer: Option<TimerHandle>,
}

impl EngineSimulator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                rpm: 0.0,
                torque_percent: 0,
                running: true,
            })),
            subscription: None,
            timer: None,
        }
    }
}

/// Advance the ramp model by one tick: while running, rpm climbs toward
/// 2200 at 50 rpm/tick and torque toward 80% at 2%/tick; otherwise both
/// ramp down to zero.
fn advance(state: &mut State) {
    if state.running {
        state.rpm = (state.rpm + 50.0).min(2200.0);
        state.torque_percent = (state.torque_percent + 2).min(80);
    } else {
        state.rpm = (state.rpm - 50.0).max(0.0);
        state.torque_percent = state.torque_percent.saturating_sub(2);
    }
}

/// Resolution is 0.125 rpm/bit; unused bytes are padded 0xFF per J1939
/// convention for "not available".
fn encode(state: &State) -> [u8; 8] {
    let raw = (state.rpm * 8.0).round() as u16;
    let [lo, hi] = raw.to_le_bytes();
    [lo, hi, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

#[async_trait]
impl Module for EngineSimulator {
    fn name(&self) -> &str {
        "engine-simulator"
    }

    async fn on_start(
        &mut self,
        ctx: &ModuleContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sa = self.config.sa;
        let state = self.state.clone();
        let bus = ctx.bus.clone();
        self.subscription = Some(ctx.bus.subscribe_typed::<DecodedMessage>(
            "j1939.rx",
            move |msg, timestamp_ms| {
                if msg.pgn != j1939rt_proto::PGN_REQUEST {
                    return;
                }
                if request::decode_requested_pgn(&msg.raw) != Some(PGN_EEC1) {
                    return;
                }
                let data = encode(&state.lock().unwrap()).to_vec();
                bus.publish(
                    "j1939.tx",
                    J1939Tx {
                        pgn: PGN_EEC1,
                        data,
                        priority: Some(3),
                        sa: Some(sa),
                        da: Some(msg.sa),
                    },
                    timestamp_ms,
                );
            },
        ));

        let state = self.state.clone();
        let bus = ctx.bus.clone();
        let start = Instant::now();
        self.timer = Some(ctx.scheduler.every(self.config.rate_ms, move || {
            let data = {
                let mut state = state.lock().unwrap();
                advance(&mut state);
                encode(&state).to_vec()
            };
            bus.publish(
                "j1939.tx",
                J1939Tx {
                    pgn: PGN_EEC1,
                    data,
                    priority: Some(3),
                    sa: Some(sa),
                    da: None,
                },
                start.elapsed().as_millis() as u64,
            );
        }));

        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ModuleContext) {
        if let Some(timer) = self.timer.take() {
            ctx.scheduler.clear(timer);
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_known_reference_point() {
        let state = State {
            rpm: 1500.0,
            torque_percent: 0,
            running: true,
        };
        assert_eq!(
            encode(&state),
            [0xE0, 0x2E, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn advance_ramps_toward_ceiling_while_running() {
        let mut state = State {
            rpm: 2180.0,
            torque_percent: 79,
            running: true,
        };
        advance(&mut state);
        assert_eq!(state.rpm, 2200.0);
        assert_eq!(state.torque_percent, 80);
    }

    #[test]
    fn advance_ramps_down_when_stopped() {
        let mut state = State {
            rpm: 30.0,
            torque_percent: 1,
            running: false,
        };
        advance(&mut state);
        assert_eq!(state.rpm, 0.0);
        assert_eq!(state.torque_percent, 0);
    }
}
