use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use j1939rt_bus::{Subscription, TimerHandle};
use j1939rt_proto::DecodedMessage;
use j1939rt_runtime::{J1939Tx, Module, ModuleContext};

use crate::request;

/// ETC1 is published under both PGNs; a configured transmission answers
/// requests for either and broadcasts on the one it's configured with.
const PGN_ETC1_PRIMARY: u32 = 0xF001;
const PGN_ETC1_ALT: u32 = 0xF003;

#[derive(Debug, Clone, Copy)]
pub struct TransmissionConfig {
    pub sa: u8,
    pub rate_ms: u64,
    pub pgn: u32,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            sa: 0x03,
            rate_ms: 100,
            pgn: PGN_ETC1_PRIMARY,
        }
    }
}

struct State {
    gear: i8,
    input_shaft_speed: f64,
    output_shaft_speed: f64,
    clutch_slip: u8,
    shift_in_progress: bool,
}

/// Maps a gear (negative = reverse, 0 = neutral, positive = forward) to its
/// drive ratio. Values are illustrative, not a specific transmission's.
fn gear_ratio(gear: i8) -> f64 {
    match gear {
        1 => 4.70,
        2 => 2.87,
        3 => 1.86,
        4 => 1.41,
        5 => 1.00,
        6 => 0.75,
        -1 => 4.10,
        _ => 1.0,
    }
}

/// Simulates an Electronic Transmission Controller, broadcasting ETC1 and
/// answering PGN requests for it.
pub struct TransmissionSimulator {
    config: TransmissionConfig,
    state: Arc<Mutex<State>>,
    subscription: Option<Subscription>,
    timer: Option<TimerHandle>,
}

impl TransmissionSimulator {
    pub fn new(config: TransmissionConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                gear: 1,
                input_shaft_speed: 0.0,
                output_shaft_speed: 0.0,
                clutch_slip: 0,
                shift_in_progress: false,
            })),
            subscription: None,
            timer: None,
        }
    }
}

fn advance(state: &mut State) {
    if state.shift_in_progress {
        state.clutch_slip = state.clutch_slip.saturating_sub(10);
        if state.clutch_slip == 0 {
            state.shift_in_progress = false;
        }
    }
    state.input_shaft_speed = (state.input_shaft_speed + 50.0).min(2200.0);
    state.output_shaft_speed = state.input_shaft_speed / gear_ratio(state.gear);
}

/// Bytes 0-1 input shaft speed, 2-3 output shaft speed (both 0.125
/// rpm/bit LE), 4 clutch slip, 5 torque ratio (unavailable), 6-7 selected
/// and current gear offset by +125 per SAE convention.
fn encode(state: &State) -> [u8; 8] {
    let input_raw = (state.input_shaft_speed * 8.0).round() as u16;
    let output_raw = (state.output_shaft_speed * 8.0).round() as u16;
    let [ilo, ihi] = input_raw.to_le_bytes();
    let [olo, ohi] = output_raw.to_le_bytes();
    let gear_byte = (state.gear as i16 + 125) as u8;
    [ilo, ihi, olo, ohi, state.clutch_slip, 0xFF, gear_byte, gear_byte]
}

#[async_trait]
impl Module for TransmissionSimulator {
    fn name(&self) -> &str {
        "transmission-simulator"
    }

    async fn on_start(
        &mut self,
        ctx: &ModuleContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sa = self.config.sa;
        let pgn = self.config.pgn;
        let state = self.state.clone();
        let bus = ctx.bus.clone();
        self.subscription = Some(ctx.bus.subscribe_typed::<DecodedMessage>(
            "j1939.rx",
            move |msg, timestamp_ms| {
                if msg.pgn != j1939rt_proto::PGN_REQUEST {
                    return;
                }
                let requested = request::decode_requested_pgn(&msg.raw);
                if requested != Some(PGN_ETC1_PRIMARY) && requested != Some(PGN_ETC1_ALT) {
                    return;
                }
                let data = encode(&state.lock().unwrap()).to_vec();
                bus.publish(
                    "j1939.tx",
                    J1939Tx {
                        pgn,
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
                    pgn,
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
    fn output_speed_divides_by_gear_ratio() {
        let mut state = State {
            gear: 5,
            input_shaft_speed: 1000.0,
            output_shaft_speed: 0.0,
            clutch_slip: 0,
            shift_in_progress: false,
        };
        advance(&mut state);
        assert_eq!(state.output_shaft_speed, state.input_shaft_speed / 1.00);
    }

    #[test]
    fn shift_in_progress_bleeds_off_clutch_slip_to_zero() {
        let mut state = State {
            gear: 3,
            input_shaft_speed: 500.0,
            output_shaft_speed: 0.0,
            clutch_slip: 25,
            shift_in_progress: true,
        };
        advance(&mut state);
        advance(&mut state);
        advance(&mut state);
        assert_eq!(state.clutch_slip, 0);
        assert!(!state.shift_in_progress);
    }

    #[test]
    fn gear_byte_uses_offset_125() {
        let state = State {
            gear: 3,
            input_shaft_speed: 0.0,
            output_shaft_speed: 0.0,
            clutch_slip: 0,
            shift_in_progress: false,
        };
        let encoded = encode(&state);
        assert_eq!(encoded[6], 128);
        assert_eq!(encoded[7], 128);
    }
}
