//! Snowflake ID Generator
//!
//! Per-process generator for message ids. Ids are unique across processes as
//! long as each process runs with its own machine id.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::domain::Snowflake;

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u16,
}

/// Snowflake ID generator
#[derive(Debug)]
pub struct SnowflakeGenerator {
    epoch: u64,
    machine_id: u8,
    process_id: u8,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(epoch: u64, machine_id: u16) -> Self {
        Self {
            epoch,
            machine_id: ((machine_id >> 5) & 0x1F) as u8,
            process_id: (machine_id & 0x1F) as u8,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> Snowflake {
        let mut state = self.state.lock();
        let mut now = current_millis().max(state.last_timestamp);

        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & 0xFFF;
            if state.sequence == 0 {
                // sequence exhausted for this millisecond
                while now <= state.last_timestamp {
                    std::hint::spin_loop();
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = now;

        Snowflake::from_parts(now, self.epoch, self.machine_id, self.process_id, state.sequence)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
