use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;

use crate::error::HardwareError;

use super::{Level, Pin};

/// Raw access to output lines. Implementations must be cheap enough to call from async code.
pub trait GpioBackend: Send + Sync {
    /// Claims `pin` as an output whose first driven level is `initial`.
    fn configure_output(&self, pin: Pin, initial: Level) -> Result<(), HardwareError>;
    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError>;
    fn read(&self, pin: Pin) -> Result<Level, HardwareError>;
    fn release(&self, pin: Pin) -> Result<(), HardwareError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub pin: Pin,
    pub level: Level,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InjectedFault {
    Configure(Pin),
    Write(Pin, Level),
    Read(Pin),
}

#[derive(Default)]
struct SimState {
    levels: HashMap<Pin, Level>,
    released: HashSet<Pin>,
    transitions: Vec<Transition>,
    faults: HashSet<InjectedFault>,
    one_shot_faults: HashSet<InjectedFault>,
}

/// In-memory relay board. Used for bench runs without hardware attached and by the tests,
/// which inspect the recorded transitions and inject faults.
#[derive(Default)]
pub struct SimulatedGpio {
    state: Mutex<SimState>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn fail_configure(&self, pin: Pin) {
        self.state().faults.insert(InjectedFault::Configure(pin));
    }

    pub fn fail_writes(&self, pin: Pin, level: Level) {
        self.state().faults.insert(InjectedFault::Write(pin, level));
    }

    /// Fails only the next write of `level` to `pin`.
    pub fn fail_next_write(&self, pin: Pin, level: Level) {
        self.state()
            .one_shot_faults
            .insert(InjectedFault::Write(pin, level));
    }

    pub fn fail_reads(&self, pin: Pin) {
        self.state().faults.insert(InjectedFault::Read(pin));
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.faults.clear();
        state.one_shot_faults.clear();
    }

    pub fn level(&self, pin: Pin) -> Option<Level> {
        self.state().levels.get(&pin).copied()
    }

    pub fn is_released(&self, pin: Pin) -> bool {
        self.state().released.contains(&pin)
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.state().transitions.clone()
    }

    /// Levels driven on `pin`, oldest first, including the initial configuration.
    pub fn levels_driven(&self, pin: Pin) -> Vec<Level> {
        self.state()
            .transitions
            .iter()
            .filter(|t| t.pin == pin)
            .map(|t| t.level)
            .collect()
    }

    /// Forgets recorded transitions, keeping current levels.
    pub fn reset_history(&self) {
        self.state().transitions.clear();
    }
}

impl GpioBackend for SimulatedGpio {
    fn configure_output(&self, pin: Pin, initial: Level) -> Result<(), HardwareError> {
        let mut state = self.state();
        if state.faults.contains(&InjectedFault::Configure(pin)) {
            return Err(HardwareError::fault(pin, "simulated configure failure"));
        }
        state.released.remove(&pin);
        state.levels.insert(pin, initial);
        state.transitions.push(Transition {
            pin,
            level: initial,
            at: Instant::now(),
        });
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        let mut state = self.state();
        if !state.levels.contains_key(&pin) || state.released.contains(&pin) {
            return Err(HardwareError::fault(pin, "not configured as output"));
        }
        let fault = InjectedFault::Write(pin, level);
        if state.faults.contains(&fault) || state.one_shot_faults.remove(&fault) {
            return Err(HardwareError::fault(pin, "simulated write failure"));
        }
        state.levels.insert(pin, level);
        state.transitions.push(Transition {
            pin,
            level,
            at: Instant::now(),
        });
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level, HardwareError> {
        let state = self.state();
        if state.faults.contains(&InjectedFault::Read(pin)) {
            return Err(HardwareError::fault(pin, "simulated read failure"));
        }
        state
            .levels
            .get(&pin)
            .copied()
            .ok_or_else(|| HardwareError::fault(pin, "not configured as output"))
    }

    fn release(&self, pin: Pin) -> Result<(), HardwareError> {
        self.state().released.insert(pin);
        Ok(())
    }
}
