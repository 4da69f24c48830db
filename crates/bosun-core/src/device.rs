use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;

/// The states of the per-task device state machine.
/// State changes are reported by the tasks themselves; the control plane
/// never assumes a transition has happened until the event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Undefined,
    Ok,
    Error,
    Idle,
    InitializingDevice,
    Initialized,
    Binding,
    Bound,
    Connecting,
    DeviceReady,
    InitializingTask,
    ResettingTask,
    ResettingDevice,
    Ready,
    Running,
    Exiting,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Undefined => "Undefined",
            DeviceState::Ok => "Ok",
            DeviceState::Error => "Error",
            DeviceState::Idle => "Idle",
            DeviceState::InitializingDevice => "InitializingDevice",
            DeviceState::Initialized => "Initialized",
            DeviceState::Binding => "Binding",
            DeviceState::Bound => "Bound",
            DeviceState::Connecting => "Connecting",
            DeviceState::DeviceReady => "DeviceReady",
            DeviceState::InitializingTask => "InitializingTask",
            DeviceState::ResettingTask => "ResettingTask",
            DeviceState::ResettingDevice => "ResettingDevice",
            DeviceState::Ready => "Ready",
            DeviceState::Running => "Running",
            DeviceState::Exiting => "Exiting",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Undefined" => Ok(DeviceState::Undefined),
            "Ok" => Ok(DeviceState::Ok),
            "Error" => Ok(DeviceState::Error),
            "Idle" => Ok(DeviceState::Idle),
            "InitializingDevice" => Ok(DeviceState::InitializingDevice),
            "Initialized" => Ok(DeviceState::Initialized),
            "Binding" => Ok(DeviceState::Binding),
            "Bound" => Ok(DeviceState::Bound),
            "Connecting" => Ok(DeviceState::Connecting),
            "DeviceReady" => Ok(DeviceState::DeviceReady),
            "InitializingTask" => Ok(DeviceState::InitializingTask),
            "ResettingTask" => Ok(DeviceState::ResettingTask),
            "ResettingDevice" => Ok(DeviceState::ResettingDevice),
            "Ready" => Ok(DeviceState::Ready),
            "Running" => Ok(DeviceState::Running),
            "Exiting" => Ok(DeviceState::Exiting),
            other => Err(ControlError::internal(format!(
                "unknown device state: {other}"
            ))),
        }
    }
}

/// The transitions a device can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    InitDevice,
    CompleteInit,
    Bind,
    Connect,
    InitTask,
    Run,
    Stop,
    ResetTask,
    ResetDevice,
    End,
}

impl Transition {
    /// The state a device is expected to reach after performing the
    /// transition. This drives the completion checks of synchronized
    /// transition operations.
    pub fn expected_state(&self) -> DeviceState {
        match self {
            Transition::InitDevice => DeviceState::InitializingDevice,
            Transition::CompleteInit => DeviceState::Initialized,
            Transition::Bind => DeviceState::Bound,
            Transition::Connect => DeviceState::DeviceReady,
            Transition::InitTask => DeviceState::Ready,
            Transition::Run => DeviceState::Running,
            Transition::Stop => DeviceState::Ready,
            Transition::ResetTask => DeviceState::DeviceReady,
            Transition::ResetDevice => DeviceState::Idle,
            Transition::End => DeviceState::Exiting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::InitDevice => "InitDevice",
            Transition::CompleteInit => "CompleteInit",
            Transition::Bind => "Bind",
            Transition::Connect => "Connect",
            Transition::InitTask => "InitTask",
            Transition::Run => "Run",
            Transition::Stop => "Stop",
            Transition::ResetTask => "ResetTask",
            Transition::ResetDevice => "ResetDevice",
            Transition::End => "End",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Transition {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InitDevice" => Ok(Transition::InitDevice),
            "CompleteInit" => Ok(Transition::CompleteInit),
            "Bind" => Ok(Transition::Bind),
            "Connect" => Ok(Transition::Connect),
            "InitTask" => Ok(Transition::InitTask),
            "Run" => Ok(Transition::Run),
            "Stop" => Ok(Transition::Stop),
            "ResetTask" => Ok(Transition::ResetTask),
            "ResetDevice" => Ok(Transition::ResetDevice),
            "End" => Ok(Transition::End),
            other => Err(ControlError::internal(format!(
                "unknown transition: {other}"
            ))),
        }
    }
}

/// The state of a set of devices seen as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatedState {
    /// The set is empty or no state is known.
    Undefined,
    /// The devices are not all in the same state.
    Mixed,
    /// All devices share this state.
    Device(DeviceState),
}

impl fmt::Display for AggregatedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatedState::Undefined => write!(f, "Undefined"),
            AggregatedState::Mixed => write!(f, "Mixed"),
            AggregatedState::Device(state) => write!(f, "{state}"),
        }
    }
}

/// Aggregate many device states into one.
pub fn aggregate<I>(states: I) -> AggregatedState
where
    I: IntoIterator<Item = DeviceState>,
{
    let mut first = None;
    for state in states {
        match first {
            None => first = Some(state),
            Some(f) if f != state => return AggregatedState::Mixed,
            Some(_) => {}
        }
    }
    match first {
        None => AggregatedState::Undefined,
        Some(state) => AggregatedState::Device(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_states() {
        assert_eq!(
            Transition::InitDevice.expected_state(),
            DeviceState::InitializingDevice
        );
        assert_eq!(
            Transition::CompleteInit.expected_state(),
            DeviceState::Initialized
        );
        assert_eq!(Transition::Bind.expected_state(), DeviceState::Bound);
        assert_eq!(Transition::Connect.expected_state(), DeviceState::DeviceReady);
        assert_eq!(Transition::InitTask.expected_state(), DeviceState::Ready);
        assert_eq!(Transition::Run.expected_state(), DeviceState::Running);
        assert_eq!(Transition::Stop.expected_state(), DeviceState::Ready);
        assert_eq!(
            Transition::ResetTask.expected_state(),
            DeviceState::DeviceReady
        );
        assert_eq!(Transition::ResetDevice.expected_state(), DeviceState::Idle);
        assert_eq!(Transition::End.expected_state(), DeviceState::Exiting);
    }

    #[test]
    fn test_aggregate() {
        assert_eq!(aggregate([]), AggregatedState::Undefined);
        assert_eq!(
            aggregate([DeviceState::Ready, DeviceState::Ready]),
            AggregatedState::Device(DeviceState::Ready)
        );
        assert_eq!(
            aggregate([DeviceState::Ready, DeviceState::Running]),
            AggregatedState::Mixed
        );
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            DeviceState::Idle,
            DeviceState::DeviceReady,
            DeviceState::Running,
        ] {
            assert_eq!(state.to_string().parse::<DeviceState>().unwrap(), state);
        }
        assert!("NotAState".parse::<DeviceState>().is_err());
    }
}
