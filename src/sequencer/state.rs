use crate::error::DualshotError;
use crate::hal::{CameraId, Facing};
use crate::sink::StoredLocation;

/// Phase of the shot currently being advanced by the run driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotPhase {
    /// Waiting for the device to finish opening
    Opening,
    /// Waiting for the hardware session to configure
    Configuring,
    /// Preview running, waiting out the convergence delay
    Converging,
    /// Still capture in flight
    Capturing,
    /// Waiting for the device's terminal closed event
    Closing,
}

/// In-memory state of one capture run. Owned exclusively by the sequencer
/// worker task; created at `start_run` and destroyed at completion or
/// abort.
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    /// Ordered shot plan: back first, front second.
    pub cameras: Vec<CameraId>,
    pub current_index: usize,
    /// Incremented only after a frame from the current camera has been
    /// successfully handed to the image sink.
    pub shots_completed: usize,
    pub phase: ShotPhase,
}

impl RunState {
    pub fn new(run_id: String, cameras: Vec<CameraId>) -> Self {
        Self {
            run_id,
            cameras,
            current_index: 0,
            shots_completed: 0,
            phase: ShotPhase::Opening,
        }
    }

    pub fn current_camera(&self) -> &CameraId {
        &self.cameras[self.current_index]
    }

    pub fn is_last_shot(&self) -> bool {
        self.current_index + 1 == self.cameras.len()
    }
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Both shots captured and stored, back then front.
    Complete { stored: Vec<StoredLocation> },
    /// The run ended early; any already-stored image is not part of a
    /// complete pair.
    Aborted { error: DualshotError },
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Complete { .. })
    }
}

/// Order enumerated cameras into the fixed shot plan: exactly one back and
/// one front camera, back first. Anything else is an enumeration failure.
pub fn select_shot_plan(cameras: &[CameraId]) -> Result<Vec<CameraId>, DualshotError> {
    let mut back = None;
    let mut front = None;

    for camera in cameras {
        match camera.facing() {
            Facing::Back => {
                if back.replace(camera.clone()).is_some() {
                    return Err(DualshotError::duplicate_facing(Facing::Back));
                }
            }
            Facing::Front => {
                if front.replace(camera.clone()).is_some() {
                    return Err(DualshotError::duplicate_facing(Facing::Front));
                }
            }
        }
    }

    let back = back.ok_or_else(|| DualshotError::missing_facing(Facing::Back))?;
    let front = front.ok_or_else(|| DualshotError::missing_facing(Facing::Front))?;

    Ok(vec![back, front])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shot_plan_orders_back_before_front() {
        let cameras = vec![
            CameraId::new("1", Facing::Front),
            CameraId::new("0", Facing::Back),
        ];
        let plan = select_shot_plan(&cameras).unwrap();
        assert_eq!(plan[0].facing(), Facing::Back);
        assert_eq!(plan[1].facing(), Facing::Front);
    }

    #[test]
    fn duplicate_back_facing_is_rejected() {
        let cameras = vec![
            CameraId::new("0", Facing::Back),
            CameraId::new("1", Facing::Back),
        ];
        let result = select_shot_plan(&cameras);
        assert!(matches!(
            result,
            Err(DualshotError::CameraUnavailable { .. })
        ));
    }

    #[test]
    fn missing_front_facing_is_rejected() {
        let cameras = vec![CameraId::new("0", Facing::Back)];
        let result = select_shot_plan(&cameras);
        assert!(matches!(
            result,
            Err(DualshotError::CameraUnavailable { .. })
        ));
    }

    #[test]
    fn empty_enumeration_is_rejected() {
        assert!(select_shot_plan(&[]).is_err());
    }

    #[test]
    fn run_state_tracks_shot_plan() {
        let plan = vec![
            CameraId::new("0", Facing::Back),
            CameraId::new("1", Facing::Front),
        ];
        let state = RunState::new("run".to_string(), plan);
        assert_eq!(state.current_camera().facing(), Facing::Back);
        assert!(!state.is_last_shot());
        assert_eq!(state.shots_completed, 0);
    }
}
