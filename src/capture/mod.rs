// SPDX-License-Identifier: GPL-3.0-only

//! Capture activity and the photo/movie outputs

pub mod activity;
pub mod output;

pub use activity::{
    ActivityKind, ActivityStateMachine, CaptureActivity, CaptureCapabilities, TransitionError,
};
pub use output::{
    CaptureMode, CaptureOutput, DeviceConfig, MovieOutput, OutputCoordinator, OutputVariant,
    PhotoOutput,
};
