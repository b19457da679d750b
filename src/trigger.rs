//! Trigger specification and validation.

use crate::error::{Error, Result};

/// Identity of an acquisition channel a trigger match refers to.
pub type ChannelId = usize;

#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub channel: Option<ChannelId>,
    pub match_code: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerStage {
    pub matches: Vec<TriggerMatch>,
}

#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub stages: Vec<TriggerStage>,
}

/// Every stage must have at least one match; every match must name a
/// channel and carry a non-zero match code. Failure is fatal for
/// `Session::start`.
pub fn validate(trigger: &Trigger) -> Result<()> {
    if trigger.stages.is_empty() {
        return Err(Error::arg("trigger has no stages"));
    }
    for (stage_idx, stage) in trigger.stages.iter().enumerate() {
        if stage.matches.is_empty() {
            return Err(Error::arg(format!(
                "trigger stage {stage_idx} has no matches"
            )));
        }
        for m in &stage.matches {
            if m.channel.is_none() {
                return Err(Error::arg(format!(
                    "trigger stage {stage_idx} has a match with no channel"
                )));
            }
            if m.match_code == 0 {
                return Err(Error::arg(format!(
                    "trigger stage {stage_idx} has a match with a zero match code"
                )));
            }
        }
    }
    Ok(())
}
