//! Built-in application mote: a minimal mote implementation useful for
//! scripted simulations and as a reference for real mote crates.

use motesim_common::{MoteId, SimTime};

use crate::config::Element;
use crate::error::{ConfigError, EventError};
use crate::event::{EventHandler, TimeEvent};
use crate::mote::{Mote, MoteType};
use crate::sim::Simulation;

/// Config type tag of [`AppMoteType`].
pub const APP_MOTE_TYPE_TAG: &str = "org.motesim.motes.AppMoteType";

/// Blueprint for [`AppMote`]s.
#[derive(Debug, Default)]
pub struct AppMoteType {
    identifier: String,
    description: String,
}

impl AppMoteType {
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        AppMoteType {
            identifier: identifier.into(),
            description: description.into(),
        }
    }
}

impl MoteType for AppMoteType {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn type_tag(&self) -> &str {
        APP_MOTE_TYPE_TAG
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn config(&self) -> Vec<Element> {
        vec![
            Element::with_text("identifier", &self.identifier),
            Element::with_text("description", &self.description),
        ]
    }

    fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError> {
        for child in children {
            match child.name.as_str() {
                "identifier" => self.identifier = child.text.clone(),
                "description" => self.description = child.text.clone(),
                _ => {}
            }
        }
        Ok(())
    }

    fn generate_mote(&self) -> Result<Box<dyn Mote>, ConfigError> {
        Ok(Box::new(AppMote {
            id: MoteId(0),
            type_identifier: self.identifier.clone(),
            clock_drift_us: 0,
        }))
    }
}

/// A mote with no emulated hardware: an ID, a clock drift, and log output.
#[derive(Debug)]
pub struct AppMote {
    id: MoteId,
    type_identifier: String,
    clock_drift_us: i64,
}

impl AppMote {
    pub fn new(id: MoteId, type_identifier: impl Into<String>) -> Self {
        AppMote {
            id,
            type_identifier: type_identifier.into(),
            clock_drift_us: 0,
        }
    }

    pub fn clock_drift(&self) -> i64 {
        self.clock_drift_us
    }
}

impl Mote for AppMote {
    fn id(&self) -> MoteId {
        self.id
    }

    fn type_identifier(&self) -> &str {
        &self.type_identifier
    }

    fn set_clock_drift(&mut self, drift_us: i64) {
        self.clock_drift_us = drift_us;
    }

    fn config(&self) -> Vec<Element> {
        vec![Element::with_text("id", self.id.0.to_string())]
    }

    fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError> {
        for child in children {
            if child.name == "id" {
                let id: i32 = child
                    .text
                    .parse()
                    .map_err(|_| ConfigError::invalid_value("id", &child.text))?;
                self.id = MoteId(id);
            }
        }
        Ok(())
    }
}

struct HeartbeatEvent {
    mote: MoteId,
    period: SimTime,
}

impl EventHandler for HeartbeatEvent {
    fn execute(
        &self,
        this: &TimeEvent,
        sim: &mut Simulation,
        now: SimTime,
    ) -> Result<(), EventError> {
        sim.event_central_mut()
            .log_output(now, self.mote, "heartbeat");
        sim.schedule_event(this, now + self.period);
        Ok(())
    }

    fn label(&self) -> &str {
        "heartbeat"
    }

    fn mote(&self) -> Option<MoteId> {
        Some(self.mote)
    }
}

/// Periodic event logging a heartbeat line for `mote` every `period`. Being
/// mote-bound, it is cancelled automatically when the mote is removed.
pub fn heartbeat_event(mote: MoteId, period: SimTime) -> TimeEvent {
    TimeEvent::new(HeartbeatEvent { mote, period })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_config_round_trip() {
        let mote_type = AppMoteType::new("apptype1", "App Mote Type #1");
        let config = mote_type.config();

        let mut other = AppMoteType::default();
        other.set_config(&config).unwrap();
        assert_eq!(other.identifier(), "apptype1");
        assert_eq!(other.description(), "App Mote Type #1");
    }

    #[test]
    fn test_generated_mote_carries_type_identifier() {
        let mote_type = AppMoteType::new("apptype1", "");
        let mut mote = mote_type.generate_mote().unwrap();
        assert_eq!(mote.type_identifier(), "apptype1");

        mote.set_config(&[Element::with_text("id", "4")]).unwrap();
        assert_eq!(mote.id(), MoteId(4));
    }

    #[test]
    fn test_clock_drift_applied() {
        let mut mote = AppMote::new(MoteId(1), "apptype1");
        mote.set_clock_drift(-5_000);
        assert_eq!(mote.clock_drift(), -5_000);
    }

    #[test]
    fn test_bad_mote_id_rejected() {
        let mote_type = AppMoteType::new("apptype1", "");
        let mut mote = mote_type.generate_mote().unwrap();
        assert!(mote.set_config(&[Element::with_text("id", "four")]).is_err());
    }

    #[test]
    fn test_heartbeat_event_is_mote_bound() {
        let event = heartbeat_event(MoteId(9), SimTime::from_millis(1000));
        assert_eq!(event.mote(), Some(MoteId(9)));
        assert_eq!(event.label(), "heartbeat");
    }
}
