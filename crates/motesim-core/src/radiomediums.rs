//! Built-in radio mediums.

use motesim_common::MoteId;

use crate::mote::{Mote, RadioMedium};

/// Config type tag of [`SilentRadioMedium`].
pub const SILENT_RADIO_MEDIUM_TAG: &str = "org.motesim.radiomediums.SilentRadioMedium";

/// Radio medium that propagates nothing. Motes register as usual but no
/// transmission ever reaches a receiver. Useful for single-node setups and
/// for tests that exercise kernel behavior without a propagation model.
#[derive(Debug, Default)]
pub struct SilentRadioMedium {
    registered: Vec<MoteId>,
}

impl SilentRadioMedium {
    pub fn new() -> Self {
        SilentRadioMedium::default()
    }

    pub fn registered_motes(&self) -> &[MoteId] {
        &self.registered
    }
}

impl RadioMedium for SilentRadioMedium {
    fn type_tag(&self) -> &str {
        SILENT_RADIO_MEDIUM_TAG
    }

    fn register_mote(&mut self, mote: &dyn Mote) {
        self.registered.push(mote.id());
    }

    fn unregister_mote(&mut self, mote: &dyn Mote) {
        let id = mote.id();
        self.registered.retain(|m| *m != id);
    }

    fn removed(&mut self) {
        self.registered.clear();
    }
}
