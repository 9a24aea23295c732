//! Collaborator interfaces: motes, mote types, radio mediums, and the
//! per-simulation factory registry.
//!
//! The kernel only ever sees these traits. Mote emulation, radio
//! propagation, and interface hardware live behind them in other crates.

use std::collections::HashMap;

use motesim_common::MoteId;

use crate::config::Element;
use crate::error::ConfigError;

/// A simulated node registered with the kernel.
pub trait Mote: Send {
    fn id(&self) -> MoteId;

    /// Identifier of the mote type this mote was generated from.
    fn type_identifier(&self) -> &str;

    /// Clock drift in microseconds, applied when the mote joins the
    /// simulation to stagger node startup.
    fn set_clock_drift(&mut self, drift_us: i64);

    /// Called after the mote has been added to the simulation.
    fn added(&mut self) {}

    /// Called after the mote has been removed; release resources here.
    fn removed(&mut self) {}

    /// Mote-specific config children (the kernel appends the
    /// `motetype_identifier` element itself).
    fn config(&self) -> Vec<Element> {
        Vec::new()
    }

    fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError>;
}

/// Blueprint from which motes are generated.
pub trait MoteType: Send {
    /// Identifier motes use to reference this type (unique per simulation).
    fn identifier(&self) -> &str;

    /// Dotted type tag recorded in config files.
    fn type_tag(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn config(&self) -> Vec<Element> {
        Vec::new()
    }

    fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError>;

    fn generate_mote(&self) -> Result<Box<dyn Mote>, ConfigError>;
}

/// Distributes radio traffic between registered motes. The kernel only
/// drives registration and lifecycle; propagation happens behind this trait.
pub trait RadioMedium: Send {
    /// Dotted type tag recorded in config files.
    fn type_tag(&self) -> &str;

    fn register_mote(&mut self, mote: &dyn Mote);

    fn unregister_mote(&mut self, mote: &dyn Mote);

    fn config(&self) -> Vec<Element> {
        Vec::new()
    }

    fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError> {
        let _ = children;
        Ok(())
    }

    /// Called once after a config load completes, before the first start.
    fn load_finished(&mut self) {}

    /// Called when the simulation is torn down.
    fn removed(&mut self) {}
}

type MoteTypeFactory = Box<dyn Fn() -> Box<dyn MoteType> + Send + Sync>;
type RadioMediumFactory = Box<dyn Fn() -> Box<dyn RadioMedium> + Send + Sync>;

/// Per-simulation table of constructible mote type and radio medium
/// implementations, keyed by dotted type tag. Nothing here is process
/// global; every kernel instance carries its own registry.
pub struct TypeRegistry {
    mote_types: HashMap<String, MoteTypeFactory>,
    radio_mediums: HashMap<String, RadioMediumFactory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            mote_types: HashMap::new(),
            radio_mediums: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in implementations.
    pub fn with_builtins() -> Self {
        let mut registry = TypeRegistry::new();
        registry.register_mote_type(crate::motes::APP_MOTE_TYPE_TAG, || {
            Box::new(crate::motes::AppMoteType::default())
        });
        registry.register_radio_medium(crate::radiomediums::SILENT_RADIO_MEDIUM_TAG, || {
            Box::new(crate::radiomediums::SilentRadioMedium::new())
        });
        registry
    }

    pub fn register_mote_type(
        &mut self,
        tag: impl Into<String>,
        factory: impl Fn() -> Box<dyn MoteType> + Send + Sync + 'static,
    ) {
        self.mote_types.insert(tag.into(), Box::new(factory));
    }

    pub fn register_radio_medium(
        &mut self,
        tag: impl Into<String>,
        factory: impl Fn() -> Box<dyn RadioMedium> + Send + Sync + 'static,
    ) {
        self.radio_mediums.insert(tag.into(), Box::new(factory));
    }

    pub fn create_mote_type(&self, tag: &str) -> Option<Box<dyn MoteType>> {
        self.mote_types.get(tag).map(|factory| factory())
    }

    pub fn create_radio_medium(&self, tag: &str) -> Option<Box<dyn RadioMedium>> {
        self.radio_mediums.get(tag).map(|factory| factory())
    }

    /// Registered mote type tags, sorted for stable presentation.
    pub fn mote_type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.mote_types.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
