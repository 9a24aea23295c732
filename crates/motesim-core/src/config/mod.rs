//! Simulation config codec.
//!
//! Round-trips kernel state to and from the element tree described in
//! [`element`]: title, speed limit, random seed, mote startup delay, the
//! radio medium, the event central, mote types, and motes. Collaborator
//! config is opaque to the codec and is handed through as child elements.
//!
//! Type tags are dotted identifiers under the `org.motesim` namespace.
//! Files written by old releases use the `se.motesim` namespace; those tags
//! are rewritten on read, and writes always use the current namespace.

mod element;

pub use element::{parse, read_config_file, to_xml, write_config_file, Element};

use motesim_common::SimTime;

use crate::error::ConfigError;
use crate::sim::Simulation;

/// Namespace prefix of current type tags.
pub const TYPE_TAG_PREFIX: &str = "org.motesim";
/// Namespace prefix accepted from legacy config files.
pub const LEGACY_TYPE_TAG_PREFIX: &str = "se.motesim";

/// Rewrite a legacy type tag to the current namespace.
pub fn canonical_type_tag(tag: &str) -> String {
    match tag.strip_prefix(LEGACY_TYPE_TAG_PREFIX) {
        Some(rest) => format!("{TYPE_TAG_PREFIX}{rest}"),
        None => tag.to_string(),
    }
}

/// Resolver consulted for every `motetype` element: receives the requested
/// tag and the registered tags, and returns the tag to use, or `None` to
/// abort the load.
pub type MoteTypeResolver = dyn Fn(&str, &[String]) -> Option<String>;

/// Options applied while loading a config tree.
#[derive(Default)]
pub struct LoadOptions {
    /// Overrides the `randomseed` element when set.
    pub manual_random_seed: Option<i64>,
    /// Mote type substitution hook; absent for headless loads.
    pub mote_type_resolver: Option<Box<MoteTypeResolver>>,
}

/// Encode the simulation state as an element tree.
pub fn export_config(sim: &Simulation) -> Element {
    let mut root = Element::new("simulation");

    root.push(Element::with_text("title", sim.title()));

    if let Some(limit) = sim.speed_limit() {
        root.push(Element::with_text("speedlimit", format!("{limit:?}")));
    }

    let seed_text = if sim.is_seed_generated() {
        "generated".to_string()
    } else {
        sim.random_seed().to_string()
    };
    root.push(Element::with_text("randomseed", seed_text));

    root.push(Element::with_text(
        "motedelay_us",
        sim.max_startup_delay().as_micros().to_string(),
    ));

    if let Some(medium) = sim.radio_medium() {
        let mut el = Element::with_text("radiomedium", medium.type_tag());
        for child in medium.config() {
            el.push(child);
        }
        root.push(el);
    }

    let mut events = Element::new("events");
    for child in sim.event_central().config() {
        events.push(child);
    }
    root.push(events);

    for mote_type in sim.mote_types() {
        let mut el = Element::with_text("motetype", mote_type.type_tag());
        for child in mote_type.config() {
            el.push(child);
        }
        root.push(el);
    }

    for mote in sim.motes() {
        let mut el = Element::new("mote");
        for child in mote.config() {
            el.push(child);
        }
        el.push(Element::with_text(
            "motetype_identifier",
            mote.type_identifier(),
        ));
        root.push(el);
    }

    root
}

/// Apply a config tree to a stopped simulation.
///
/// Elements are applied in document order; unrecognized element names are
/// skipped. After the tree is applied the radio medium is told the load
/// finished and queued setup actions are drained, so the simulation is
/// ready for its first start.
pub fn apply_config(
    sim: &mut Simulation,
    root: &Element,
    options: &LoadOptions,
) -> Result<(), ConfigError> {
    for element in &root.children {
        match element.name.as_str() {
            "title" => sim.set_title(element.text.clone()),

            "speedlimit" => {
                if element.text == "null" {
                    sim.set_speed_limit(None);
                } else {
                    let limit: f64 = element
                        .text
                        .parse()
                        .map_err(|_| ConfigError::invalid_value("speedlimit", &element.text))?;
                    sim.set_speed_limit(Some(limit));
                }
            }

            "randomseed" => {
                let (seed, generated) = if element.text == "generated" {
                    (rand::random::<i64>(), true)
                } else {
                    let seed: i64 = element
                        .text
                        .parse()
                        .map_err(|_| ConfigError::invalid_value("randomseed", &element.text))?;
                    (seed, false)
                };
                let seed = options.manual_random_seed.unwrap_or(seed);
                sim.set_seed_generated(generated);
                sim.set_random_seed(seed);
            }

            // Legacy form in milliseconds
            "motedelay" => {
                let ms: i64 = element
                    .text
                    .parse()
                    .map_err(|_| ConfigError::invalid_value("motedelay", &element.text))?;
                sim.set_max_startup_delay(SimTime::from_millis(ms));
            }

            "motedelay_us" => {
                let us: i64 = element
                    .text
                    .parse()
                    .map_err(|_| ConfigError::invalid_value("motedelay_us", &element.text))?;
                sim.set_max_startup_delay(SimTime::from_micros(us));
            }

            "radiomedium" => {
                let tag = canonical_type_tag(element.text.trim());
                let mut medium = sim
                    .registry()
                    .create_radio_medium(&tag)
                    .ok_or_else(|| ConfigError::UnknownType(tag.clone()))?;
                medium.set_config(&element.children)?;
                sim.set_radio_medium(medium);
            }

            "events" => sim.event_central_mut().set_config(&element.children)?,

            "motetype" => {
                let mut tag = canonical_type_tag(element.text.trim());
                if let Some(resolver) = &options.mote_type_resolver {
                    let available = sim.registry().mote_type_tags();
                    match resolver(&tag, &available) {
                        Some(choice) => {
                            if choice != tag {
                                tracing::warn!(from = %tag, to = %choice, "substituting mote type");
                                tag = choice;
                            }
                        }
                        None => return Err(ConfigError::LoadAborted),
                    }
                }
                let mut mote_type = sim
                    .registry()
                    .create_mote_type(&tag)
                    .ok_or_else(|| ConfigError::UnknownType(tag.clone()))?;
                mote_type.set_config(&element.children)?;
                sim.add_mote_type(mote_type);
            }

            "mote" => {
                let type_id = element
                    .child("motetype_identifier")
                    .map(|e| e.text.clone())
                    .ok_or(ConfigError::MissingMoteType)?;
                let mote_type = sim
                    .mote_type_with_id(&type_id)
                    .ok_or_else(|| ConfigError::NoSuchMoteType(type_id.clone()))?;
                let mut mote = mote_type.generate_mote()?;
                mote.set_config(&element.children)?;
                if sim.mote_with_id(mote.id()).is_some() {
                    tracing::warn!(id = mote.id().0, "ignoring mote with duplicate ID");
                } else {
                    sim.add_mote(mote);
                }
            }

            _ => {}
        }
    }

    if let Some(medium) = sim.radio_medium_mut() {
        medium.load_finished();
    }

    // Setup actions queued by collaborators run before the first start
    sim.run_poll_actions();
    Ok(())
}
