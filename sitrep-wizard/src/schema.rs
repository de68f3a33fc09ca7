//! Inspection schema: the four wizard steps and the fields each one owns
//!
//! Every persisted inspection field belongs to exactly one step. Save payloads
//! are built from these tables, which is what keeps a step-2 save from ever
//! touching step-1 or step-3 data.

use crate::models::fields::FieldValues;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four wizard steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Step {
    One,
    Two,
    Three,
    Four,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::One, Step::Two, Step::Three, Step::Four];

    pub fn number(&self) -> u8 {
        match self {
            Step::One => 1,
            Step::Two => 2,
            Step::Three => 3,
            Step::Four => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Step> {
        match n {
            1 => Some(Step::One),
            2 => Some(Step::Two),
            3 => Some(Step::Three),
            4 => Some(Step::Four),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    pub fn prev(&self) -> Option<Step> {
        self.number().checked_sub(1).and_then(Step::from_number)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::One => "Program & General",
            Step::Two => "Tower Info",
            Step::Three => "Transmitter",
            Step::Four => "Antenna & Final",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step{}", self.number())
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.number()
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Step::from_number(n).ok_or_else(|| format!("no wizard step {}", n))
    }
}

/// Value shape of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Flag,
}

/// One persisted inspection field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Value sent when the inspector left the field unset
    pub empty: &'static str,
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
        empty: "",
    }
}

const fn flag(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Flag,
        empty: "",
    }
}

const fn text_or(name: &'static str, empty: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
        empty,
    }
}

/// Which values count as real intent for auto-save
#[derive(Debug, Clone, Copy)]
pub enum Meaningful {
    /// Any of these fields holding a value
    Listed(&'static [&'static str]),
    /// Any step field holding a value
    AnyField,
}

static STEP1_FIELDS: &[FieldSpec] = &[
    text_or("air_status", "on_air"),
    text("off_air_reason"),
    text("po_box"),
    text("postal_code"),
    text("town"),
    text("location"),
    text("street"),
    text("phone_numbers"),
    text("contact_name"),
    text("contact_address"),
    text("contact_phone"),
    text("contact_email"),
    text("station_type"),
    text("transmitting_site_name"),
    text("longitude"),
    text("latitude"),
    text("physical_location"),
    text("physical_street"),
    text("physical_area"),
    text("altitude"),
    text("land_owner_name"),
    flag("other_telecoms_operator"),
    text("telecoms_operator_details"),
];

static STEP2_FIELDS: &[FieldSpec] = &[
    text("tower_owner_name"),
    text("height_above_ground"),
    flag("above_building_roof"),
    text("building_height"),
    text("tower_type"),
    text("tower_type_other"),
    text("rust_protection"),
    text("installation_year"),
    text("manufacturer_name"),
    text("model_number"),
    text("maximum_wind_load"),
    text("maximum_load_charge"),
    flag("has_insurance"),
    text("insurance_company"),
    flag("has_concrete_base"),
    flag("has_lightning_protection"),
    flag("is_electrically_grounded"),
    flag("has_aviation_warning_light"),
    flag("has_other_antennas"),
    text("other_antennas_details"),
];

static STEP3_FIELDS: &[FieldSpec] = &[
    text("exciter_manufacturer"),
    text("exciter_model_number"),
    text("exciter_serial_number"),
    text("exciter_nominal_power"),
    text("exciter_actual_reading"),
    text("amplifier_manufacturer"),
    text("amplifier_model_number"),
    text("amplifier_serial_number"),
    text("amplifier_nominal_power"),
    text("amplifier_actual_reading"),
    text("rf_output_connector_type"),
    text("frequency_range"),
    text("transmit_frequency"),
    text("frequency_stability"),
    text("harmonics_suppression_level"),
    text("spurious_emission_level"),
    flag("has_internal_audio_limiter"),
    flag("has_internal_stereo_coder"),
    flag("transmitter_catalog_attached"),
    text("transmit_bandwidth"),
    text("filter_type"),
    text("filter_manufacturer"),
    text("filter_model_number"),
    text("filter_serial_number"),
    text("filter_frequency"),
];

static STEP4_FIELDS: &[FieldSpec] = &[
    text("height_on_tower"),
    text("antenna_type"),
    text("antenna_manufacturer"),
    text("antenna_model_number"),
    text("polarization"),
    text("horizontal_pattern"),
    text("beam_width_3db"),
    text("max_gain_azimuth"),
    text("horizontal_pattern_table"),
    flag("has_mechanical_tilt"),
    text("mechanical_tilt_degree"),
    flag("has_electrical_tilt"),
    text("electrical_tilt_degree"),
    flag("has_null_fill"),
    text("null_fill_percentage"),
    text("vertical_pattern_table"),
    text("antenna_gain"),
    text("estimated_antenna_losses"),
    text("estimated_feeder_losses"),
    text("estimated_multiplexer_losses"),
    text("estimated_system_losses"),
    text("effective_radiated_power"),
    text("effective_radiated_power_dbw"),
    flag("antenna_catalog_attached"),
    text("studio_manufacturer"),
    text("studio_model_number"),
    text("studio_serial_number"),
    text("studio_frequency"),
    text("studio_polarization"),
    text("stl_type"),
    text("signal_description"),
    text("technical_personnel"),
    text("other_observations"),
];

/// Step-1 names typed by the inspector; resolved to references, never sent
pub const REFERENCE_NAME_FIELDS: &[&str] = &["program_name", "broadcaster_name"];

/// Step-1 reference attributes carrying resolved identities
pub const REFERENCE_FIELDS: &[&str] = &["program", "broadcaster"];

/// Computed step-4 outputs; not editable
pub const DERIVED_FIELDS: &[&str] = &["effective_radiated_power", "effective_radiated_power_dbw"];

/// Step-1 contact fields mirrored from a Broadcaster record
pub const BROADCASTER_CONTACT_FIELDS: &[&str] = &[
    "po_box",
    "postal_code",
    "town",
    "location",
    "street",
    "phone_numbers",
    "contact_name",
    "contact_address",
    "contact_phone",
    "contact_email",
];

/// Top-level attributes sent only when the inspection is first created
pub const CREATION_FIELDS: &[&str] = &["status", "inspection_date"];

/// Attributes written only by the completion action
pub const COMPLETION_FIELDS: &[&str] = &["status", "completed_at"];

/// Persisted fields owned by `step`
pub fn persisted_fields(step: Step) -> &'static [FieldSpec] {
    match step {
        Step::One => STEP1_FIELDS,
        Step::Two => STEP2_FIELDS,
        Step::Three => STEP3_FIELDS,
        Step::Four => STEP4_FIELDS,
    }
}

/// Allow-list deciding whether auto-save may fire
pub fn meaningful_fields(step: Step) -> Meaningful {
    match step {
        Step::One => Meaningful::Listed(&[
            "program_name",
            "broadcaster_name",
            "station_type",
            "transmitting_site_name",
            "physical_location",
            "land_owner_name",
            "air_status",
            "off_air_reason",
        ]),
        Step::Two => Meaningful::Listed(&[
            "tower_owner_name",
            "height_above_ground",
            "tower_type",
            "rust_protection",
            "manufacturer_name",
        ]),
        Step::Three | Step::Four => Meaningful::AnyField,
    }
}

/// True when `fields` carry real intent for `step`
pub fn is_meaningful(step: Step, fields: &FieldValues) -> bool {
    match meaningful_fields(step) {
        Meaningful::Listed(names) => names.iter().any(|name| fields.has_value(name)),
        Meaningful::AnyField => fields
            .iter()
            .any(|(name, value)| is_editable(step, name) && value.is_meaningful()),
    }
}

/// Spec of a persisted field, searched across all steps
pub fn field_spec(name: &str) -> Option<(Step, &'static FieldSpec)> {
    Step::ALL.iter().find_map(|step| {
        persisted_fields(*step)
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| (*step, spec))
    })
}

/// Step that owns a field (including the step-1 typed names)
pub fn step_of(name: &str) -> Option<Step> {
    if REFERENCE_NAME_FIELDS.contains(&name) {
        return Some(Step::One);
    }
    field_spec(name).map(|(step, _)| step)
}

/// Value shape of an editable field
pub fn field_kind(name: &str) -> Option<FieldKind> {
    if REFERENCE_NAME_FIELDS.contains(&name) {
        return Some(FieldKind::Text);
    }
    field_spec(name).map(|(_, spec)| spec.kind)
}

pub fn is_derived(name: &str) -> bool {
    DERIVED_FIELDS.contains(&name)
}

/// Fields the inspector may change while on `step`
pub fn is_editable(step: Step, name: &str) -> bool {
    step_of(name) == Some(step) && !is_derived(name)
}

/// Fields held in the session for `step`: editable plus derived outputs
pub fn is_session_field(step: Step, name: &str) -> bool {
    step_of(name) == Some(step)
}

/// Steps that run synchronous validation before advancing
pub fn has_sync_validation(step: Step) -> bool {
    step == Step::One
}
