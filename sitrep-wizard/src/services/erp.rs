//! Effective radiated power calculator
//!
//! ```text
//! P_dBW   = 10 * log10(P)
//! ERP_dBW = P_dBW + G - L
//! ERP_kW  = 10^(ERP_dBW / 10) / 1000
//! ```
//!
//! P comes from the step-3 amplifier reading, falling back to the exciter
//! reading. L is the sum of the itemized losses when any of them is positive,
//! otherwise the aggregate system loss.

use crate::models::fields::FieldValues;
use serde::{Deserialize, Serialize};

pub const AMPLIFIER_READING: &str = "amplifier_actual_reading";
pub const EXCITER_READING: &str = "exciter_actual_reading";
pub const ANTENNA_GAIN: &str = "antenna_gain";
pub const SYSTEM_LOSSES: &str = "estimated_system_losses";
pub const ITEMIZED_LOSSES: &[&str] = &[
    "estimated_antenna_losses",
    "estimated_feeder_losses",
    "estimated_multiplexer_losses",
];
pub const ERP_KW: &str = "effective_radiated_power";
pub const ERP_DBW: &str = "effective_radiated_power_dbw";

/// Step-3 fields read (never written) by step 4
pub const POWER_FIELDS: &[&str] = &[AMPLIFIER_READING, EXCITER_READING];

/// Inputs whose change triggers recomputation
pub fn is_input(field: &str) -> bool {
    field == ANTENNA_GAIN || field == SYSTEM_LOSSES || ITEMIZED_LOSSES.contains(&field)
}

/// Parsed calculator inputs
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ErpInputs {
    /// Transmitter power in watts, if a positive reading exists
    pub power_watts: Option<f64>,
    /// Antenna gain in dBi
    pub gain_dbi: f64,
    /// Total losses in dB
    pub loss_db: f64,
}

impl ErpInputs {
    /// Read inputs from step-4 fields and the step-3 power readings
    pub fn from_fields(step4: &FieldValues, power_source: &FieldValues) -> Self {
        let reading = |name: &str| {
            power_source
                .text(name)
                .and_then(parse_number)
                .filter(|p| *p > 0.0)
        };
        let power_watts = reading(AMPLIFIER_READING).or_else(|| reading(EXCITER_READING));

        let number = |name: &str| step4.text(name).and_then(parse_number).unwrap_or(0.0);
        let itemized: Vec<f64> = ITEMIZED_LOSSES.iter().map(|&name| number(name)).collect();
        let loss_db = if itemized.iter().any(|l| *l > 0.0) {
            itemized.iter().sum::<f64>()
        } else {
            number(SYSTEM_LOSSES)
        };

        Self {
            power_watts,
            gain_dbi: number(ANTENNA_GAIN),
            loss_db,
        }
    }
}

/// Calculator outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErpResult {
    pub tx_power_dbw: f64,
    pub erp_dbw: f64,
    pub erp_kw: f64,
}

impl ErpResult {
    /// dBW output as stored (two decimals)
    pub fn dbw_text(&self) -> String {
        format!("{:.2}", self.erp_dbw)
    }

    /// kW output as stored (three decimals)
    pub fn kw_text(&self) -> String {
        format!("{:.3}", self.erp_kw)
    }
}

/// Compute ERP; `None` means the outputs must be cleared
pub fn compute(inputs: &ErpInputs) -> Option<ErpResult> {
    let power = inputs.power_watts.filter(|p| p.is_finite() && *p > 0.0)?;

    let tx_power_dbw = 10.0 * power.log10();
    let erp_dbw = tx_power_dbw + inputs.gain_dbi - inputs.loss_db;
    let erp_kw = 10f64.powf(erp_dbw / 10.0) / 1000.0;

    if !erp_dbw.is_finite() || !erp_kw.is_finite() || erp_kw <= 0.0 {
        return None;
    }

    Some(ErpResult {
        tx_power_dbw,
        erp_dbw,
        erp_kw,
    })
}

/// Write the outputs (or cleared outputs) into the step-4 fields
pub fn apply(fields: &mut FieldValues, result: Option<&ErpResult>) {
    match result {
        Some(r) => {
            fields.set(ERP_DBW, r.dbw_text());
            fields.set(ERP_KW, r.kw_text());
        }
        None => {
            fields.set(ERP_DBW, "");
            fields.set(ERP_KW, "");
        }
    }
}

/// Recompute from session fields and store the outputs
pub fn recompute(step4: &mut FieldValues, power_source: &FieldValues) -> Option<ErpResult> {
    let result = compute(&ErpInputs::from_fields(step4, power_source));
    apply(step4, result.as_ref());
    result
}

/// Lenient number parsing: leading numeric prefix, like "10 dBi" → 10
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return n.is_finite().then_some(n);
    }

    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    trimmed[..end].parse::<f64>().ok().filter(|n| n.is_finite())
}
