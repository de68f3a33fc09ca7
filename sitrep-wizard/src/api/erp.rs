//! Stateless ERP calculator endpoint

use crate::services::erp::{self, ErpInputs};
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::Query, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

/// Query parameters for `GET /session/erp`
#[derive(Debug, Default, Deserialize)]
pub struct ErpQuery {
    /// Transmitter power in watts
    pub power_watts: Option<String>,
    pub gain_dbi: Option<String>,
    pub loss_db: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ErpResponse {
    /// False when the power is missing or not positive; outputs are then empty
    pub computed: bool,
    pub tx_power_dbw: String,
    pub erp_dbw: String,
    pub erp_kw: String,
}

fn number(name: &str, raw: Option<&str>) -> ApiResult<Option<f64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => erp::parse_number(s)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("{} is not a number: {:?}", name, s))),
    }
}

/// GET /session/erp?power_watts=..&gain_dbi=..&loss_db=..
pub async fn calculate(Query(query): Query<ErpQuery>) -> ApiResult<Json<ErpResponse>> {
    let inputs = ErpInputs {
        power_watts: number("power_watts", query.power_watts.as_deref())?.filter(|p| *p > 0.0),
        gain_dbi: number("gain_dbi", query.gain_dbi.as_deref())?.unwrap_or(0.0),
        loss_db: number("loss_db", query.loss_db.as_deref())?.unwrap_or(0.0),
    };

    let response = match erp::compute(&inputs) {
        Some(result) => ErpResponse {
            computed: true,
            tx_power_dbw: format!("{:.2}", result.tx_power_dbw),
            erp_dbw: result.dbw_text(),
            erp_kw: result.kw_text(),
        },
        None => ErpResponse {
            computed: false,
            tx_power_dbw: String::new(),
            erp_dbw: String::new(),
            erp_kw: String::new(),
        },
    };
    Ok(Json(response))
}

pub fn erp_routes() -> Router<AppState> {
    Router::new().route("/session/erp", get(calculate))
}
