use serde::{Deserialize, Serialize};
use serde::de::{self, Deserializer};
use std::fmt;

// --------------------------------------------------------------------------------------------------------------
// FusionSolar northbound ("thirdData") API models
//
// Login:     POST /login          {"userName": ..., "systemCode": ...}
//            Response: {"success": bool, "message": ...} + Set-Cookie XSRF-TOKEN
//
// Telemetry: POST /getDevRealKpi  {"devTypeId": "1", "devIds": "<id>"}
//            Response: {"success": bool, "message": ..., "data": [{"dataItemMap": {"active_power": ...}}]}
// --------------------------------------------------------------------------------------------------------------

/// Cookie (and echoed request header) carrying the session token.
pub const XSRF_TOKEN: &str = "XSRF-TOKEN";

/// Message the API returns when the session has expired.
pub const USER_MUST_RELOGIN: &str = "USER_MUST_RELOGIN";

/// Device type id of a string inverter.
pub const DEV_TYPE_INVERTER: &str = "1";

// --------------------------------------------------------------------------------------------------------------
// Depending on the plant, numeric KPI fields arrive as numbers, numeric strings or null.

fn deserialize_optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NumberOrString;

    impl<'de> de::Visitor<'de> for NumberOrString {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, a numeric string or null")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| E::custom(format!("not a number: '{}'", v)))
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(NumberOrString)
}

// --------------------------------------------------------------------------------------------------------------

#[derive(Serialize, Debug)]
pub struct LoginRequest<'a> {
    #[serde(rename = "userName")]
    pub user_name:   &'a str,
    #[serde(rename = "systemCode")]
    pub system_code: &'a str,
}

/// Envelope shared by every northbound response.
#[derive(Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data:    Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn must_relogin(&self) -> bool {
        !self.success && self.message.as_deref() == Some(USER_MUST_RELOGIN)
    }
}

#[derive(Serialize, Debug)]
pub struct RealKpiRequest<'a> {
    #[serde(rename = "devTypeId")]
    pub dev_type_id: &'a str,
    #[serde(rename = "devIds")]
    pub dev_ids:     &'a str,
}

impl<'a> RealKpiRequest<'a> {
    pub fn inverter(device_id: &'a str) -> Self {
        Self { dev_type_id: DEV_TYPE_INVERTER, dev_ids: device_id }
    }
}

/// One entry of the `getDevRealKpi` data array.
#[derive(Deserialize, Debug, Clone)]
pub struct DeviceRealKpi {
    #[serde(rename = "devId", default)]
    pub dev_id:        Option<serde_json::Value>,
    #[serde(rename = "dataItemMap")]
    pub data_item_map: DataItemMap,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DataItemMap {
    /// Instantaneous inverter output in watts.
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub active_power: Option<f64>,
}

// --------------------------------------------------------------------------------------------------------------
