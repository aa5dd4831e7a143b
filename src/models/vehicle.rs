use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The shared delivery fleet. Identity is the variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vehicle {
    Van,
    GolfCart,
}

impl Vehicle {
    pub const ALL: [Vehicle; 2] = [Vehicle::Van, Vehicle::GolfCart];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vehicle::Van => "van",
            Vehicle::GolfCart => "golf_cart",
        }
    }
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vehicle {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "van" => Ok(Vehicle::Van),
            "golf_cart" => Ok(Vehicle::GolfCart),
            other => Err(AppError::NotFound(format!("unknown vehicle: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutType {
    #[default]
    DeliveryRun,
    Other,
}

/// Latest known checkout state of one vehicle, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub checked_out: bool,
    #[serde(default)]
    pub checked_out_by: Option<String>,
    #[serde(default)]
    pub checked_out_by_user_id: Option<String>,
    #[serde(default)]
    pub checkout_type: CheckoutType,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub delivery_run_active: bool,
}

impl VehicleStatus {
    pub fn available() -> Self {
        Self::default()
    }

    /// Checks the record-level invariants: an active run implies a checkout,
    /// and an `other` checkout carries a non-empty purpose.
    pub fn is_consistent(&self) -> bool {
        if self.delivery_run_active && !self.checked_out {
            return false;
        }

        if self.checked_out && self.checkout_type == CheckoutType::Other {
            return self
                .purpose
                .as_deref()
                .is_some_and(|purpose| !purpose.trim().is_empty());
        }

        true
    }
}
