use std::fmt;

use serde::Serialize;

use crate::engine::selection::SelectionSet;
use crate::engine::status_store::StatusSnapshot;
use crate::models::identity::Identity;
use crate::models::vehicle::{CheckoutType, Vehicle, VehicleStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    EmptySelection,
    StatusLoading,
    RunActive,
    CheckedOutForOther { purpose: Option<String> },
    CheckedOutByOther { label: Option<String> },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::EmptySelection => f.write_str("Select pre-delivery orders"),
            DenyReason::StatusLoading => f.write_str("Vehicle status is loading"),
            DenyReason::RunActive => f.write_str("Vehicle already has an active run"),
            DenyReason::CheckedOutForOther { purpose } => {
                f.write_str("Checked out for Other")?;
                if let Some(purpose) = purpose {
                    write!(f, " ({purpose})")?;
                }
                f.write_str("; check in, then check out again for a Delivery run")
            }
            DenyReason::CheckedOutByOther { label: Some(label) } => {
                write!(f, "Checked out by {label}")
            }
            DenyReason::CheckedOutByOther { label: None } => {
                f.write_str("Checked out by another user")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Eligibility {
    Allowed,
    Denied { reason: DenyReason },
}

impl Eligibility {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Eligibility::Allowed)
    }

    pub fn reason(&self) -> Option<&DenyReason> {
        match self {
            Eligibility::Allowed => None,
            Eligibility::Denied { reason } => Some(reason),
        }
    }
}

fn denied(reason: DenyReason) -> Eligibility {
    Eligibility::Denied { reason }
}

// First matching denial wins.
pub fn can_start(
    vehicle: Vehicle,
    statuses: &StatusSnapshot,
    selection: &SelectionSet,
    user: &Identity,
) -> Eligibility {
    if selection.is_empty() {
        return denied(DenyReason::EmptySelection);
    }

    let Some(status) = statuses.get(vehicle) else {
        return denied(DenyReason::StatusLoading);
    };

    if status.delivery_run_active {
        return denied(DenyReason::RunActive);
    }

    if status.checked_out && status.checkout_type == CheckoutType::Other {
        return denied(DenyReason::CheckedOutForOther {
            purpose: non_empty(status.purpose.as_deref()),
        });
    }

    if status.checked_out
        && status.checkout_type == CheckoutType::DeliveryRun
        && !owned_by(status, user)
    {
        return denied(DenyReason::CheckedOutByOther {
            label: non_empty(status.checked_out_by.as_deref()),
        });
    }

    Eligibility::Allowed
}

// A stored user id is decisive. Older records without one match on the label.
pub fn owned_by(status: &VehicleStatus, user: &Identity) -> bool {
    if let Some(owner_id) = status.checked_out_by_user_id.as_deref() {
        return owner_id == user.id;
    }

    let Some(label) = status.checked_out_by.as_deref() else {
        return false;
    };

    user.display_name.as_deref() == Some(label) || user.email.as_deref() == Some(label)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;
    use crate::models::order::{Order, OrderStatus};

    fn selection_of(count: u128) -> SelectionSet {
        let orders: Vec<Order> = (1..=count)
            .map(|seed| Order {
                id: Uuid::from_u128(seed),
                reference: format!("SO-{seed}"),
                status: OrderStatus::PreDelivery,
                pick_status: None,
                created_at: Utc::now(),
            })
            .collect();
        let mut selection = SelectionSet::new();
        selection.select_all(&orders);
        selection
    }

    fn snapshot(status: VehicleStatus) -> StatusSnapshot {
        StatusSnapshot::from_statuses(HashMap::from([(Vehicle::Van, status)]))
    }

    fn alice() -> Identity {
        Identity::new("u-alice")
            .with_display_name("Alice")
            .with_email("alice@example.com")
    }

    fn held_by(id: Option<&str>, label: Option<&str>) -> VehicleStatus {
        VehicleStatus {
            checked_out: true,
            checked_out_by: label.map(str::to_string),
            checked_out_by_user_id: id.map(str::to_string),
            checkout_type: CheckoutType::DeliveryRun,
            ..VehicleStatus::available()
        }
    }

    #[test]
    fn empty_selection_is_denied_first() {
        let decision = can_start(
            Vehicle::Van,
            &StatusSnapshot::default(),
            &SelectionSet::new(),
            &alice(),
        );
        assert_eq!(decision.reason(), Some(&DenyReason::EmptySelection));
        assert_eq!(
            decision.reason().unwrap().to_string(),
            "Select pre-delivery orders"
        );
    }

    #[test]
    fn unloaded_status_is_denied_as_loading() {
        let decision = can_start(
            Vehicle::Van,
            &StatusSnapshot::default(),
            &selection_of(1),
            &alice(),
        );
        assert_eq!(decision.reason(), Some(&DenyReason::StatusLoading));
    }

    #[test]
    fn idle_vehicle_is_allowed() {
        let decision = can_start(
            Vehicle::Van,
            &snapshot(VehicleStatus::available()),
            &selection_of(2),
            &alice(),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn other_checkout_reason_names_the_purpose() {
        let status = VehicleStatus {
            checked_out: true,
            checkout_type: CheckoutType::Other,
            purpose: Some("maintenance".to_string()),
            checked_out_by_user_id: Some("u-alice".to_string()),
            ..VehicleStatus::available()
        };

        let decision = can_start(Vehicle::Van, &snapshot(status), &selection_of(1), &alice());
        let reason = decision.reason().unwrap().to_string();

        assert!(reason.contains("maintenance"));
        assert!(reason.starts_with("Checked out for Other"));
        assert!(reason.ends_with("check out again for a Delivery run"));
    }

    #[test]
    fn other_checkout_without_purpose_omits_suffix() {
        let reason = DenyReason::CheckedOutForOther { purpose: None }.to_string();
        assert_eq!(
            reason,
            "Checked out for Other; check in, then check out again for a Delivery run"
        );
    }

    #[test]
    fn delivery_checkout_by_someone_else_names_them() {
        let decision = can_start(
            Vehicle::Van,
            &snapshot(held_by(Some("u-bob"), Some("Bob"))),
            &selection_of(1),
            &alice(),
        );
        assert_eq!(decision.reason().unwrap().to_string(), "Checked out by Bob");

        let anonymous = can_start(
            Vehicle::Van,
            &snapshot(held_by(Some("u-bob"), None)),
            &selection_of(1),
            &alice(),
        );
        assert_eq!(
            anonymous.reason().unwrap().to_string(),
            "Checked out by another user"
        );
    }

    #[test]
    fn own_delivery_checkout_is_allowed() {
        let decision = can_start(
            Vehicle::Van,
            &snapshot(held_by(Some("u-alice"), Some("Alice"))),
            &selection_of(1),
            &alice(),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn id_match_wins_over_mismatched_label() {
        let status = held_by(Some("u-alice"), Some("Someone Else"));
        assert!(owned_by(&status, &alice()));
    }

    #[test]
    fn id_mismatch_is_not_rescued_by_label() {
        let status = held_by(Some("u-bob"), Some("Alice"));
        assert!(!owned_by(&status, &alice()));
    }

    #[test]
    fn legacy_records_match_on_display_name_or_email() {
        assert!(owned_by(&held_by(None, Some("Alice")), &alice()));
        assert!(owned_by(&held_by(None, Some("alice@example.com")), &alice()));
        assert!(!owned_by(&held_by(None, Some("Bob")), &alice()));
        assert!(!owned_by(&held_by(None, None), &alice()));
    }

    fn any_status() -> impl Strategy<Value = VehicleStatus> {
        (
            any::<bool>(),
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(prop_oneof![Just("u-alice".to_string()), "u-[a-z]{1,4}"]),
            prop_oneof![Just(CheckoutType::DeliveryRun), Just(CheckoutType::Other)],
            proptest::option::of("[a-z ]{0,12}"),
            any::<bool>(),
        )
            .prop_map(
                |(checked_out, by, by_id, checkout_type, purpose, active)| VehicleStatus {
                    checked_out: checked_out || active,
                    checked_out_by: by,
                    checked_out_by_user_id: by_id,
                    checkout_type,
                    purpose,
                    delivery_run_active: active,
                },
            )
    }

    proptest! {
        #[test]
        fn active_run_always_denies(mut status in any_status(), count in 1u128..5) {
            status.checked_out = true;
            status.delivery_run_active = true;
            let decision = can_start(Vehicle::Van, &snapshot(status), &selection_of(count), &alice());
            prop_assert_eq!(decision.reason(), Some(&DenyReason::RunActive));
        }

        #[test]
        fn empty_selection_always_denies(status in any_status(), loaded in any::<bool>()) {
            let statuses = if loaded { snapshot(status) } else { StatusSnapshot::default() };
            let decision = can_start(Vehicle::Van, &statuses, &SelectionSet::new(), &alice());
            prop_assert_eq!(decision.reason(), Some(&DenyReason::EmptySelection));
        }

        #[test]
        fn own_id_never_denied_for_ownership(mut status in any_status(), label in "[A-Za-z]{1,8}") {
            status.checked_out_by_user_id = Some("u-alice".to_string());
            status.checked_out_by = Some(label);
            let decision = can_start(Vehicle::Van, &snapshot(status), &selection_of(1), &alice());
            let denied_for_ownership = matches!(
                decision.reason(),
                Some(DenyReason::CheckedOutByOther { .. })
            );
            prop_assert!(!denied_for_ownership);
        }
    }
}
