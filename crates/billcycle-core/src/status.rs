use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Scheduled,
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl InstanceStatus {
    /// Statuses that still expect a payment and may be replaced when a
    /// template's schedule is regenerated.
    pub const UNRESOLVED: [InstanceStatus; 2] =
        [InstanceStatus::Scheduled, InstanceStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;

        matches!(
            (self, next),
            (Scheduled, Pending | Paid | Overdue | Cancelled)
                | (Pending, Paid | Overdue | Cancelled)
                | (Overdue, Paid | Cancelled)
        )
    }

    pub fn transition(self, next: InstanceStatus) -> Result<InstanceStatus, BillingError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BillingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = BillingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(BillingError::Validation(format!("unknown instance status '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceStatus::*;

    const ALL: [InstanceStatus; 5] = [Scheduled, Pending, Paid, Overdue, Cancelled];

    #[test]
    fn paid_never_becomes_overdue() {
        let err = Paid.transition(Overdue).unwrap_err();
        assert!(matches!(
            err,
            BillingError::InvalidTransition {
                from: Paid,
                to: Overdue
            }
        ));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for next in ALL {
            assert!(!Paid.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn open_states_move_forward() {
        assert_eq!(Scheduled.transition(Pending).unwrap(), Pending);
        assert_eq!(Scheduled.transition(Overdue).unwrap(), Overdue);
        assert_eq!(Pending.transition(Paid).unwrap(), Paid);
        assert_eq!(Overdue.transition(Paid).unwrap(), Paid);
        assert_eq!(Overdue.transition(Cancelled).unwrap(), Cancelled);
        assert!(Overdue.transition(Pending).is_err());
        assert!(Pending.transition(Scheduled).is_err());
        assert!(Overdue.transition(Overdue).is_err());
    }

    #[test]
    fn string_forms_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("late".parse::<InstanceStatus>().is_err());
    }
}
