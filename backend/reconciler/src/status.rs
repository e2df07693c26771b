//! Campaign lifecycle derivation.
//!
//! The ledger stores independent flags (`is_active`, `is_paused`,
//! `is_withdrawn`) and a time window; the UI-facing lifecycle state is
//! always derived from those at read time. The mirror's cached `status`
//! column is a display hint only and may lag.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::RawCampaign;

/// Derived lifecycle state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Start date not yet reached.
    Pending,
    /// Inside the time window and accepting donations.
    Active,
    /// Operator-paused; donations halted without ending the window.
    Paused,
    /// Explicitly deactivated, or past the end date.
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map raw ledger flags + the current time onto a lifecycle state.
///
/// Precedence is deliberate: the pause flag and the explicit inactive
/// flag (set by `removeCampaign`) win over the time-window checks, so an
/// operator action always overrides a window that would otherwise read
/// as active.
pub fn derive_status(raw: &RawCampaign, now: i64) -> CampaignStatus {
    if raw.is_paused {
        CampaignStatus::Paused
    } else if !raw.is_active {
        CampaignStatus::Ended
    } else if now < raw.start_date {
        CampaignStatus::Pending
    } else if now > raw.end_date {
        CampaignStatus::Ended
    } else {
        CampaignStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_000;
    const END: i64 = 2_000;

    fn raw(is_active: bool, is_paused: bool) -> RawCampaign {
        RawCampaign {
            title: "t".to_string(),
            description: "d".to_string(),
            owner_address: "0xabc".to_string(),
            goal: 10,
            funds_raised: 0,
            start_date: START,
            end_date: END,
            is_active,
            is_paused,
            is_withdrawn: false,
        }
    }

    /// Exhaustive grid: 2 (active) x 2 (paused) x 3 (before/inside/after
    /// the time window).
    #[test]
    fn full_flag_time_grid() {
        let times = [
            (START - 1, "before"),
            (START + 500, "inside"),
            (END + 1, "after"),
        ];
        for &active in &[true, false] {
            for &paused in &[true, false] {
                for &(now, label) in &times {
                    let got = derive_status(&raw(active, paused), now);
                    let want = if paused {
                        CampaignStatus::Paused
                    } else if !active {
                        CampaignStatus::Ended
                    } else if now < START {
                        CampaignStatus::Pending
                    } else if now > END {
                        CampaignStatus::Ended
                    } else {
                        CampaignStatus::Active
                    };
                    assert_eq!(
                        got, want,
                        "active={active} paused={paused} now={label}"
                    );
                }
            }
        }
    }

    #[test]
    fn paused_wins_regardless_of_other_fields() {
        for &active in &[true, false] {
            for &now in &[START - 1, START + 1, END + 1] {
                assert_eq!(derive_status(&raw(active, true), now), CampaignStatus::Paused);
            }
        }
    }

    #[test]
    fn inactive_unpaused_is_always_ended() {
        for &now in &[START - 1, START + 1, END + 1] {
            assert_eq!(derive_status(&raw(false, false), now), CampaignStatus::Ended);
        }
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        assert_eq!(derive_status(&raw(true, false), START), CampaignStatus::Active);
        assert_eq!(derive_status(&raw(true, false), END), CampaignStatus::Active);
    }

    #[test]
    fn expired_window_with_stale_active_flag_is_ended() {
        // removeCampaign never ran, the flag still says active, but the
        // end date has passed.
        assert_eq!(derive_status(&raw(true, false), END + 1), CampaignStatus::Ended);
    }
}
