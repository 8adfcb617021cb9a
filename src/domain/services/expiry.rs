//! Subscription expiry derivation and subscribe-time guards.

use chrono::{DateTime, Utc};

use crate::domain::entities::basket::BasketType;
use crate::domain::entities::basket_version::{BasketVersion, VersionStatus};
use crate::domain::entities::time_slot::BasketTimeSlot;
use crate::domain::services::market_calendar::MarketCalendar;

/// Expiry of a subscription taken at `subscribed_at`.
///
/// | type       | expires_at                                   |
/// |------------|----------------------------------------------|
/// | hour-bound | the slot's end time                          |
/// | single-day | market close of the subscription's local day |
/// | perpetual  | none                                         |
pub fn derive_expires_at(
    basket_type: BasketType,
    slot: Option<&BasketTimeSlot>,
    subscribed_at: DateTime<Utc>,
    calendar: &MarketCalendar,
) -> Result<Option<DateTime<Utc>>, String> {
    match basket_type {
        BasketType::HourBound => slot
            .map(|s| Some(s.end_time))
            .ok_or_else(|| "Hour-bound version has no time slot".to_string()),
        BasketType::SingleDay => Ok(Some(
            calendar.close_instant(calendar.local_date(subscribed_at)),
        )),
        BasketType::Perpetual => Ok(None),
    }
}

/// Whether a user may subscribe to `version` at `now`
pub fn check_subscribable(
    basket_type: BasketType,
    version: &BasketVersion,
    slot: Option<&BasketTimeSlot>,
    now: DateTime<Utc>,
) -> Result<(), String> {
    match (basket_type, version.status) {
        // Pre-subscription before the window opens
        (BasketType::HourBound, VersionStatus::Scheduled) => match slot {
            Some(s) if !s.has_ended(now) => Ok(()),
            Some(_) => Err(format!(
                "Version {} missed its publication window",
                version.version_number
            )),
            None => Err("Hour-bound version has no time slot".to_string()),
        },
        (BasketType::HourBound, VersionStatus::Published) => match slot {
            Some(s) if s.contains(now) => Ok(()),
            Some(_) => Err(format!(
                "Version {} is outside its publication window",
                version.version_number
            )),
            None => Err("Hour-bound version has no time slot".to_string()),
        },
        (_, VersionStatus::Published) => Ok(()),
        (_, status) => Err(format!(
            "Version {} is {} and cannot be subscribed to",
            version.version_number, status
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, NaiveTime, TimeZone};

    fn calendar() -> MarketCalendar {
        MarketCalendar::new(
            FixedOffset::east_opt(330 * 60).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn version(status: VersionStatus) -> BasketVersion {
        BasketVersion {
            id: 1,
            basket_id: 1,
            version_number: 1,
            status,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            price_at_approval: None,
            trading_date: None,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        }
    }

    fn slot(start: DateTime<Utc>, end: DateTime<Utc>) -> BasketTimeSlot {
        BasketTimeSlot {
            id: 1,
            basket_version_id: 1,
            scheduled_date: start.date_naive(),
            start_time: start,
            end_time: end,
            duration_minutes: (end - start).num_minutes(),
            timezone: "+05:30".to_string(),
            set_by: 1,
            actual_publish_time: None,
            actual_expire_time: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_hour_bound_expires_at_slot_end() {
        let s = slot(at(10, 0), at(10, 30));
        let expires =
            derive_expires_at(BasketType::HourBound, Some(&s), at(10, 5), &calendar()).unwrap();
        assert_eq!(expires, Some(at(10, 30)));
    }

    #[test]
    fn test_hour_bound_without_slot_is_an_error() {
        assert!(derive_expires_at(BasketType::HourBound, None, at(10, 5), &calendar()).is_err());
    }

    #[test]
    fn test_single_day_expires_at_local_close() {
        // 04:00 UTC = 09:30 IST, close 15:30 IST = 10:00 UTC
        let expires =
            derive_expires_at(BasketType::SingleDay, None, at(4, 0), &calendar()).unwrap();
        assert_eq!(expires, Some(at(10, 0)));
    }

    #[test]
    fn test_perpetual_never_expires() {
        let expires =
            derive_expires_at(BasketType::Perpetual, None, at(4, 0), &calendar()).unwrap();
        assert_eq!(expires, None);
    }

    #[test]
    fn test_hour_bound_subscribable_while_scheduled_or_inside_window() {
        let s = slot(at(10, 0), at(10, 30));
        let scheduled = version(VersionStatus::Scheduled);
        assert!(check_subscribable(BasketType::HourBound, &scheduled, Some(&s), at(9, 0)).is_ok());

        let published = version(VersionStatus::Published);
        assert!(check_subscribable(BasketType::HourBound, &published, Some(&s), at(10, 5)).is_ok());
        assert!(check_subscribable(BasketType::HourBound, &published, Some(&s), at(10, 30)).is_err());
    }

    #[test]
    fn test_ended_scheduled_window_is_not_subscribable() {
        let s = slot(at(10, 0), at(10, 30));
        let scheduled = version(VersionStatus::Scheduled);
        assert!(check_subscribable(
            BasketType::HourBound,
            &scheduled,
            Some(&s),
            at(10, 30) + Duration::seconds(1)
        )
        .is_err());
    }

    #[test]
    fn test_expired_and_unpublished_are_rejected() {
        for status in [VersionStatus::Expired, VersionStatus::Unpublished, VersionStatus::Draft] {
            let v = version(status);
            assert!(check_subscribable(BasketType::Perpetual, &v, None, at(9, 0)).is_err());
        }
        assert!(check_subscribable(
            BasketType::SingleDay,
            &version(VersionStatus::Published),
            None,
            at(9, 0)
        )
        .is_ok());
    }
}
