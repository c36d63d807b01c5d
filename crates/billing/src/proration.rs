//! Checkout pricing: proration and the downgrade rule.
//!
//! A mid-cycle upgrade is discounted by the unused value of the current
//! subscription. Downgrades are rejected while the current plan still has
//! paid days left, with a grace exception on the final calendar day.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::dates::days_remaining;
use crate::error::{BillingError, BillingResult};
use crate::tariffs::Tariff;

/// The subscription a user currently holds, as far as pricing cares.
#[derive(Debug, Clone)]
pub struct CurrentPlan {
    pub tariff_id: Uuid,
    /// Monthly price of the current tariff.
    pub price: i64,
    pub ends_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPrice {
    pub original_price: i64,
    pub discount: i64,
    /// What the provider is asked to charge.
    pub total: i64,
}

/// Price a checkout of `months` of `tariff`, prorating against the user's
/// active plan when they are switching tariffs mid-cycle.
///
/// `current` must only be passed for an active, non-expired subscription;
/// callers resolve activity (the end date being today still counts as
/// active). `months` must be positive.
pub fn price_checkout(
    tariff: &Tariff,
    months: i32,
    current: Option<&CurrentPlan>,
    now: OffsetDateTime,
) -> BillingResult<CheckoutPrice> {
    if months <= 0 {
        return Err(BillingError::InvalidMonthCount(months));
    }

    let original_price = tariff.price * months as i64;

    let plan = match current {
        Some(plan) if plan.tariff_id != tariff.id => plan,
        // Same tariff or no active subscription: full price.
        _ => {
            return Ok(CheckoutPrice {
                original_price,
                discount: 0,
                total: original_price,
            })
        }
    };

    if tariff.price < plan.price {
        // Downgrade. Allowed at full price only on the last calendar day of
        // the current subscription.
        if plan.ends_at.date() == now.date() {
            return Ok(CheckoutPrice {
                original_price,
                discount: 0,
                total: original_price,
            });
        }
        let remaining = days_remaining(now, plan.ends_at).ceil() as i64;
        return Err(BillingError::DowngradeNotAllowed {
            detail: format!(
                "current plan is active for {} more day(s), until {}",
                remaining,
                plan.ends_at.date()
            ),
        });
    }

    // Upgrade or lateral move: credit the unused value of the current plan.
    let discount = ((plan.price as f64 / 30.0) * days_remaining(now, plan.ends_at)).floor() as i64;
    let total = (original_price - discount).max(0);

    Ok(CheckoutPrice {
        original_price,
        discount,
        total,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    fn tariff(price: i64) -> Tariff {
        Tariff {
            id: Uuid::new_v4(),
            name: format!("plan-{price}"),
            requests_limit: 100,
            price,
            is_hidden: false,
        }
    }

    #[test]
    fn non_positive_month_count_is_rejected() {
        // A zero or negative count would price at zero (or below) and reach
        // the provider as a bogus charge.
        let t = tariff(1500);
        let now = datetime!(2024-06-01 12:00 UTC);
        assert!(matches!(
            price_checkout(&t, 0, None, now).unwrap_err(),
            BillingError::InvalidMonthCount(0)
        ));
        assert!(matches!(
            price_checkout(&t, -3, None, now).unwrap_err(),
            BillingError::InvalidMonthCount(-3)
        ));
    }

    #[test]
    fn no_active_plan_pays_full_price() {
        let t = tariff(1500);
        let price = price_checkout(&t, 2, None, datetime!(2024-06-01 12:00 UTC)).unwrap();
        assert_eq!(
            price,
            CheckoutPrice {
                original_price: 3000,
                discount: 0,
                total: 3000
            }
        );
    }

    #[test]
    fn same_tariff_extension_has_no_discount() {
        let t = tariff(1500);
        let plan = CurrentPlan {
            tariff_id: t.id,
            price: 1500,
            ends_at: datetime!(2024-06-20 23:59:59 UTC),
        };
        let price =
            price_checkout(&t, 1, Some(&plan), datetime!(2024-06-01 12:00 UTC)).unwrap();
        assert_eq!(price.discount, 0);
        assert_eq!(price.total, 1500);
    }

    #[test]
    fn upgrade_is_prorated_by_remaining_days() {
        // 1500/mo plan with exactly 10 days left, upgrading to 3000/mo:
        // discount = floor(1500 / 30 * 10) = 500, total = 3000 - 500 = 2500.
        let new = tariff(3000);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-11 00:00:00 UTC),
        };
        let price =
            price_checkout(&new, 1, Some(&plan), datetime!(2024-06-01 00:00:00 UTC)).unwrap();
        assert_eq!(price.original_price, 3000);
        assert_eq!(price.discount, 500);
        assert_eq!(price.total, 2500);
    }

    #[test]
    fn discount_never_pushes_total_below_zero() {
        let new = tariff(100);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 100,
            ends_at: datetime!(2024-07-30 23:59:59 UTC),
        };
        // Lateral move with nearly two months of unused value.
        let price =
            price_checkout(&new, 1, Some(&plan), datetime!(2024-06-01 00:00:00 UTC)).unwrap();
        assert_eq!(price.total, 0);
    }

    #[test]
    fn downgrade_rejected_while_days_remain() {
        let new = tariff(500);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-02 23:59:59 UTC),
        };
        // Expiring tomorrow: rejected.
        let err =
            price_checkout(&new, 1, Some(&plan), datetime!(2024-06-01 12:00 UTC)).unwrap_err();
        assert!(matches!(err, BillingError::DowngradeNotAllowed { .. }));
    }

    #[test]
    fn downgrade_allowed_on_final_calendar_day() {
        let new = tariff(500);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-01 23:59:59 UTC),
        };
        // Expiring today: allowed, no discount.
        let price =
            price_checkout(&new, 1, Some(&plan), datetime!(2024-06-01 08:00 UTC)).unwrap();
        assert_eq!(price.discount, 0);
        assert_eq!(price.total, 500);
    }
}
