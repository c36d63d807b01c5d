// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Payment Reconciliation
//!
//! Tests critical boundary conditions in:
//! - Payment state machine (PAY-S01 to PAY-S06)
//! - Proration and downgrade boundary (PAY-P01 to PAY-P07)
//! - Subscription disposition (PAY-D01 to PAY-D05)
//! - Usage cache resync (PAY-C01 to PAY-C04)
//! - Credential codec (PAY-K01 to PAY-K03)
//! - Wallet webhook trust (PAY-W01 to PAY-W04)

mod state_machine_tests {
    use crate::reconcile::{poll_outcome, resolve_entry, Entry};
    use subkassa_shared::PaymentStatus;

    // =========================================================================
    // PAY-S01: PAID is absorbing - a final paid payment is never polled again
    // =========================================================================
    #[test]
    fn test_paid_final_is_absorbing() {
        assert_eq!(
            resolve_entry(PaymentStatus::Paid, true, false),
            Entry::AlreadyFinal { is_paid: true }
        );
        assert_eq!(
            resolve_entry(PaymentStatus::Paid, true, true),
            Entry::AlreadyFinal { is_paid: true }
        );
    }

    // =========================================================================
    // PAY-S02: CANCELED/final reopens exactly once, then stays closed
    // =========================================================================
    #[test]
    fn test_canceled_grace_recheck_is_one_shot() {
        assert_eq!(
            resolve_entry(PaymentStatus::Canceled, true, false),
            Entry::GraceRecheck
        );
        // After the re-check finalized it again the marker is spent.
        assert_eq!(
            resolve_entry(PaymentStatus::Canceled, true, true),
            Entry::AlreadyFinal { is_paid: false }
        );
    }

    // =========================================================================
    // PAY-S03: a reopened canceled payment polls like any live payment
    // =========================================================================
    #[test]
    fn test_reopened_canceled_payment_is_polled() {
        assert_eq!(
            resolve_entry(PaymentStatus::Canceled, false, true),
            Entry::Poll
        );
    }

    // =========================================================================
    // PAY-S04: adapter error is "unknown", never FAILED and never final
    // =========================================================================
    #[test]
    fn test_adapter_error_never_finalizes() {
        assert_eq!(poll_outcome(None), (PaymentStatus::Pending, false));
    }

    // =========================================================================
    // PAY-S05: PENDING poll result leaves the payment live
    // =========================================================================
    #[test]
    fn test_pending_poll_stays_live() {
        assert_eq!(
            poll_outcome(Some(PaymentStatus::Pending)),
            (PaymentStatus::Pending, false)
        );
    }

    // =========================================================================
    // PAY-S06: every terminal poll result finalizes
    // =========================================================================
    #[test]
    fn test_terminal_polls_finalize() {
        for status in [
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
        ] {
            assert_eq!(poll_outcome(Some(status)), (status, true));
        }
    }
}

mod proration_tests {
    use crate::error::BillingError;
    use crate::proration::{price_checkout, CurrentPlan};
    use crate::tariffs::Tariff;
    use time::macros::datetime;
    use uuid::Uuid;

    fn tariff(price: i64) -> Tariff {
        Tariff {
            id: Uuid::new_v4(),
            name: "plan".to_string(),
            requests_limit: 1000,
            price,
            is_hidden: false,
        }
    }

    // =========================================================================
    // PAY-P01: reference arithmetic - 1500/mo with 10 days left, upgrade to
    // 3000/mo for one month costs 3000 - floor(1500/30 * 10) = 2500
    // =========================================================================
    #[test]
    fn test_reference_proration_arithmetic() {
        let target = tariff(3000);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-11 10:00 UTC),
        };

        let price =
            price_checkout(&target, 1, Some(&plan), datetime!(2024-06-01 10:00 UTC)).unwrap();
        assert_eq!(price.discount, 500);
        assert_eq!(price.total, 2500);
    }

    // =========================================================================
    // PAY-P02: discount larger than the target price clamps the total to zero
    // (lateral move to an equally priced tariff with months of unused value)
    // =========================================================================
    #[test]
    fn test_total_clamps_to_zero() {
        let target = tariff(1000);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1000,
            // A 6-month purchase with ~3 months left outvalues one new month.
            ends_at: datetime!(2024-09-01 10:00 UTC),
        };

        let price =
            price_checkout(&target, 1, Some(&plan), datetime!(2024-06-01 10:00 UTC)).unwrap();
        assert!(price.discount > price.original_price);
        assert_eq!(price.total, 0);
    }

    // =========================================================================
    // PAY-P03: downgrade expiring today succeeds at full price, discount 0
    // =========================================================================
    #[test]
    fn test_downgrade_on_final_day_allowed() {
        let target = tariff(500);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-01 23:59:59 UTC),
        };

        let price =
            price_checkout(&target, 1, Some(&plan), datetime!(2024-06-01 08:00 UTC)).unwrap();
        assert_eq!(price.discount, 0);
        assert_eq!(price.total, 500);
    }

    // =========================================================================
    // PAY-P04: downgrade expiring tomorrow is rejected
    // =========================================================================
    #[test]
    fn test_downgrade_before_final_day_rejected() {
        let target = tariff(500);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 1500,
            ends_at: datetime!(2024-06-02 23:59:59 UTC),
        };

        let result = price_checkout(&target, 1, Some(&plan), datetime!(2024-06-01 08:00 UTC));
        assert!(matches!(
            result,
            Err(BillingError::DowngradeNotAllowed { .. })
        ));
    }

    // =========================================================================
    // PAY-P05: same tariff never prorates, whatever the remaining days
    // =========================================================================
    #[test]
    fn test_same_tariff_full_price() {
        let target = tariff(1500);
        let plan = CurrentPlan {
            tariff_id: target.id,
            price: 1500,
            ends_at: datetime!(2024-06-20 10:00 UTC),
        };

        let price =
            price_checkout(&target, 2, Some(&plan), datetime!(2024-06-01 10:00 UTC)).unwrap();
        assert_eq!(price.discount, 0);
        assert_eq!(price.total, 3000);
    }

    // =========================================================================
    // PAY-P06: a plan ending within the hour still discounts fractionally
    // =========================================================================
    #[test]
    fn test_fractional_day_discount_floors() {
        let target = tariff(3000);
        let plan = CurrentPlan {
            tariff_id: Uuid::new_v4(),
            price: 3000,
            // 12 hours remaining = 0.5 days -> floor(100 * 0.5) = 50
            ends_at: datetime!(2024-06-01 22:00 UTC),
        };

        let price =
            price_checkout(&target, 1, Some(&plan), datetime!(2024-06-01 10:00 UTC)).unwrap();
        assert_eq!(price.discount, 50);
    }

    // =========================================================================
    // PAY-P07: multi-month purchase multiplies the price before discounting
    // =========================================================================
    #[test]
    fn test_multi_month_original_price() {
        let target = tariff(1000);
        let price = price_checkout(&target, 6, None, datetime!(2024-06-01 10:00 UTC)).unwrap();
        assert_eq!(price.original_price, 6000);
        assert_eq!(price.total, 6000);
    }
}

mod disposition_tests {
    use crate::dates::add_months;
    use crate::entitlements::{plan_disposition, Disposition, User};
    use time::macros::datetime;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user(tariff: Uuid, end: Option<OffsetDateTime>) -> User {
        User {
            id: 7,
            token: Uuid::new_v4(),
            tariff_id: tariff,
            subscription_start: None,
            subscription_end: end,
            requests_used: 10,
            chat_id: None,
            expiry_warned: false,
        }
    }

    // =========================================================================
    // PAY-D01: extension computes from the current end, not from now
    // =========================================================================
    #[test]
    fn test_extension_starts_from_current_end() {
        let tariff = Uuid::new_v4();
        let u = user(tariff, Some(datetime!(2024-06-25 23:59:59 UTC)));

        let d = plan_disposition(&u, tariff, 1, datetime!(2024-06-01 10:00 UTC));
        assert_eq!(
            d,
            Disposition::Extend {
                new_end: datetime!(2024-07-25 23:59:59 UTC)
            }
        );
    }

    // =========================================================================
    // PAY-D02: activation windows are day aligned - midnight to 23:59:59
    // =========================================================================
    #[test]
    fn test_activation_is_day_aligned() {
        let u = user(Uuid::new_v4(), None);
        let d = plan_disposition(&u, Uuid::new_v4(), 1, datetime!(2024-06-15 13:37:21 UTC));
        assert_eq!(
            d,
            Disposition::Activate {
                start: datetime!(2024-06-15 00:00:00 UTC),
                end: datetime!(2024-07-15 23:59:59 UTC),
            }
        );
    }

    // =========================================================================
    // PAY-D03: month-end clamping - Jan 31 + 1 month lands on the last day of
    // February, leap-year aware
    // =========================================================================
    #[test]
    fn test_month_end_clamping() {
        assert_eq!(
            add_months(datetime!(2024-01-31 12:00 UTC), 1),
            datetime!(2024-02-29 12:00 UTC)
        );
        assert_eq!(
            add_months(datetime!(2023-01-31 12:00 UTC), 1),
            datetime!(2023-02-28 12:00 UTC)
        );
    }

    // =========================================================================
    // PAY-D04: December + 1 month rolls the year over
    // =========================================================================
    #[test]
    fn test_year_rollover() {
        assert_eq!(
            add_months(datetime!(2024-12-15 12:00 UTC), 1),
            datetime!(2025-01-15 12:00 UTC)
        );
    }

    // =========================================================================
    // PAY-D05: paying for a different tariff on the last active day activates
    // rather than extends
    // =========================================================================
    #[test]
    fn test_tariff_switch_on_last_day_activates() {
        let u = user(Uuid::new_v4(), Some(datetime!(2024-06-01 23:59:59 UTC)));
        let d = plan_disposition(&u, Uuid::new_v4(), 1, datetime!(2024-06-01 10:00 UTC));
        assert!(matches!(d, Disposition::Activate { .. }));
    }
}

mod cache_resync_tests {
    use crate::usage_cache::plan_resync;

    // =========================================================================
    // PAY-C01: tariff change grants a fresh quota even mid-allowance
    // =========================================================================
    #[test]
    fn test_tariff_change_overwrites_remaining() {
        assert_eq!(plan_resync(true, Some(999), 100), Some(100));
    }

    // =========================================================================
    // PAY-C02: extension keeps a positive remaining quota untouched
    // =========================================================================
    #[test]
    fn test_extension_keeps_positive_quota() {
        assert_eq!(plan_resync(false, Some(1), 100), None);
    }

    // =========================================================================
    // PAY-C03: extension tops up a zero or negative quota
    // =========================================================================
    #[test]
    fn test_extension_tops_up_exhausted_quota() {
        assert_eq!(plan_resync(false, Some(0), 100), Some(100));
        assert_eq!(plan_resync(false, Some(-17), 100), Some(100));
    }

    // =========================================================================
    // PAY-C04: a cold cache stays cold on extension (lazy repopulation)
    // =========================================================================
    #[test]
    fn test_cold_cache_stays_cold_on_extension() {
        assert_eq!(plan_resync(false, None, 100), None);
    }
}

mod apikey_tests {
    use subkassa_shared::apikey::{api_key_from_token, token_from_api_key};
    use uuid::Uuid;

    // =========================================================================
    // PAY-K01: the codec is reversible from either direction
    // =========================================================================
    #[test]
    fn test_codec_round_trips() {
        let token = Uuid::new_v4();
        let key = api_key_from_token(&token);
        assert_eq!(token_from_api_key(&key).unwrap(), token);
    }

    // =========================================================================
    // PAY-K02: distinct tokens never collide on the derived key
    // =========================================================================
    #[test]
    fn test_codec_is_injective() {
        let a = api_key_from_token(&Uuid::new_v4());
        let b = api_key_from_token(&Uuid::new_v4());
        assert_ne!(a, b);
    }

    // =========================================================================
    // PAY-K03: a derived key is not the raw token (no accidental passthrough)
    // =========================================================================
    #[test]
    fn test_key_is_not_raw_token() {
        let token = Uuid::new_v4();
        let key = api_key_from_token(&token);
        assert!(key.starts_with("ak_"));
        assert!(!key.contains(&token.to_string()));
    }
}

mod webhook_tests {
    use crate::error::BillingError;
    use crate::providers::wallet::WalletOperation;
    use crate::webhooks::WalletNotification;

    fn notification() -> WalletNotification {
        WalletNotification {
            notification_type: "p2p-incoming".to_string(),
            operation_id: "1234567".to_string(),
            amount: "300.00".to_string(),
            currency: "643".to_string(),
            datetime: "2024-06-01T12:00:00Z".to_string(),
            sender: "41001000040".to_string(),
            codepro: "false".to_string(),
            label: "order-1".to_string(),
            sha1_hash: "ae895983211ea835f427d349771bd40f985a1ac1".to_string(),
        }
    }

    // =========================================================================
    // PAY-W01: flipping any signed field invalidates the signature
    // =========================================================================
    #[test]
    fn test_any_field_flip_breaks_signature() {
        let mutations: Vec<Box<dyn Fn(&mut WalletNotification)>> = vec![
            Box::new(|n| n.operation_id = "999".to_string()),
            Box::new(|n| n.amount = "301.00".to_string()),
            Box::new(|n| n.sender = "41009999999".to_string()),
            Box::new(|n| n.codepro = "true".to_string()),
            Box::new(|n| n.label = "order-2".to_string()),
        ];

        for mutate in mutations {
            let mut n = notification();
            mutate(&mut n);
            assert!(matches!(
                n.verify_signature("s3cret"),
                Err(BillingError::WebhookSignatureInvalid)
            ));
        }
    }

    // =========================================================================
    // PAY-W02: an empty label still participates in the signature
    // =========================================================================
    #[test]
    fn test_empty_label_changes_signature() {
        let mut n = notification();
        n.label = String::new();
        assert!(n.verify_signature("s3cret").is_err());
    }

    // =========================================================================
    // PAY-W03: cross-check trusts the wallet API over the notification body
    // =========================================================================
    #[test]
    fn test_cross_check_rejects_inflated_amount() {
        let n = notification();
        let op = WalletOperation {
            operation_id: "1234567".to_string(),
            status: "success".to_string(),
            amount: 3.0,
            sender: Some("41001000040".to_string()),
            label: Some("order-1".to_string()),
        };
        assert!(matches!(
            n.cross_check(&op),
            Err(BillingError::WebhookMismatch(_))
        ));
    }

    // =========================================================================
    // PAY-W04: sub-cent float noise in the amount does not break the match
    // =========================================================================
    #[test]
    fn test_cross_check_tolerates_float_noise() {
        let n = notification();
        let op = WalletOperation {
            operation_id: "1234567".to_string(),
            status: "success".to_string(),
            amount: 300.0000001,
            sender: Some("41001000040".to_string()),
            label: Some("order-1".to_string()),
        };
        assert!(n.cross_check(&op).is_ok());
    }
}
