//! Built-in entity mappings.
//!
//! One function per entity. The order of `fields` is the insert column
//! order. Defaults mirror what the platform schema expects for rows created
//! by the legacy application.

use serde_json::{json, Value};

use super::{EntityMapping, FieldSpec, ReferenceSpec};
use crate::error::{MappingError, MappingResult};

/// Names of every built-in entity, in declaration order
pub fn builtin_names() -> Vec<&'static str> {
    vec![
        "users",
        "roles",
        "platform_groups",
        "discount_codes",
        "purchases",
        "platform_accounts",
        "advanced_challenge_settings",
        "account_stats",
        "breach_account_activities",
        "equity_data_daily",
        "periodic_trading_export",
        "payout_requests",
        "platform_events",
    ]
}

/// All built-in mappings
pub fn builtin() -> Vec<EntityMapping> {
    vec![
        users(),
        roles(),
        platform_groups(),
        discount_codes(),
        purchases(),
        platform_accounts(),
        advanced_challenge_settings(),
        account_stats(),
        breach_account_activities(),
        equity_data_daily(),
        periodic_trading_export(),
        payout_requests(),
        platform_events(),
    ]
}

/// Look up a built-in mapping. Accepts `platform-accounts` as well as
/// `platform_accounts`.
pub fn find_builtin(name: &str) -> MappingResult<EntityMapping> {
    let normalized = name.trim().to_lowercase().replace('-', "_");
    builtin()
        .into_iter()
        .find(|m| m.name == normalized)
        .ok_or_else(|| MappingError::UnknownEntity(name.to_string()))
}

fn zero() -> Value {
    json!(0)
}

// =============================================================================
// Accounts & Access
// =============================================================================

fn users() -> EntityMapping {
    EntityMapping::new("users", "users")
        .describe("Platform users")
        .labelled_by("email")
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::uuid("ref_by_user_id"))
        .field(FieldSpec::integer("ref_link_count").with_default(zero()))
        .field(FieldSpec::text("email"))
        .field(FieldSpec::text("password"))
        .field(FieldSpec::text("first_name"))
        .field(FieldSpec::text("last_name"))
        .field(FieldSpec::text("phone"))
        .field(FieldSpec::integer("phone_verified").with_default(zero()))
        .field(FieldSpec::integer("sent_activation_mail_count").with_default(zero()))
        .field(FieldSpec::integer("status").with_default(zero()))
        .field(FieldSpec::text("reset_pass_hash"))
        .field(FieldSpec::text("address"))
        .field(FieldSpec::text("country"))
        .field(FieldSpec::text("state"))
        .field(FieldSpec::text("city"))
        .field(FieldSpec::text("zip"))
        .field(FieldSpec::text("timezone"))
        .field(FieldSpec::text("google_app_secret"))
        .field(FieldSpec::integer("2fa_sms_enabled").with_default(zero()))
        .field(FieldSpec::text("identity_status"))
        .field(FieldSpec::timestamp("identity_verified_at"))
        .field(FieldSpec::integer("affiliate_terms").with_default(zero()))
        .field(FieldSpec::integer("dashboard_popup").with_default(zero()))
        .field(FieldSpec::integer("discord_connected").with_default(zero()))
        .field(FieldSpec::integer("used_free_count").with_default(zero()))
        .field(FieldSpec::integer("available_count").with_default(zero()))
        .field(FieldSpec::integer("trail_verification_status").with_default(zero()))
        .field(FieldSpec::timestamp("last_login_at"))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::integer("is_google_app_verify").with_default(zero()))
        .field(FieldSpec::date("dob"))
        .field(FieldSpec::uuid("role_id"))
        .field(FieldSpec::integer("accept_affiliate_terms").with_default(zero()))
        .field(FieldSpec::timestamp("deleted_at"))
        .field(FieldSpec::text("ref_code"))
}

fn roles() -> EntityMapping {
    EntityMapping::new("roles", "roles")
        .describe("Access roles")
        .labelled_by("name")
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::text("name").required())
        .field(FieldSpec::text("description"))
        .field(FieldSpec::stamped("created_at"))
        .field(FieldSpec::stamped("updated_at"))
}

// =============================================================================
// Catalog & Sales
// =============================================================================

fn platform_groups() -> EntityMapping {
    EntityMapping::new("platform_groups", "platform_groups")
        .describe("Challenge products (trading server groups)")
        .labelled_by("name")
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::text("name").required())
        .field(FieldSpec::text("second_group_name"))
        .field(FieldSpec::text("third_group_name"))
        .field(FieldSpec::text("description"))
        .field(FieldSpec::text("platform_name").with_default(json!("mt5")))
        .field(FieldSpec::float("initial_balance").with_default(zero()))
        .field(FieldSpec::text("account_stage").with_default(json!("trial")))
        .field(FieldSpec::text("account_type").with_default(json!("standard")))
        .field(FieldSpec::float("profit_split").with_default(zero()))
        .field(FieldSpec::integer("max_drawdown").with_default(zero()))
        .field(FieldSpec::integer("max_daily_drawdown").with_default(zero()))
        .field(FieldSpec::integer("max_trading_days").with_default(zero()))
        .field(FieldSpec::integer("account_leverage").with_default(zero()))
        .field(FieldSpec::float("prices").with_default(zero()))
        .field(FieldSpec::boolean("status").with_default(json!(true)))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::text("group_type").with_default(json!("challenge")))
        .field(FieldSpec::text("profit_target"))
        .field(FieldSpec::text("funded_group_name"))
}

fn discount_codes() -> EntityMapping {
    EntityMapping::new("discount_codes", "discount_codes")
        .describe("Promotional discount codes")
        .labelled_by("code")
        .with_reference("users", ReferenceSpec::uuid("users"))
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::text("name"))
        .field(FieldSpec::text("code"))
        .field(FieldSpec::integer("max_usage_count").with_default(zero()))
        .field(FieldSpec::integer("current_usage_count").with_default(zero()))
        .field(FieldSpec::float("discount").with_default(zero()))
        .field(FieldSpec::timestamp("start_date"))
        .field(FieldSpec::timestamp("end_date"))
        .field(FieldSpec::json("challenge_amount"))
        .field(FieldSpec::json("challenge_step"))
        .field(FieldSpec::json("email"))
        .field(FieldSpec::reference("created_by", "users"))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::text("type").with_default(json!("admin")))
        .field(FieldSpec::float("commission_percentage").with_default(zero()))
        .field(FieldSpec::timestamp("deleted_at"))
        .field(FieldSpec::text("status").with_default(json!("active")))
}

fn purchases() -> EntityMapping {
    EntityMapping::new("purchases", "purchases")
        .describe("Challenge purchases")
        .labelled_by("user_uuid")
        .with_reference("users", ReferenceSpec::uuid("users"))
        .with_reference(
            "discount_codes",
            ReferenceSpec::natural("discount_codes", "code", "uuid"),
        )
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::reference("user_uuid", "users").required())
        .field(FieldSpec::float("amount_total").with_default(zero()))
        .field(FieldSpec::text("currency").with_default(json!("USD")))
        .field(FieldSpec::text("payment_method"))
        .field(FieldSpec::integer("payment_status").with_default(zero()))
        .field(FieldSpec::integer("is_paid_aff_commission"))
        .field(FieldSpec::json("user_data"))
        .field(FieldSpec::float("original_amount"))
        .field(FieldSpec::natural_key("discount_uuid", "discount_codes").from_source("discount_code"))
        .field(FieldSpec::boolean("already_paid"))
        .field(FieldSpec::text("payment_transaction_id"))
        .field(FieldSpec::text("payment_response"))
        .field(FieldSpec::integer("payment_attempt_count").with_default(zero()))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at").from_source("created_at"))
        .field(FieldSpec::constant("webhook_response", Value::Null))
        .field(FieldSpec::constant("purchase_type", json!("challenge")))
        .field(FieldSpec::constant("competition_uuid", Value::Null))
        .field(FieldSpec::constant("ip", Value::Null))
}

// =============================================================================
// Trading Accounts
// =============================================================================

fn platform_accounts() -> EntityMapping {
    EntityMapping::new("platform_accounts", "platform_accounts")
        .describe("Trading accounts provisioned per purchase")
        .labelled_by("platform_login_id")
        .with_reference("users", ReferenceSpec::uuid("users"))
        .with_reference("purchases", ReferenceSpec::uuid("purchases"))
        .with_reference("platform_groups", ReferenceSpec::uuid("platform_groups"))
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::reference("user_uuid", "users"))
        .field(FieldSpec::reference("purchase_uuid", "purchases"))
        .field(FieldSpec::text("platform_login_id").with_default(json!("")))
        .field(FieldSpec::text("platform_name").with_default(json!("mt5")))
        .field(FieldSpec::text("remote_group_name").with_default(json!("0")))
        .field(FieldSpec::reference("platform_group_uuid", "platform_groups").required())
        .field(FieldSpec::integer("current_phase").with_default(json!(1)))
        .field(FieldSpec::text("main_password").with_default(json!("password")))
        .field(FieldSpec::text("investor_password").with_default(json!("password")))
        .field(FieldSpec::float("initial_balance").with_default(zero()))
        .field(FieldSpec::integer("profit_target").with_default(zero()))
        .field(FieldSpec::float("profit_split").with_default(zero()))
        .field(FieldSpec::integer("max_drawdown").with_default(zero()))
        .field(FieldSpec::integer("max_daily_drawdown").with_default(zero()))
        .field(FieldSpec::text("account_stage"))
        .field(FieldSpec::text("account_type"))
        .field(FieldSpec::integer("account_leverage").with_default(zero()))
        .field(FieldSpec::integer("status").with_default(json!(1)))
        .field(FieldSpec::timestamp("funded_at"))
        .field(FieldSpec::integer("is_kyc").with_default(zero()))
        .field(FieldSpec::integer("is_trades_check").with_default(zero()))
        .field(FieldSpec::text("is_trade_agreement"))
        .field(FieldSpec::text("reason"))
        .field(FieldSpec::timestamp("deleted_at"))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::text("action_type"))
        .field(FieldSpec::integer("funded_status").with_default(zero()))
        .field(FieldSpec::text("platform_user_id"))
}

fn advanced_challenge_settings() -> EntityMapping {
    let mut mapping = EntityMapping::new("advanced_challenge_settings", "advanced_challenge_settings")
        .describe("Per-group or per-account challenge rule overrides")
        .labelled_by("uuid")
        .with_reference("platform_groups", ReferenceSpec::uuid("platform_groups"))
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("uuid"));

    for flag in [
        "100_profit_split",
        "2_percent_lower_target",
        "2_percent_more_daily_drawdown",
        "2_percent_more_max_drawdown",
        "allow_expert_advisors",
        "close_all_positions_on_friday",
        "double_leverage",
        "held_over_the_weekend",
        "no_sl_required",
        "requires_stop_loss",
        "requires_take_profit",
        "visible_on_leaderboard",
    ] {
        mapping = mapping.field(FieldSpec::boolean(flag));
    }

    mapping = mapping.field(FieldSpec::text("breach_type"));

    for (limit, unit) in [
        ("delete_account_after_failure", Some("delete_account_after_failure_unit")),
        ("inactivity_breach_trigger", Some("inactivity_breach_trigger_unit")),
        ("max_open_lots", None),
        ("max_risk_per_symbol", None),
        ("max_time_per_evaluation_phase", Some("max_time_per_evaluation_phase_unit")),
        ("max_time_per_funded_phase", Some("max_time_per_funded_phase_unit")),
        ("max_trading_days", None),
        ("min_time_per_phase", Some("min_time_per_phase_unit")),
        ("time_between_withdrawals", Some("time_between_withdrawals_unit")),
        ("withdraw_within", Some("withdraw_within_unit")),
        ("min_trading_days", None),
    ] {
        mapping = mapping.field(FieldSpec::integer(limit));
        if let Some(unit) = unit {
            mapping = mapping.field(FieldSpec::text(unit));
        }
    }

    mapping
        .field(FieldSpec::reference("platform_group_uuid", "platform_groups"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
        .field(FieldSpec::stamped("created_at"))
        .field(FieldSpec::stamped("updated_at"))
        .field(FieldSpec::integer("account_leverage").with_default(zero()))
        .field(FieldSpec::integer("profit_split").with_default(zero()))
        .field(FieldSpec::integer("max_drawdown").with_default(zero()))
        .field(FieldSpec::integer("max_daily_drawdown").with_default(zero()))
        .field(FieldSpec::integer("profit_target").with_default(zero()))
}

fn account_stats() -> EntityMapping {
    let mut mapping = EntityMapping::new("account_stats", "account_stats")
        .describe("Trading statistics snapshot per account")
        .labelled_by("uuid")
        .with_reference("platform_groups", ReferenceSpec::uuid("platform_groups"))
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::text("status"));

    for metric in [
        "current_equity",
        "yesterday_equity",
        "performance_percent",
        "current_overall_drawdown",
        "current_daily_drawdown",
        "average_win",
        "average_loss",
        "hit_ratio",
        "best_trade",
        "worst_trade",
    ] {
        mapping = mapping.field(FieldSpec::float(metric));
    }

    mapping = mapping
        .field(FieldSpec::integer("max_consecutive_wins"))
        .field(FieldSpec::integer("max_consecutive_losses"))
        .field(FieldSpec::integer("trades_without_stoploss"))
        .field(FieldSpec::text("most_traded_asset"));

    for metric in [
        "win_coefficient",
        "avg_win_loss_coefficient",
        "best_worst_coefficient",
        "maximum_daily_drawdown",
        "maximum_overall_drawdown",
    ] {
        mapping = mapping.field(FieldSpec::float(metric));
    }

    mapping
        .field(FieldSpec::float("consistency_score").with_default(zero()))
        .field(FieldSpec::float("lowest_watermark").with_default(zero()))
        .field(FieldSpec::float("highest_watermark").with_default(zero()))
        .field(FieldSpec::float("current_balance"))
        .field(FieldSpec::float("current_profit"))
        .field(FieldSpec::reference("platform_group_uuid", "platform_groups"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
        .field(FieldSpec::integer("trading_days_count").with_default(zero()))
        .field(FieldSpec::timestamp("first_trade_date"))
        .field(FieldSpec::integer("total_trade_count"))
}

// =============================================================================
// Account History
// =============================================================================

fn breach_account_activities() -> EntityMapping {
    EntityMapping::new("breach_account_activities", "breach_account_activities")
        .describe("Rule breach counters per account")
        .labelled_by("platform_account_uuid")
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("id"))
        .field(FieldSpec::integer("breach_count").with_default(zero()))
        .field(FieldSpec::timestamp("last_breach_date"))
        .field(FieldSpec::boolean("is_breached"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
}

fn equity_data_daily() -> EntityMapping {
    EntityMapping::new("equity_data_daily", "equity_data_daily")
        .describe("End-of-day equity snapshots")
        .labelled_by("day")
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("id"))
        .field(FieldSpec::date("day").required())
        .field(FieldSpec::timestamp("created_date"))
        .field(FieldSpec::float("equity").with_default(zero()))
        .field(FieldSpec::float("balance").with_default(zero()))
        .field(FieldSpec::float("equity_eod_mt5"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
}

fn periodic_trading_export() -> EntityMapping {
    EntityMapping::new("periodic_trading_export", "periodic_trading_export")
        .describe("Closed deals exported from the trading server")
        .labelled_by("deal_id")
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("id"))
        .field(FieldSpec::integer("deal_id").with_default(zero()))
        .field(FieldSpec::integer("position_id").with_default(zero()))
        .field(FieldSpec::text("deal_type").with_default(json!("")))
        .field(FieldSpec::float("profit").with_default(zero()))
        .field(FieldSpec::timestamp("deal_time"))
        .field(FieldSpec::text("deal_entry").with_default(json!("")))
        .field(FieldSpec::float("deal_price").with_default(zero()))
        .field(FieldSpec::text("deal_symbol").with_default(json!("")))
        .field(FieldSpec::float("deal_stoploss"))
        .field(FieldSpec::float("deal_volume"))
        .field(FieldSpec::float("deal_commission"))
        .field(FieldSpec::float("deal_swap"))
        .field(FieldSpec::boolean("dupe_detected"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
}

fn payout_requests() -> EntityMapping {
    EntityMapping::new("payout_requests", "payout_requests")
        .describe("Trader payout requests")
        .labelled_by("user_uuid")
        .with_reference("users", ReferenceSpec::uuid("users"))
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::reference("user_uuid", "users").required())
        .field(FieldSpec::text("type"))
        .field(FieldSpec::float("amount").with_default(zero()))
        .field(FieldSpec::text("method").with_default(json!("")))
        .field(FieldSpec::integer("status").with_default(zero()))
        .field(FieldSpec::json("data"))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
        .field(FieldSpec::text("payout_id"))
        .field(FieldSpec::text("note"))
        .field(FieldSpec::reference("note_created_by", "users"))
}

fn platform_events() -> EntityMapping {
    EntityMapping::new("platform_events", "platform_events")
        .describe("Account lifecycle events")
        .labelled_by("event")
        .with_reference("users", ReferenceSpec::uuid("users"))
        .with_reference("platform_accounts", ReferenceSpec::uuid("platform_accounts"))
        .field(FieldSpec::identifier("uuid"))
        .field(FieldSpec::reference("user_uuid", "users").required())
        .field(FieldSpec::text("event").with_default(json!("")))
        .field(FieldSpec::timestamp("created_at"))
        .field(FieldSpec::timestamp("updated_at"))
        .field(FieldSpec::text("reason"))
        .field(FieldSpec::reference("platform_account_uuid", "platform_accounts"))
}
