//! Chat copy. Every function returns a ready-to-send message.

use crate::models::advisory::Advisory;
use crate::models::notifications::{Button, OutboundMessage};
use crate::models::users::{User, UserStatus};
use crate::services::sweep::SweepReport;

pub const PREDICT_NOW: &str = "predict_now";
pub const SET_ASSET: &str = "set_asset";
pub const SELECT_ASSET_PREFIX: &str = "select_asset_";
pub const SHOW_PROFIT: &str = "show_profit";
pub const BUY_ACCESS: &str = "buy_access";
pub const PROMPT_VOUCHER: &str = "prompt_voucher";
pub const START_MENU: &str = "start_menu";
pub const ADMIN_PANEL: &str = "admin_panel";
pub const ADMIN_GEN_VOUCHER_PREFIX: &str = "admin_gen_voucher_";
pub const ADMIN_REVOKE_PROMPT: &str = "admin_revoke_prompt";
pub const ADMIN_FORCE_UPDATES: &str = "admin_force_updates";

fn back_button() -> Vec<Button> {
    vec![Button::callback("⬅️ Back to Main Menu", START_MENU)]
}

pub fn main_menu(is_admin: bool) -> Vec<Vec<Button>> {
    let mut rows = vec![
        vec![Button::callback("📈 Get Instant Prediction", PREDICT_NOW)],
        vec![Button::callback("⚙️ Set Trading Asset", SET_ASSET)],
        vec![Button::callback("📊 My Performance & Profit", SHOW_PROFIT)],
        vec![Button::callback("💳 Buy Access / Use Voucher", BUY_ACCESS)],
    ];
    if is_admin {
        rows.push(vec![Button::callback("🛠️ Admin Panel", ADMIN_PANEL)]);
    }
    rows
}

pub fn welcome(first_name: &str, status: &UserStatus) -> OutboundMessage {
    let mut text = format!(
        "🌟 Welcome, *{}*, to the Quantum Trader Bot! 🚀\n\n\
         I am your highly advanced quantitative analysis engine, dedicated to finding \
         the most profitable Buy/Sell signals based on real-time market data.",
        first_name
    );

    if status.is_admin {
        text.push_str("\n\n*👑 ADMIN MODE ACTIVATED 👑* You have unlimited access.");
    } else if status.user.is_subscribed {
        text.push_str(&format!(
            "\n\n✅ *Subscription Active!* Your access expires on: `{}`.\n\
             I will send you a powerful prediction every 30 minutes for your chosen asset.",
            status.user.subscription_expires.as_deref().unwrap_or("N/A")
        ));
    } else {
        text.push_str(
            "\n\n❌ *Access Required.* Please choose an option below to start trading signals!",
        );
    }

    OutboundMessage::text(text).with_buttons(main_menu(status.is_admin))
}

pub fn welcome_back(first_name: &str, status: &UserStatus) -> OutboundMessage {
    let mut text = format!("🌟 Welcome back, *{}*!", first_name);

    if status.is_admin {
        text.push_str("\n\n*👑 ADMIN MODE*");
    } else if status.user.is_subscribed {
        text.push_str(&format!(
            "\n\n✅ *Active.* Expires: `{}`. Asset: *{}*",
            status.user.subscription_expires.as_deref().unwrap_or("N/A"),
            status.user.subject().unwrap_or("Not Set")
        ));
    } else {
        text.push_str("\n\n❌ *Access Required.*");
    }

    OutboundMessage::text(text).with_buttons(main_menu(status.is_admin))
}

pub fn access_menu(contact_url: Option<&str>) -> OutboundMessage {
    let mut rows = vec![vec![Button::callback("🔑 Use Voucher Code", PROMPT_VOUCHER)]];
    if let Some(url) = contact_url {
        rows.push(vec![Button::url("💰 Contact to Buy Access", url)]);
    }
    rows.push(back_button());

    OutboundMessage::text(
        "*💳 Access & Vouchers*\n\n\
         To activate your 30-minute signals, you need an active subscription.\n\n\
         1. *Buy Access:* Contact the administrator to purchase a subscription.\n\
         2. *Use Voucher:* If you have a code, enter it to activate your trial or purchased time.",
    )
    .with_buttons(rows)
}

pub fn voucher_prompt() -> OutboundMessage {
    OutboundMessage::text(
        "Please reply to this message with your voucher code.\n\n\
         You can also send `/redeem CODE` at any time. To cancel, type /cancel.",
    )
}

pub fn voucher_redeemed(days: u32, expires: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "🎉 *Voucher Success!* 🎉\n\n\
         You have been granted *{} days* of premium access.\n\
         Your subscription now expires on: `{}`.\n\n\
         To begin receiving signals, use the *Set Trading Asset* button.",
        days, expires
    ))
}

pub fn voucher_rejected() -> OutboundMessage {
    OutboundMessage::text(
        "❌ *Invalid or Used Voucher.* Please check your code and try again, or contact the admin.",
    )
}

pub fn subject_menu(subjects: &[String]) -> OutboundMessage {
    let options = subjects
        .iter()
        .map(|subject| Button::callback(subject.clone(), format!("{SELECT_ASSET_PREFIX}{subject}")))
        .collect();

    OutboundMessage::text(
        "*⚙️ Select Your Trading Asset*\n\n\
         Please choose the asset you want the Quantum Trader Bot to track, or send \
         `/asset SYMBOL` for any other symbol. You will receive a prediction for this asset \
         every 30 minutes (if subscribed).",
    )
    .with_buttons(vec![options, back_button()])
}

pub fn subject_set(subject: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "✅ *Asset Set!* You are now tracking: *{}*.\n\n\
         If your subscription is active, your periodic signals will start soon (or are already \
         running). You can check your status in the main menu.",
        subject
    ))
}

pub fn invalid_subject() -> OutboundMessage {
    OutboundMessage::text(
        "❌ That does not look like a valid symbol. Use 1-16 letters, digits, `.`, `-` or `/`.",
    )
}

pub fn subject_required() -> OutboundMessage {
    OutboundMessage::text(
        "❌ *Error:* You must first select a trading asset using the 'Set Trading Asset' button.",
    )
}

pub fn analyzing(subject: &str) -> OutboundMessage {
    OutboundMessage::text(format!("⏳ Analyzing *{}* data...", subject))
}

fn signal_report(advisory: &Advisory) -> String {
    format!(
        "--- *MASTER QUANT ANALYST PREDICTION* ---\n\
         *Signal:* {}\n\n\
         *Justification:*\n\
         _{}_\n\n\
         --- *NEXT UPDATE IN 30 MINUTES* ---",
        advisory.signal.icon(),
        advisory.justification
    )
}

pub fn instant_advisory(subject: &str, advisory: &Advisory) -> OutboundMessage {
    OutboundMessage::text(format!(
        "*📊 Quantum Signal Report for {}*\n\n{}",
        subject,
        signal_report(advisory)
    ))
    .with_buttons(vec![back_button()])
}

pub fn periodic_advisory(subject: &str, advisory: &Advisory) -> OutboundMessage {
    OutboundMessage::text(format!(
        "*🔔 30-Minute Quantum Signal 🔔*\n\n*Asset:* *{}*\n{}",
        subject,
        signal_report(advisory)
    ))
}

pub fn subscription_expired() -> OutboundMessage {
    OutboundMessage::text(
        "❌ *Subscription Expired!*\n\n\
         Your access to the 30-minute signals has ended. Please renew your subscription via the \
         main menu.",
    )
}

pub fn subject_missing_notice() -> OutboundMessage {
    OutboundMessage::text(
        "⚠️ *Warning:* Your periodic update was skipped because you have not selected a trading \
         asset. Please use the 'Set Trading Asset' button in the main menu.",
    )
}

pub fn advisory_delayed() -> OutboundMessage {
    OutboundMessage::text(
        "❌ *Prediction Engine Error:* Could not generate a signal at this time. Your next \
         update will arrive on schedule.",
    )
}

pub fn portfolio(user: &User) -> OutboundMessage {
    let profit = user.current_profit;
    let marker = if profit >= 0.0 { "🟢" } else { "🔴" };

    OutboundMessage::text(format!(
        "*📊 Your Performance Report (User ID: {})*\n\n\
         *Current Trading Asset:* *{}*\n\n\
         *Initial Balance:* `$ {:.2}`\n\
         *Current Profit/Loss:* {} `$ {:.2}`\n\
         *Total Balance:* `$ {:.2}`",
        user.user_id,
        user.subject().unwrap_or("Not Set"),
        user.initial_balance,
        marker,
        profit,
        user.total_balance()
    ))
    .with_buttons(vec![back_button()])
}

pub fn admin_panel(voucher_days: &[u32]) -> OutboundMessage {
    let mut rows: Vec<Vec<Button>> = voucher_days
        .iter()
        .map(|days| {
            vec![Button::callback(
                format!("➕ Generate {} Day Voucher", days),
                format!("{ADMIN_GEN_VOUCHER_PREFIX}{days}"),
            )]
        })
        .collect();
    rows.push(vec![Button::callback(
        "Revoke Voucher (Manual)",
        ADMIN_REVOKE_PROMPT,
    )]);
    rows.push(vec![Button::callback(
        "Force All Updates",
        ADMIN_FORCE_UPDATES,
    )]);
    rows.push(back_button());

    OutboundMessage::text(
        "*👑 Admin Control Panel 👑*\n\nManage subscriptions and bot operations.\n\
         Commands: `/voucher DAYS`, `/revoke CODE`, `/force`.",
    )
    .with_buttons(rows)
}

pub fn voucher_minted(days: u32, code: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "✅ *New {}-Day Voucher Created!*\n\n\
         Code: `{}`\n\n\
         Share this code with the user. They can use it in the 'Buy Access / Use Voucher' menu.",
        days, code
    ))
}

pub fn revoke_prompt() -> OutboundMessage {
    OutboundMessage::text(
        "Please reply to this message with the voucher code you wish to revoke.\n\n\
         Revoking marks it as used, preventing any future use.\nTo cancel, type /cancel.",
    )
}

pub fn voucher_revoked(code: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "✅ *Voucher Revoked!*\nCode `{}` has been marked as used and can no longer be activated.",
        code
    ))
}

pub fn sweep_forced(report: &SweepReport) -> OutboundMessage {
    OutboundMessage::text(format!(
        "✅ *Update Cycle Forced.*\n\n\
         Advisories sent: {}\nDegraded notices: {}\nUnconfigured: {}\nExpired: {}\n\
         Store failures: {}",
        report.advised(),
        report.degraded(),
        report.unconfigured(),
        report.expired(),
        report.failed()
    ))
}

pub fn unauthorized() -> OutboundMessage {
    OutboundMessage::text("Unauthorized access.")
}

pub fn input_cancelled() -> OutboundMessage {
    OutboundMessage::text("Cancelled. Send /start to open the main menu.")
}

pub fn unknown_input() -> OutboundMessage {
    OutboundMessage::text("I did not understand that. Send /start to open the main menu.")
}

pub fn failure() -> OutboundMessage {
    OutboundMessage::text("❌ Something went wrong on our side. Please try again shortly.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::advisory::Signal;
    use crate::models::notifications::ButtonAction;

    fn status(is_admin: bool, subscribed: bool) -> UserStatus {
        let mut user = User::new(5, Some("ada".to_string()));
        user.is_subscribed = subscribed;
        user.subscription_expires = Some("2030-01-01 00:00:00".to_string());
        UserStatus { user, is_admin }
    }

    #[test]
    fn admin_menu_has_admin_panel() {
        assert_eq!(main_menu(false).len(), 4);
        let admin = main_menu(true);
        assert_eq!(admin.len(), 5);
        assert_eq!(
            admin[4][0].action,
            ButtonAction::Callback(ADMIN_PANEL.to_string())
        );
    }

    #[test]
    fn welcome_reflects_status() {
        assert!(welcome("Ada", &status(true, false)).text.contains("ADMIN MODE"));
        assert!(welcome("Ada", &status(false, true))
            .text
            .contains("`2030-01-01 00:00:00`"));
        assert!(welcome("Ada", &status(false, false))
            .text
            .contains("Access Required"));
    }

    #[test]
    fn subject_menu_encodes_symbols_in_callbacks() {
        let menu = subject_menu(&["TSLA".to_string(), "EUR/USD".to_string()]);
        let buttons = menu.buttons.unwrap();
        assert_eq!(
            buttons[0][1].action,
            ButtonAction::Callback("select_asset_EUR/USD".to_string())
        );
    }

    #[test]
    fn advisory_shows_signal_and_justification() {
        let advisory = Advisory {
            signal: Signal::Sell,
            justification: "Overbought.".to_string(),
        };
        let message = periodic_advisory("TSLA", &advisory);
        assert!(message.text.contains("🔴 SELL"));
        assert!(message.text.contains("_Overbought._"));
        assert!(message.text.contains("*Asset:* *TSLA*"));
    }

    #[test]
    fn portfolio_totals_balance() {
        let mut user = User::new(5, None);
        user.current_profit = -12.5;
        let message = portfolio(&user);
        assert!(message.text.contains("🔴 `$ -12.50`"));
        assert!(message.text.contains("*Total Balance:* `$ 987.50`"));
    }

    #[test]
    fn admin_panel_lists_configured_durations() {
        let panel = admin_panel(&[7, 30, 90]);
        let rows = panel.buttons.unwrap();
        assert_eq!(
            rows[2][0].action,
            ButtonAction::Callback("admin_gen_voucher_90".to_string())
        );
    }

    #[test]
    fn forced_sweep_summary_counts_every_outcome() {
        use crate::services::sweep::Outcome;

        let report = SweepReport {
            outcomes: vec![
                (10, Outcome::Advised(Signal::Hold)),
                (11, Outcome::Degraded),
                (12, Outcome::Failed),
                (13, Outcome::Failed),
                (14, Outcome::Expired),
                (15, Outcome::Skipped),
            ],
        };

        let text = sweep_forced(&report).text;
        assert!(text.contains("Advisories sent: 1"));
        assert!(text.contains("Degraded notices: 1"));
        assert!(text.contains("Unconfigured: 0"));
        assert!(text.contains("Expired: 1"));
        assert!(text.contains("Store failures: 2"));
    }
}
