//! Structured report and alert messages.

use chrono::{DateTime, Utc};
use notewatch_core::derive::{DONE_LABEL, FULL_LABEL, NOW_LABEL};
use notewatch_core::{
    format_remaining, Block, CanonicalSnapshot, DerivedState, Eta, Field, StructuredMessage,
};

use crate::alert::{AlertEvent, AlertLevel};

pub const REPORT_TITLE: &str = "Genshin Daily Notes";

fn utc_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn server_stamp(at: DateTime<Utc>, snapshot: &CanonicalSnapshot) -> String {
    at.with_timezone(&snapshot.server_offset())
        .format("%Y-%m-%d %H:%M (UTC%:z)")
        .to_string()
}

fn eta_detail(eta: &Eta, goal: &str) -> String {
    match eta.label() {
        label if label == FULL_LABEL => label,
        label => format!("{label} to {goal}"),
    }
}

pub fn format_report(snapshot: &CanonicalSnapshot, derived: &DerivedState) -> StructuredMessage {
    let mut fields = vec![Field::new(
        "🔋 Resin",
        format!("{}/{}", snapshot.resin.current, snapshot.resin.max),
    )
    .with_detail(eta_detail(&derived.resin_eta, "full"))];

    if let Some(progress) = &derived.expeditions {
        let detail = if progress.dispatched == 0 {
            "none dispatched".to_string()
        } else {
            match format_remaining(progress.all_back_in, DONE_LABEL).as_str() {
                DONE_LABEL => "all back".to_string(),
                remaining => format!("all back in {remaining}"),
            }
        };
        fields.push(
            Field::new(
                "🗺 Expeditions",
                format!("{}/{} finished", progress.finished, progress.dispatched),
            )
            .with_detail(detail),
        );
    }

    if let (Some(realm), Some(eta)) = (&snapshot.realm_currency, &derived.realm_currency_eta) {
        fields.push(
            Field::new("🫖 Realm Currency", format!("{}/{}", realm.current, realm.max))
                .with_detail(eta_detail(eta, "cap")),
        );
    }

    if let Some(bosses) = &snapshot.weekly_bosses {
        fields.push(Field::new(
            "⚔️ Weekly Boss Discounts",
            format!("{}/{} left", bosses.remaining, bosses.max),
        ));
    }

    if let Some(commissions) = &snapshot.commissions {
        fields.push(Field::new(
            "📝 Commissions",
            format!("{}/{}", commissions.finished, commissions.total),
        ));
        fields.push(Field::new(
            "🎁 Commission Reward",
            if commissions.reward_claimed {
                "✅ claimed"
            } else {
                "❌ not claimed"
            },
        ));
    }

    fields.push(
        Field::new("📅 Weekly Reset", server_stamp(snapshot.weekly_reset_at, snapshot))
            .with_detail(format!("in {}", format_remaining(derived.weekly_reset_in, NOW_LABEL))),
    );
    fields.push(
        Field::new("🌙 Abyss Reset", server_stamp(snapshot.abyss_reset_at, snapshot))
            .with_detail(format!("in {}", format_remaining(derived.abyss_reset_in, NOW_LABEL))),
    );

    StructuredMessage::new(REPORT_TITLE)
        .block(Block::Header {
            text: REPORT_TITLE.to_string(),
        })
        .block(Block::Context {
            items: vec![
                Field::new("Time", utc_stamp(snapshot.fetched_at)),
                Field::new("Server", snapshot.account.region.label()),
                Field::new("UID", snapshot.account.uid.to_string()),
            ],
        })
        .block(Block::Divider)
        .block(Block::Section { text: None, fields })
}

pub fn format_alert(event: &AlertEvent, derived: &DerivedState) -> StructuredMessage {
    let headline = match event.level {
        AlertLevel::Value(threshold) => format!(
            "🔔 Resin alert: reached {threshold} resin (current {}/{})",
            event.value, event.max
        ),
        AlertLevel::Full => format!("🔔 Resin alert: resin is full ({}/{})", event.value, event.max),
    };

    StructuredMessage::new(headline.clone()).block(Block::Section {
        text: Some(headline),
        fields: vec![
            Field::new("🔋 Resin", format!("{}/{}", event.value, event.max))
                .with_detail(eta_detail(&derived.resin_eta, "full")),
            Field::new("Observed", utc_stamp(event.at)),
        ],
    })
}

/// Sent once when status checks have failed `failures` cycles in a row.
pub fn format_failure_notice(failures: u32, since: DateTime<Utc>, last_error: &str) -> StructuredMessage {
    let headline = format!("⚠️ Status checks failing ({failures} cycles in a row)");
    StructuredMessage::new(headline.clone()).block(Block::Section {
        text: Some(headline),
        fields: vec![
            Field::new("Since", utc_stamp(since)),
            Field::new("Last error", last_error),
        ],
    })
}

/// Sent once when a cycle succeeds after a failure notice went out.
pub fn format_recovery_notice(failures: u32, since: DateTime<Utc>, now: DateTime<Utc>) -> StructuredMessage {
    let outage = (now - since).to_std().unwrap_or_default();
    let headline = format!("✅ Status checks recovered after {failures} failed cycles");
    StructuredMessage::new(headline.clone()).block(Block::Section {
        text: Some(headline),
        fields: vec![
            Field::new("Since", utc_stamp(since)),
            Field::new("Outage", format_remaining(outage, "under a minute")),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use notewatch_core::{
        derive, AccountRef, Commissions, Counter, Expedition, Expeditions, Region, Resource,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap()
    }

    fn snapshot() -> CanonicalSnapshot {
        CanonicalSnapshot {
            account: AccountRef {
                uid: 612_345_678,
                region: Region::America,
            },
            fetched_at: now(),
            server_offset_secs: -5 * 3600,
            resin: Resource {
                current: 100,
                max: 200,
                full_at: now() + Duration::hours(32) + Duration::minutes(4),
            },
            realm_currency: Some(Resource {
                current: 1800,
                max: 2400,
                full_at: now() + Duration::hours(6),
            }),
            expeditions: Some(Expeditions {
                max: 5,
                slots: vec![
                    Expedition {
                        character: Some("Bennett".into()),
                        finished: true,
                        completes_at: now(),
                    },
                    Expedition {
                        character: Some("Fischl".into()),
                        finished: false,
                        completes_at: now() + Duration::hours(12),
                    },
                ],
            }),
            weekly_bosses: Some(Counter { remaining: 2, max: 3 }),
            commissions: Some(Commissions {
                finished: 3,
                total: 4,
                reward_claimed: false,
            }),
            weekly_reset_at: Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap(),
            abyss_reset_at: Utc.with_ymd_and_hms(2024, 5, 16, 9, 0, 0).unwrap(),
        }
    }

    fn section_fields(message: &StructuredMessage) -> &[Field] {
        message
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::Section { fields, .. } => Some(fields.as_slice()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn report_renders_every_present_field() {
        let snap = snapshot();
        let message = format_report(&snap, &derive(&snap, now()));

        assert_eq!(message.fallback, REPORT_TITLE);
        assert!(matches!(message.blocks[0], Block::Header { .. }));
        match &message.blocks[1] {
            Block::Context { items } => {
                assert_eq!(items[0].value, "2024-05-01 17:00 UTC");
                assert_eq!(items[1].value, "America");
                assert_eq!(items[2].value, "612345678");
            }
            other => panic!("expected context, got {other:?}"),
        }

        let fields = section_fields(&message);
        let labels: Vec<_> = fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "🔋 Resin",
                "🗺 Expeditions",
                "🫖 Realm Currency",
                "⚔️ Weekly Boss Discounts",
                "📝 Commissions",
                "🎁 Commission Reward",
                "📅 Weekly Reset",
                "🌙 Abyss Reset",
            ]
        );
        assert_eq!(fields[0].value, "100/200");
        assert_eq!(fields[0].detail.as_deref(), Some("32h 4m to full"));
        assert_eq!(fields[1].value, "1/2 finished");
        assert_eq!(fields[1].detail.as_deref(), Some("all back in 12h 0m"));
        assert_eq!(fields[2].detail.as_deref(), Some("6h 0m to cap"));
        assert_eq!(fields[7].value, "2024-05-16 04:00 (UTC-05:00)");
        assert_eq!(fields[7].detail.as_deref(), Some("in 352h 0m"));
    }

    #[test]
    fn missing_optional_sections_are_omitted() {
        let mut snap = snapshot();
        snap.realm_currency = None;
        snap.expeditions = None;
        snap.weekly_bosses = None;
        snap.commissions = None;
        let message = format_report(&snap, &derive(&snap, now()));

        let labels: Vec<_> = section_fields(&message)
            .iter()
            .map(|f| f.label.as_str())
            .collect();
        assert_eq!(labels, vec!["🔋 Resin", "📅 Weekly Reset", "🌙 Abyss Reset"]);
    }

    #[test]
    fn formatting_is_idempotent() {
        let snap = snapshot();
        let derived = derive(&snap, now());
        let first = serde_json::to_vec(&format_report(&snap, &derived)).unwrap();
        let second = serde_json::to_vec(&format_report(&snap, &derived)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn full_resin_reads_full() {
        let mut snap = snapshot();
        snap.resin.current = 200;
        let message = format_report(&snap, &derive(&snap, now()));
        assert_eq!(section_fields(&message)[0].detail.as_deref(), Some("full"));
    }

    #[test]
    fn alert_message_names_the_level() {
        let snap = snapshot();
        let derived = derive(&snap, now());
        let event = AlertEvent {
            level: AlertLevel::Value(120),
            value: 121,
            max: 200,
            at: now(),
        };
        let message = format_alert(&event, &derived);
        assert_eq!(
            message.fallback,
            "🔔 Resin alert: reached 120 resin (current 121/200)"
        );

        let full = AlertEvent {
            level: AlertLevel::Full,
            value: 200,
            max: 200,
            at: now(),
        };
        assert!(format_alert(&full, &derived).fallback.contains("resin is full"));
    }

    #[test]
    fn outage_notices_carry_counts() {
        let since = now() - Duration::minutes(185);
        let failing = format_failure_notice(3, since, "timed out");
        assert!(failing.fallback.contains("3 cycles"));

        let recovered = format_recovery_notice(4, since, now());
        assert!(recovered.fallback.contains("4 failed cycles"));
        assert_eq!(section_fields(&recovered)[1].value, "3h 5m");
    }
}
