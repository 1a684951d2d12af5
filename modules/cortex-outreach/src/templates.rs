//! The built-in template catalog. Templates are matched on
//! (signal type, channel); a template with no signal type is the channel's
//! generic fallback. Bodies are stored as paragraphs so A/B variants can
//! permute interior ordering.

use cortex_common::{OutreachChannel, Playbook};

#[derive(Debug, Clone)]
pub struct OutreachTemplate {
    pub id: String,
    /// None marks the channel's generic fallback.
    pub signal_type: Option<String>,
    pub channel: OutreachChannel,
    /// Which playbook this template advances, for conversion roll-ups.
    pub playbook: Option<Playbook>,
    pub subject: Option<String>,
    pub paragraphs: Vec<String>,
}

fn template(
    id: &str,
    signal_type: Option<&str>,
    channel: OutreachChannel,
    playbook: Option<Playbook>,
    subject: Option<&str>,
    paragraphs: &[&str],
) -> OutreachTemplate {
    OutreachTemplate {
        id: id.to_string(),
        signal_type: signal_type.map(str::to_string),
        channel,
        playbook,
        subject: subject.map(str::to_string),
        paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn builtin_templates() -> Vec<OutreachTemplate> {
    vec![
        template(
            "foreclosure-email-direct",
            Some("foreclosure"),
            OutreachChannel::Email,
            Some(Playbook::Rescue),
            Some("Re: {{entityName}} — options before {{deadline}}"),
            &[
                "I'm reaching out about {{entityName}}. The auction is {{deadline}} ({{daysRemaining}} days), which still leaves room to act.",
                "We buy properties like this for cash and can close well inside that window. Based on public records the property is worth around {{value}}, and we'd make a fair offer against that number.",
                "The main pressure point right now is {{painPoint}}. Our approach: {{solution}}.",
                "If you'd like to talk through options — including ones that don't involve us — I'm happy to walk you through what we've seen work.",
            ],
        ),
        template(
            "foreclosure-email-advisor",
            Some("foreclosure"),
            OutreachChannel::Email,
            Some(Playbook::Rescue),
            Some("{{entityName}}: {{daysRemaining}} days to the auction"),
            &[
                "Public filings show {{entityName}} has a sale date {{deadline}}, with roughly {{value}} at stake.",
                "We work with owners in exactly this position. {{solution}} — typically wrapped up in under two weeks.",
                "Worth a ten-minute call this week?",
            ],
        ),
        template(
            "foreclosure-sms-short",
            Some("foreclosure"),
            OutreachChannel::Sms,
            Some(Playbook::Rescue),
            None,
            &["Hi — about {{entityName}}: the auction is {{deadline}}. We can make a cash offer before then. Reply YES for details or STOP to opt out."],
        ),
        template(
            "pdufa-email-strategic",
            Some("pdufa_date"),
            OutreachChannel::Email,
            Some(Playbook::Buy),
            Some("{{entityName}} ahead of the {{deadline}} decision"),
            &[
                "With the PDUFA date {{deadline}}, {{entityName}} is approaching a defining moment.",
                "We've helped companies in {{industry}} prepare for both outcomes. {{solution}}.",
                "Could we get thirty minutes on the calendar before the decision window?",
            ],
        ),
        template(
            "exodus-email-partner",
            Some("talent_exodus"),
            OutreachChannel::Email,
            Some(Playbook::Partner),
            Some("Supporting {{entityName}} through the transition"),
            &[
                "Several senior departures at {{entityName}} in the last quarter suggest the team is stretched.",
                "The immediate risk is {{painPoint}}. {{solution}} — we can have a pilot running in weeks, not quarters.",
                "Open to a conversation?",
            ],
        ),
        template(
            "departure-linkedin-intro",
            Some("c_suite_departure"),
            OutreachChannel::Linkedin,
            Some(Playbook::Partner),
            None,
            &[
                "Saw the news about the leadership change at {{entityName}}. Transitions like this are exactly where we help — {{solution}}. Happy to share how similar teams handled it.",
            ],
        ),
        // Generic fallbacks, one per channel.
        template(
            "generic-email",
            None,
            OutreachChannel::Email,
            None,
            Some("Regarding {{entityName}}"),
            &[
                "I've been following developments around {{entityName}} — specifically {{painPoint}}.",
                "{{solution}}. If the timing is right ({{deadline}}), I'd welcome a short call.",
            ],
        ),
        template(
            "generic-sms",
            None,
            OutreachChannel::Sms,
            None,
            None,
            &["Hi — quick note about {{entityName}}: {{painPoint}}. We can help; reply for details or STOP to opt out."],
        ),
        template(
            "generic-phone",
            None,
            OutreachChannel::Phone,
            None,
            None,
            &[
                "Call script: open with {{entityName}} and the {{deadline}} timeline. Lead with {{painPoint}}, then position {{solution}}. Close by asking for a follow-up meeting.",
            ],
        ),
        template(
            "generic-linkedin",
            None,
            OutreachChannel::Linkedin,
            None,
            None,
            &["Following {{entityName}} — {{painPoint}} caught my attention. {{solution}}. Worth connecting?"],
        ),
    ]
}
