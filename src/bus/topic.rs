//! Topic strings of the form `scbe.crawl.{channel}.{event}`, with single-
//! segment `*` wildcards (and a lone `*` matching every topic).

/// The fixed set of bus channels (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Discovery,
    Status,
    Findings,
    Governance,
    Sentinel,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Channel::Discovery => "discovery",
            Channel::Status => "status",
            Channel::Findings => "findings",
            Channel::Governance => "governance",
            Channel::Sentinel => "sentinel",
        }
    }
}

/// Build a topic string for `channel`/`event`.
pub fn build_topic(channel: Channel, event: &str) -> String {
    format!("scbe.crawl.{}.{}", channel.as_str(), event)
}

/// Parse a topic string into its channel and event segments. Returns `None`
/// if the topic isn't of the expected four-segment `scbe.crawl.*.*` shape.
pub fn parse_topic(topic: &str) -> Option<(String, String)> {
    let mut parts = topic.split('.');
    let scbe = parts.next()?;
    let crawl = parts.next()?;
    let channel = parts.next()?;
    let event = parts.next()?;
    if scbe != "scbe" || crawl != "crawl" || parts.next().is_some() {
        return None;
    }
    Some((channel.to_string(), event.to_string()))
}

/// Whether `topic` matches `pattern`. A lone `*` matches everything; any
/// other `*` segment in the pattern matches exactly one corresponding
/// segment in the topic.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let topic_segments: Vec<&str> = topic.split('.').collect();
    if pattern_segments.len() != topic_segments.len() {
        return false;
    }
    pattern_segments.iter().zip(topic_segments.iter()).all(|(p, t)| *p == "*" || p == t)
}
