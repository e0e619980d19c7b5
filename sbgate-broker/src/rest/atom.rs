//! Atom XML bodies for the management surface

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;

use crate::error::BrokerError;
use crate::types::{QueueOptions, RuleOptions, TopicOptions};

pub const ENTRY_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

const NS_ATOM: &str = "http://www.w3.org/2005/Atom";
const NS_SB: &str = "http://schemas.microsoft.com/netservices/2010/10/servicebus/connect";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub const QUEUE_DESCRIPTION: &str = "QueueDescription";
pub const TOPIC_DESCRIPTION: &str = "TopicDescription";
pub const SUBSCRIPTION_DESCRIPTION: &str = "SubscriptionDescription";

fn entry(description: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<entry xmlns="{}">
  <content type="application/xml">
{}
  </content>
</entry>"#,
        NS_ATOM, description
    )
}

/// ISO 8601 duration in whole seconds, e.g. `PT60S`
pub fn iso_duration(duration: Duration) -> String {
    let millis = duration.subsec_millis();
    if millis == 0 {
        format!("PT{}S", duration.as_secs())
    } else {
        format!("PT{}.{:03}S", duration.as_secs(), millis)
    }
}

pub fn queue_entry(options: &QueueOptions) -> String {
    entry(&format!(
        r#"    <QueueDescription xmlns="{}" xmlns:i="{}">
      <LockDuration>{}</LockDuration>
      <MaxSizeInMegabytes>{}</MaxSizeInMegabytes>
      <MaxDeliveryCount>{}</MaxDeliveryCount>
    </QueueDescription>"#,
        NS_SB,
        NS_XSI,
        iso_duration(options.lock_duration),
        options.max_size_mb,
        options.max_delivery_count
    ))
}

pub fn topic_entry(options: &TopicOptions) -> String {
    entry(&format!(
        r#"    <TopicDescription xmlns="{}" xmlns:i="{}">
      <MaxSizeInMegabytes>{}</MaxSizeInMegabytes>
    </TopicDescription>"#,
        NS_SB, NS_XSI, options.max_size_mb
    ))
}

pub fn subscription_entry() -> String {
    entry(&format!(
        r#"    <SubscriptionDescription xmlns="{}" xmlns:i="{}" />"#,
        NS_SB, NS_XSI
    ))
}

pub fn rule_entry(rule: &RuleOptions) -> String {
    entry(&format!(
        r#"    <RuleDescription xmlns="{}" xmlns:i="{}">
      <Filter i:type="SqlFilter">
        <SqlExpression>{}</SqlExpression>
      </Filter>
      <Action i:type="EmptyRuleAction" />
      <Name>{}</Name>
    </RuleDescription>"#,
        NS_SB,
        NS_XSI,
        escape(rule.filter.as_str()),
        escape(rule.name.as_str())
    ))
}

fn malformed(e: impl std::fmt::Display) -> BrokerError {
    BrokerError::Unexpected {
        status: 200,
        message: format!("Malformed Atom response: {}", e),
    }
}

/// Whether the document is an `<entry>` whose content is a `description`
/// element, e.g. `QueueDescription`
///
/// A GET on a missing entity can answer 200 with an empty `<feed>`, and a
/// name shared by a queue and a topic resolves to whichever exists.
pub fn describes(body: &str, description: &str) -> Result<bool, BrokerError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut root_seen = false;
    let mut in_content = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) | Event::Empty(e) if !root_seen => {
                if e.local_name().as_ref() != b"entry" {
                    return Ok(false);
                }
                root_seen = true;
            }
            Event::Start(e) if e.local_name().as_ref() == b"content" => in_content = true,
            Event::End(e) if e.local_name().as_ref() == b"content" => in_content = false,
            Event::Start(e) | Event::Empty(e) if in_content => {
                return Ok(e.local_name().as_ref() == description.as_bytes());
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
    }
}

/// Titles of every `<entry>` in a feed, which are the entity names
pub fn entry_titles(body: &str) -> Result<Vec<String>, BrokerError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut titles = Vec::new();
    let mut in_entry = false;
    let mut in_title = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"entry" => in_entry = true,
                b"title" if in_entry => in_title = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => in_entry = false,
                b"title" => in_title = false,
                _ => {}
            },
            Event::Text(text) if in_title => {
                titles.push(text.unescape().map_err(malformed)?.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(titles)
}
