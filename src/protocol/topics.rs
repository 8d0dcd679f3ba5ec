//! Topic name and topic filter rules
//!
//! Validation for the strings the application hands to `publish` and
//! `subscribe`, and the wildcard matching used to decide whether an inbound
//! PUBLISH belongs to one of the session's subscriptions.

use thiserror::Error;

/// Longest topic the wire format can carry
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Validation errors for topic names and filters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,
    #[error("topic is {0} bytes, longer than 65535")]
    TooLong(usize),
    #[error("topic contains a NUL character")]
    NulCharacter,
    #[error("topic name cannot contain wildcard '{0}'")]
    WildcardInName(char),
    #[error("'+' must occupy an entire topic level")]
    InvalidSingleLevelWildcard,
    #[error("'#' must be the last character and occupy an entire topic level")]
    InvalidMultiLevelWildcard,
}

/// Validate a topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;

    if let Some(wildcard) = topic.chars().find(|c| *c == '+' || *c == '#') {
        return Err(TopicError::WildcardInName(wildcard));
    }

    Ok(())
}

/// Validate a topic filter used for subscribing
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(TopicError::InvalidSingleLevelWildcard);
        }
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::InvalidMultiLevelWildcard);
        }
    }

    Ok(())
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// Check whether an inbound topic name matches a subscription filter
///
/// The topic is raw bytes straight from the wire. Wildcards at the first
/// level never match topics starting with `$`.
pub fn topic_matches(filter: &str, topic: &[u8]) -> bool {
    if topic.first() == Some(&b'$') && matches!(filter.as_bytes().first(), Some(b'+' | b'#')) {
        return false;
    }

    let mut filter_levels = filter.as_bytes().split(|b| *b == b'/');
    let mut topic_levels = topic.split(|b| *b == b'/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // "sport/#" also matches "sport" itself
            (Some(b"#"), _) => return true,
            (Some(b"+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
