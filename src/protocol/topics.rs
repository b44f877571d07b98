//! Telemetry topic composition and segment validation
//!
//! The telemetry topic is `root/site/location/sensor`. It is composed once at
//! startup and stays fixed for the lifetime of the process.

use thiserror::Error;

/// Compose the telemetry topic from its configured segments
pub fn compose_topic(root: &str, site: &str, location: &str, sensor: &str) -> String {
    format!("{root}/{site}/{location}/{sensor}")
}

/// Validate a single topic segment
///
/// Segments are case-sensitive and may not be empty, contain the level
/// separator or either MQTT wildcard.
pub fn validate_segment(name: &'static str, value: &str) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::EmptySegment(name));
    }

    for ch in value.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(TopicError::InvalidSegmentChar { segment: name, ch });
        }
    }

    Ok(())
}

/// Validate a subscription filter (wildcards allowed)
pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::EmptyFilter);
    }
    if filter.chars().any(char::is_control) {
        return Err(TopicError::InvalidFilter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        let is_last = index == levels.len() - 1;
        let bad_hash = level.contains('#') && (*level != "#" || !is_last);
        let bad_plus = level.contains('+') && *level != "+";
        if bad_hash || bad_plus {
            return Err(TopicError::InvalidFilter(filter.to_string()));
        }
    }

    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic segment '{0}' cannot be empty")]
    EmptySegment(&'static str),
    #[error("Topic segment '{segment}' contains invalid character: '{ch}'")]
    InvalidSegmentChar { segment: &'static str, ch: char },
    #[error("Subscription filter cannot be empty")]
    EmptyFilter,
    #[error("Invalid subscription filter: {0}")]
    InvalidFilter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compose_topic() {
        assert_eq!(
            compose_topic("site", "a", "loc", "sensor1"),
            "site/a/loc/sensor1"
        );
        assert_eq!(
            compose_topic("telemetry", "farm", "greenhouse-1", "am2315"),
            "telemetry/farm/greenhouse-1/am2315"
        );
    }

    #[test]
    fn test_topic_is_case_sensitive() {
        assert_ne!(
            compose_topic("Site", "A", "loc", "s"),
            compose_topic("site", "a", "loc", "s")
        );
    }

    #[test]
    fn test_segment_validation_examples() {
        assert!(validate_segment("location", "greenhouse-1").is_ok());
        assert!(validate_segment("location", "Green House").is_ok());

        assert_eq!(
            validate_segment("location", ""),
            Err(TopicError::EmptySegment("location"))
        );
        assert_eq!(
            validate_segment("site_name", "a/b"),
            Err(TopicError::InvalidSegmentChar {
                segment: "site_name",
                ch: '/'
            })
        );
        assert!(validate_segment("root", "tele+metry").is_err());
        assert!(validate_segment("root", "#").is_err());
        assert!(validate_segment("root", "line\nbreak").is_err());
    }

    #[test]
    fn test_filter_validation_examples() {
        assert!(validate_filter("site/a/loc/sensor1").is_ok());
        assert!(validate_filter("commands/+/reset").is_ok());
        assert!(validate_filter("commands/#").is_ok());
        assert!(validate_filter("#").is_ok());

        assert_eq!(validate_filter(""), Err(TopicError::EmptyFilter));
        assert!(validate_filter("commands/#/reset").is_err());
        assert!(validate_filter("commands/a+").is_err());
        assert!(validate_filter("commands/#x").is_err());
    }

    proptest! {
        #[test]
        fn composed_topic_has_four_levels(
            root in "[a-zA-Z0-9._-]{1,16}",
            site in "[a-zA-Z0-9._-]{1,16}",
            location in "[a-zA-Z0-9._ -]{1,16}",
            sensor in "[a-zA-Z0-9._-]{1,16}",
        ) {
            let topic = compose_topic(&root, &site, &location, &sensor);
            let levels: Vec<&str> = topic.split('/').collect();
            prop_assert_eq!(levels, vec![root.as_str(), site.as_str(), location.as_str(), sensor.as_str()]);
            prop_assert!(validate_filter(&topic).is_ok());
        }

        #[test]
        fn segments_with_separator_rejected(
            prefix in "[a-z]{0,8}",
            suffix in "[a-z]{0,8}",
        ) {
            let value = format!("{prefix}/{suffix}");
            prop_assert!(validate_segment("sensor_name", &value).is_err());
        }
    }
}
