//! Pub/sub topic definitions

/// Topic patterns shared with the device agent
pub struct Topics;

impl Topics {
    /// Per-user topic the agent answers command requests on
    pub fn user_responses(user_id: &str) -> String {
        format!("tapflow/user/{}/responses", user_id)
    }

    /// Device command topic (inspect, list apps, ...)
    pub fn device_command(device_id: &str) -> String {
        format!("tapflow/device/{}/command", device_id)
    }

    /// Device gesture execution topic
    pub fn device_execute(device_id: &str) -> String {
        format!("tapflow/device/{}/execute", device_id)
    }

    /// Gesture completion topic
    pub fn action_results(device_id: &str) -> String {
        format!("tapflow/device/{}/action_result", device_id)
    }

    /// Recording lifecycle and event topic
    pub fn recording_events(device_id: &str) -> String {
        format!("tapflow/device/{}/recording", device_id)
    }

    /// Recording topics of every device
    pub fn all_recording_events() -> String {
        "tapflow/device/+/recording".to_string()
    }

    /// Parse a topic to extract the device ID
    pub fn parse_device_id(topic: &str) -> Option<String> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() >= 3 && parts[0] == "tapflow" && parts[1] == "device" {
            Some(parts[2].to_string())
        } else {
            None
        }
    }

    /// Check if topic is a recording topic
    pub fn is_recording_topic(topic: &str) -> bool {
        topic.starts_with("tapflow/device/") && topic.ends_with("/recording")
    }

    /// Check if topic is an action result topic
    pub fn is_action_result_topic(topic: &str) -> bool {
        topic.starts_with("tapflow/device/") && topic.ends_with("/action_result")
    }

    /// MQTT-style filter match with `+` and `#` wildcards
    pub fn matches(filter: &str, topic: &str) -> bool {
        let mut filter_parts = filter.split('/');
        let mut topic_parts = topic.split('/');
        loop {
            match (filter_parts.next(), topic_parts.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => {}
                (Some(f), Some(t)) if f == t => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}
