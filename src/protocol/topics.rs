//! MQTT topic naming for the queue channels

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Topic a channel's messages are published on
pub fn channel_topic(prefix: &str, channel_name: &str) -> String {
    canonicalize_topic(&format!("/{prefix}/queues/{channel_name}"))
}

/// Subscription filter; shared when a group is configured so that several
/// workers split one channel between them
pub fn subscription_filter(topic: &str, share_group: Option<&str>) -> String {
    match share_group.filter(|group| !group.is_empty()) {
        Some(group) => format!("$share/{group}{topic}"),
        None => topic.to_string(),
    }
}
