//! Log bus topic definitions
//!
//! A deployment's log channel is `logs:<deploymentId>`. MQTT only allows
//! wildcards on whole topic levels, so the separator is a level boundary on
//! the wire: `logs/<deploymentId>`, and the all-deployments pattern is
//! `logs/+`.

/// Log bus topic patterns
pub struct Topics;

impl Topics {
    /// Topic prefix shared by all deployment log channels
    pub const LOGS_PREFIX: &'static str = "logs";

    /// Pattern matching every deployment log topic
    pub const LOGS_PATTERN: &'static str = "logs/+";

    /// Log topic of a deployment
    pub fn deployment_logs(deployment_id: &str) -> String {
        format!("{}/{}", Self::LOGS_PREFIX, deployment_id)
    }

    /// Parse a log topic to extract the deployment ID
    pub fn parse_deployment_id(topic: &str) -> Option<String> {
        let id = topic.strip_prefix(Self::LOGS_PREFIX)?.strip_prefix('/')?;
        if id.is_empty() || id.contains('/') {
            None
        } else {
            Some(id.to_string())
        }
    }

    /// Normalize a client-requested channel name to a deployment id.
    ///
    /// Accepts `logs:<id>`, `logs/<id>` and a bare `<id>`.
    pub fn channel_group(channel: &str) -> String {
        let channel = channel.trim();
        channel
            .strip_prefix("logs:")
            .or_else(|| channel.strip_prefix("logs/"))
            .unwrap_or(channel)
            .to_string()
    }
}
