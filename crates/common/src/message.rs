//! Inbound chat message model handed to every handler.

use serde::{Deserialize, Serialize};

/// Kind of conversation a message was posted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Channel,
    /// One-to-one direct message.
    Im,
    /// Multi-party direct message.
    Mpim,
    /// Private channel.
    Group,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Im => "im",
            Self::Mpim => "mpim",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(Self::Channel),
            "im" => Ok(Self::Im),
            "mpim" => Ok(Self::Mpim),
            "group" => Ok(Self::Group),
            other => Err(crate::Error::message(format!(
                "unknown channel type '{other}'"
            ))),
        }
    }
}

/// A chat message event as seen by handlers.
///
/// The value is immutable for the duration of a dispatch. Handlers request
/// side effects through their invocation context, never by editing this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque channel id.
    pub channel: String,
    pub channel_name: String,
    pub channel_type: ChannelType,
    pub user: String,
    pub text: String,
    pub timestamp: String,
    /// Parent timestamp; empty unless this is a thread reply.
    pub thread_timestamp: String,
    pub is_thread: bool,
    #[serde(rename = "isDM")]
    pub is_dm: bool,
    pub is_bot: bool,
    pub is_staff: bool,
    pub bot_id: String,
    pub sub_type: String,
}

impl Message {
    /// Build a plain channel message with derived flags filled in.
    pub fn new(
        channel: impl Into<String>,
        channel_name: impl Into<String>,
        user: impl Into<String>,
        text: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            kind: "message".into(),
            channel: channel.into(),
            channel_name: channel_name.into(),
            user: user.into(),
            text: text.into(),
            timestamp: timestamp.into(),
            ..Self::default()
        }
        .with_derived_flags()
    }

    /// Recompute `is_thread`, `is_dm` and `is_bot` from the raw event fields.
    ///
    /// Flags already set by the caller are kept; derivation only turns them on.
    #[must_use]
    pub fn with_derived_flags(mut self) -> Self {
        self.is_thread |= !self.thread_timestamp.is_empty();
        self.is_dm |= self.channel_type == ChannelType::Im;
        self.is_bot |= !self.bot_id.is_empty() || self.sub_type == "bot_message";
        self
    }

    #[must_use]
    pub fn in_thread(mut self, thread_timestamp: impl Into<String>) -> Self {
        self.thread_timestamp = thread_timestamp.into();
        self.with_derived_flags()
    }

    #[must_use]
    pub fn from_bot(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = bot_id.into();
        self.with_derived_flags()
    }

    #[must_use]
    pub fn with_channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self.with_derived_flags()
    }

    /// Timestamp replies should be threaded under.
    ///
    /// Replies always go in-thread: the existing thread if there is one,
    /// otherwise a new thread rooted at this message.
    pub fn reply_thread_ts(&self) -> &str {
        if self.thread_timestamp.is_empty() {
            &self.timestamp
        } else {
            &self.thread_timestamp
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn derived_flags_for_plain_message() {
        let msg = Message::new("C1", "general", "U1", "hi", "1.0");
        assert!(!msg.is_thread);
        assert!(!msg.is_dm);
        assert!(!msg.is_bot);
        assert_eq!(msg.reply_thread_ts(), "1.0");
    }

    #[test]
    fn thread_reply_uses_parent_ts() {
        let msg = Message::new("C1", "general", "U1", "hi", "2.0").in_thread("1.0");
        assert!(msg.is_thread);
        assert_eq!(msg.reply_thread_ts(), "1.0");
    }

    #[test]
    fn bot_detection() {
        let msg = Message::new("C1", "general", "U1", "beep", "1.0").from_bot("B42");
        assert!(msg.is_bot);

        let mut msg = Message::new("C1", "general", "U1", "beep", "1.0");
        msg.sub_type = "bot_message".into();
        assert!(msg.with_derived_flags().is_bot);
    }

    #[rstest]
    #[case(ChannelType::Im, true)]
    #[case(ChannelType::Mpim, false)]
    #[case(ChannelType::Channel, false)]
    #[case(ChannelType::Group, false)]
    fn dm_detection(#[case] kind: ChannelType, #[case] dm: bool) {
        let msg = Message::new("D1", "", "U1", "hi", "1.0").with_channel_type(kind);
        assert_eq!(msg.is_dm, dm);
    }

    #[test]
    fn serializes_with_handler_field_names() {
        let msg = Message::new("C1", "general", "U1", "hi", "1.0");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["channelName"], "general");
        assert_eq!(json["channelType"], "channel");
        assert_eq!(json["isDM"], false);
        assert_eq!(json["type"], "message");
        assert_eq!(json["threadTimestamp"], "");
    }

    #[test]
    fn deserializes_partial_event() {
        let msg: Message =
            serde_json::from_str(r#"{"channelName":"random","text":"yo","channelType":"im"}"#)
                .unwrap();
        assert_eq!(msg.channel_type, ChannelType::Im);
        assert!(msg.with_derived_flags().is_dm);
    }

    #[test]
    fn channel_type_from_str() {
        assert_eq!("mpim".parse::<ChannelType>().unwrap(), ChannelType::Mpim);
        assert!("forum".parse::<ChannelType>().is_err());
    }
}
