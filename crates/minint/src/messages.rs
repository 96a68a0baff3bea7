use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
#[serde(rename_all = "lowercase", tag = "method", content = "params")]
pub enum ClientMsg {
    /// Publish Request Message
    ///
    /// Sent from a client to the server to indicate the client wants to start publishing values at the given topic. The server shall respond with a Topic Announcement Message ([ServerMsg::Announce]), even if the topic was previously announced.
    Publish {
        /// The topic name being published
        name: String,
        /// A client-generated unique identifier for this publisher. Also used in MessagePack value frames.
        pubuid: i32,
        /// The requested data type (as a string)
        r#type: String,
        /// Initial topic properties, ignored if the topic already exists
        #[serde(skip_serializing_if = "Option::is_none")]
        properties: Option<PublishProps>,
    },
    /// Publish Release Message
    ///
    /// When there are no remaining publishers for a non-persistent topic, the server deletes the topic.
    Unpublish {
        /// The same unique identifier passed to the [ClientMsg::Publish] message
        pubuid: i32,
    },
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "lowercase", tag = "method", content = "params")]
pub enum ServerMsg {
    /// Topic Announcement Message
    ///
    /// Sent to a client in response to a publish request, and to subscribers when a topic is created.
    Announce {
        name: String,
        /// The identifier that the server will use in MessagePack messages for this topic
        id: i32,
        r#type: String,
        /// Present if this message was sent in response to one of our publish messages
        pubuid: Option<i32>,
        #[serde(default)]
        properties: BTreeMap<String, serde_json::Value>,
    },

    /// Topic Removed Message
    Unannounce { name: String, id: i32 },

    /// Properties Update Message
    Properties {
        name: String,
        #[serde(default)]
        ack: bool,
    },
}

/// Topic properties sent along with a publish request
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishProps {
    /// Keep the topic around across server restarts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    /// Keep the topic around after the last publisher goes away
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained: Option<bool>,
    /// Have the server keep the last value for new subscribers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}
