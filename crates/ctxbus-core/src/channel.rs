//! Channel descriptors
//!
//! Descriptors are what applications enumerate. The per-channel context
//! cache lives in the state crate; a descriptor never carries it.

use serde::{Deserialize, Serialize};

use crate::ChannelId;

/// Channel classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// User-facing channel from the fixed system set
    #[default]
    System,
}

/// Hints for presenting a channel to the user
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyph: Option<String>,
}

impl DisplayMetadata {
    pub fn new(name: &str, color: &str, glyph: &str) -> Self {
        DisplayMetadata {
            name: Some(name.to_string()),
            color: Some(color.to_string()),
            glyph: Some(glyph.to_string()),
        }
    }
}

/// Channel descriptor as published by `getSystemChannels`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub display_metadata: DisplayMetadata,
}

impl ChannelDescriptor {
    pub fn system(id: impl Into<ChannelId>) -> Self {
        ChannelDescriptor {
            id: id.into(),
            kind: ChannelKind::System,
            display_metadata: DisplayMetadata::default(),
        }
    }

    pub fn with_display(mut self, display_metadata: DisplayMetadata) -> Self {
        self.display_metadata = display_metadata;
        self
    }
}

/// The six FDC3 1.2 user channels, in presentation order
pub fn fdc3_system_channels() -> Vec<ChannelDescriptor> {
    [
        ("red", "Red", "#FF0000", "1"),
        ("orange", "Orange", "#FF8000", "2"),
        ("yellow", "Yellow", "#FFFF00", "3"),
        ("green", "Green", "#00FF00", "4"),
        ("blue", "Blue", "#0000FF", "5"),
        ("purple", "Purple", "#FF00FF", "6"),
    ]
    .into_iter()
    .map(|(id, name, color, glyph)| {
        ChannelDescriptor::system(id).with_display(DisplayMetadata::new(name, color, glyph))
    })
    .collect()
}
