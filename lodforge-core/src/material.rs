//! Material slots and their semantic texture channels

use crate::point::Point2f;
use crate::texture::{Texture, TextureFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Semantic channel of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialChannel {
    Albedo,
    /// Tangent-space normal map, encoded in [0, 1]
    Normal,
    Roughness,
    Metallic,
    Specular,
    Emissive,
    Opacity,
    AmbientOcclusion,
}

impl MaterialChannel {
    pub const ALL: [MaterialChannel; 8] = [
        MaterialChannel::Albedo,
        MaterialChannel::Normal,
        MaterialChannel::Roughness,
        MaterialChannel::Metallic,
        MaterialChannel::Specular,
        MaterialChannel::Emissive,
        MaterialChannel::Opacity,
        MaterialChannel::AmbientOcclusion,
    ];

    /// Value used when a slot does not provide the channel
    pub fn default_value(self) -> [f32; 4] {
        match self {
            MaterialChannel::Albedo => [1.0, 1.0, 1.0, 1.0],
            MaterialChannel::Normal => [0.5, 0.5, 1.0, 1.0],
            MaterialChannel::Roughness => [0.5, 0.5, 0.5, 1.0],
            MaterialChannel::Metallic => [0.0, 0.0, 0.0, 1.0],
            MaterialChannel::Specular => [0.5, 0.5, 0.5, 1.0],
            MaterialChannel::Emissive => [0.0, 0.0, 0.0, 1.0],
            MaterialChannel::Opacity => [1.0, 1.0, 1.0, 1.0],
            MaterialChannel::AmbientOcclusion => [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Where a channel's values come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelSource {
    Texture(Arc<Texture>),
    Constant([f32; 4]),
}

impl ChannelSource {
    pub fn sample(&self, uv: Point2f, filter: TextureFilter) -> [f32; 4] {
        match self {
            ChannelSource::Texture(texture) => texture.sample(uv, filter),
            ChannelSource::Constant(value) => *value,
        }
    }
}

/// A material slot: a named set of channel sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSlot {
    pub name: String,
    pub channels: BTreeMap<MaterialChannel, ChannelSource>,
}

impl MaterialSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: BTreeMap::new(),
        }
    }

    pub fn with_texture(mut self, channel: MaterialChannel, texture: Arc<Texture>) -> Self {
        self.channels.insert(channel, ChannelSource::Texture(texture));
        self
    }

    pub fn with_constant(mut self, channel: MaterialChannel, value: [f32; 4]) -> Self {
        self.channels.insert(channel, ChannelSource::Constant(value));
        self
    }

    /// True when any channel is backed by a texture and so needs UVs
    pub fn has_textures(&self) -> bool {
        self.channels
            .values()
            .any(|s| matches!(s, ChannelSource::Texture(_)))
    }

    /// Sample a channel, falling back to the channel's default constant
    pub fn sample(&self, channel: MaterialChannel, uv: Point2f, filter: TextureFilter) -> [f32; 4] {
        match self.channels.get(&channel) {
            Some(source) => source.sample(uv, filter),
            None => channel.default_value(),
        }
    }
}

impl Default for MaterialSlot {
    fn default() -> Self {
        Self::new("default")
    }
}
