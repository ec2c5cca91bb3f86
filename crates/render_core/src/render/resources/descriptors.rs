//! Creation descriptors and format enums

use serde::{Serialize, Deserialize};

use crate::render::api::DepthFunc;

/// Mutability contract of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceUsage {
    /// Frequently rewritten; any in-bounds sub-range may be updated
    Dynamic,
    /// Written once at creation, never updated
    Immutable,
    /// Updated rarely, and only as a whole
    #[default]
    Default,
}

impl ResourceUsage {
    /// Check an update of `len` bytes at `offset` into a resource of `size` bytes
    ///
    /// Returns a human readable rejection reason.
    pub fn check_update(self, size: usize, offset: usize, len: usize) -> Result<(), String> {
        match self {
            Self::Immutable => Err("resource is immutable".to_string()),
            Self::Default if offset != 0 || len != size => Err(format!(
                "default-usage resources must be updated whole ({size} bytes at offset 0), got {len} bytes at offset {offset}"
            )),
            _ => match offset.checked_add(len) {
                Some(end) if end <= size => Ok(()),
                _ => Err(format!(
                    "{len} bytes at offset {offset} exceed the {size} byte resource"
                )),
            },
        }
    }
}

/// Scalar layout of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// Two 32-bit floats
    Float2,
    /// Three 32-bit floats
    Float3,
    /// Four 32-bit floats
    Float4,
}

impl AttributeFormat {
    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// One attribute inside an interleaved vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Scalar layout
    pub format: AttributeFormat,
    /// Byte offset inside the vertex
    pub offset: u32,
}

const fn attr(location: u32, format: AttributeFormat, offset: u32) -> VertexAttribute {
    VertexAttribute { location, format, offset }
}

const POSITION: &[VertexAttribute] = &[attr(0, AttributeFormat::Float3, 0)];
const POSITION_TEXCOORD: &[VertexAttribute] = &[
    attr(0, AttributeFormat::Float3, 0),
    attr(1, AttributeFormat::Float2, 12),
];
const POSITION_NORMAL: &[VertexAttribute] = &[
    attr(0, AttributeFormat::Float3, 0),
    attr(1, AttributeFormat::Float3, 12),
];
const POSITION_NORMAL_TEXCOORD: &[VertexAttribute] = &[
    attr(0, AttributeFormat::Float3, 0),
    attr(1, AttributeFormat::Float3, 12),
    attr(2, AttributeFormat::Float2, 24),
];
const POSITION_COLOR: &[VertexAttribute] = &[
    attr(0, AttributeFormat::Float3, 0),
    attr(1, AttributeFormat::Float4, 12),
];

/// Interleaved vertex layouts understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexFormat {
    /// vec3 position
    Position,
    /// vec3 position, vec2 texcoord (text and sprites)
    PositionTexcoord,
    /// vec3 position, vec3 normal
    PositionNormal,
    /// vec3 position, vec3 normal, vec2 texcoord
    PositionNormalTexcoord,
    /// vec3 position, vec4 color
    PositionColor,
}

impl VertexFormat {
    /// Attribute table in location order
    pub fn attributes(self) -> &'static [VertexAttribute] {
        match self {
            Self::Position => POSITION,
            Self::PositionTexcoord => POSITION_TEXCOORD,
            Self::PositionNormal => POSITION_NORMAL,
            Self::PositionNormalTexcoord => POSITION_NORMAL_TEXCOORD,
            Self::PositionColor => POSITION_COLOR,
        }
    }

    /// Size of one vertex in bytes
    pub fn stride(self) -> u32 {
        self.attributes().iter().map(|a| a.format.size()).sum()
    }
}

/// Index width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes
    pub fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Texel formats for textures and color targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// Single 8-bit channel (glyph atlases)
    R8,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit RGBA, sRGB encoded
    Rgba8Srgb,
    /// 32-bit float RGBA
    Rgba32F,
}

impl TextureFormat {
    /// Bytes per texel
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::Rgba8Srgb => 4,
            Self::Rgba32F => 16,
        }
    }
}

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Nearest texel
    Nearest,
    /// Bilinear
    #[default]
    Linear,
}

/// Texture coordinate wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressMode {
    /// Tile
    #[default]
    Repeat,
    /// Tile with mirroring
    MirroredRepeat,
    /// Clamp to the edge texel
    ClampToEdge,
    /// Clamp to the border color
    ClampToBorder,
}

/// Sampler configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescriptor {
    /// Minification filter
    pub min_filter: FilterMode,
    /// Magnification filter
    pub mag_filter: FilterMode,
    /// Wrapping along U
    pub address_u: AddressMode,
    /// Wrapping along V
    pub address_v: AddressMode,
    /// Wrapping along W
    pub address_w: AddressMode,
    /// Depth comparison for shadow lookups
    pub comparison: Option<DepthFunc>,
    /// Maximum anisotropy, 1.0 disables
    pub max_anisotropy: f32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            comparison: None,
            max_anisotropy: 1.0,
        }
    }
}

/// Buffer creation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferDescriptor<'a> {
    /// Contents at creation; required for immutable buffers
    pub initial_data: Option<&'a [u8]>,
    /// Size in bytes
    pub size: usize,
    /// Mutability contract
    pub usage: ResourceUsage,
}

impl<'a> BufferDescriptor<'a> {
    /// Buffer filled with `data` that can never change
    pub fn immutable(data: &'a [u8]) -> Self {
        Self {
            initial_data: Some(data),
            size: data.len(),
            usage: ResourceUsage::Immutable,
        }
    }

    /// Zero-initialized buffer updated piecewise
    pub fn dynamic(size: usize) -> Self {
        Self {
            initial_data: None,
            size,
            usage: ResourceUsage::Dynamic,
        }
    }

    /// Buffer filled with `data` under an explicit usage
    pub fn with_data(data: &'a [u8], usage: ResourceUsage) -> Self {
        Self {
            initial_data: Some(data),
            size: data.len(),
            usage,
        }
    }
}

/// Texture creation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDescriptor<'a> {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: TextureFormat,
    /// Contents at creation; required for immutable textures
    pub initial_data: Option<&'a [u8]>,
    /// Mutability contract
    pub usage: ResourceUsage,
}

impl<'a> TextureDescriptor<'a> {
    /// Immutable texture filled with `data`
    pub fn immutable(width: u32, height: u32, format: TextureFormat, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            format,
            initial_data: Some(data),
            usage: ResourceUsage::Immutable,
        }
    }

    /// Dynamic texture, zero-filled until its first update
    pub fn dynamic(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            initial_data: None,
            usage: ResourceUsage::Dynamic,
        }
    }

    /// Size of a full upload in bytes
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel()
    }
}

/// Texel rectangle of a 2D texture update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    /// Left column
    pub x: u32,
    /// Top row
    pub y: u32,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

impl TextureRegion {
    /// Rectangle at (`x`, `y`)
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole `width` x `height` texture
    pub fn whole(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Texels inside the rectangle
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Shader program creation request
///
/// Stage code is backend specific: SPIR-V words for Vulkan, anything
/// non-empty for the headless driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderDescriptor<'a> {
    /// Debug name
    pub name: &'a str,
    /// Vertex stage code
    pub vertex_code: &'a [u8],
    /// Fragment stage code
    pub fragment_code: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_strides() {
        assert_eq!(VertexFormat::Position.stride(), 12);
        assert_eq!(VertexFormat::PositionTexcoord.stride(), 20);
        assert_eq!(VertexFormat::PositionNormalTexcoord.stride(), 32);
        assert_eq!(VertexFormat::PositionColor.stride(), 28);
    }

    #[test]
    fn test_update_rules_per_usage() {
        assert!(ResourceUsage::Immutable.check_update(64, 0, 64).is_err());

        assert!(ResourceUsage::Default.check_update(64, 0, 64).is_ok());
        assert!(ResourceUsage::Default.check_update(64, 16, 16).is_err());

        assert!(ResourceUsage::Dynamic.check_update(64, 16, 16).is_ok());
        assert!(ResourceUsage::Dynamic.check_update(64, 60, 8).is_err());
        assert!(ResourceUsage::Dynamic.check_update(64, usize::MAX, 2).is_err());
    }
}
