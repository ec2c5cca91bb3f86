//! Pipeline state values
//!
//! Every persistent driver setting the renderer can change is one
//! [`PipelineState`] value. Each value belongs to exactly one
//! [`StateCategory`]; the state cache remembers the last committed value per
//! category.

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    /// Never passes
    Never,
    /// Always passes
    Always,
    /// Passes if incoming < stored
    Less,
    /// Passes if incoming <= stored
    LessEqual,
    /// Passes if incoming == stored
    Equal,
    /// Passes if incoming >= stored
    GreaterEqual,
    /// Passes if incoming > stored
    Greater,
    /// Passes if incoming != stored
    NotEqual,
}

/// Which triangle faces are discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMethod {
    /// Discard front faces
    Front,
    /// Discard back faces
    Back,
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    /// Filled triangles
    Fill,
    /// Edges only
    Wireframe,
    /// Vertices only
    Point,
}

/// How source and destination terms are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    /// src + dst
    Add,
    /// src - dst
    Subtract,
    /// dst - src
    ReverseSubtract,
    /// min(src, dst)
    Min,
    /// max(src, dst)
    Max,
}

/// Blend factor applied to source or destination color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// (0, 0, 0, 0)
    Zero,
    /// (1, 1, 1, 1)
    One,
    /// Source color
    SrcColor,
    /// 1 - source color
    OneMinusSrcColor,
    /// Destination color
    DstColor,
    /// 1 - destination color
    OneMinusDstColor,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// Destination alpha
    DstAlpha,
    /// 1 - destination alpha
    OneMinusDstAlpha,
    /// min(source alpha, 1 - destination alpha)
    SrcAlphaSaturate,
}

/// Cacheable pipeline state categories, one per [`PipelineState`] variant
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateCategory {
    DepthTest,
    DepthWrite,
    ColorWrite,
    DepthFunc,
    CullMethod,
    FillMode,
    Blending,
    BlendEquation,
    BlendFactor,
}

impl StateCategory {
    /// Number of categories
    pub const COUNT: usize = 9;

    /// Every category in slot order
    pub const ALL: [StateCategory; Self::COUNT] = [
        Self::DepthTest,
        Self::DepthWrite,
        Self::ColorWrite,
        Self::DepthFunc,
        Self::CullMethod,
        Self::FillMode,
        Self::Blending,
        Self::BlendEquation,
        Self::BlendFactor,
    ];

    /// Slot index inside the state cache
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One value for one pipeline state category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Depth testing on/off
    DepthTest(bool),
    /// Depth buffer writes on/off
    DepthWrite(bool),
    /// Color buffer writes on/off
    ColorWrite(bool),
    /// Depth comparison function
    DepthFunc(DepthFunc),
    /// Face culling
    CullMethod(CullMethod),
    /// Rasterization mode
    FillMode(FillMode),
    /// Alpha blending on/off
    Blending(bool),
    /// Blend equation
    BlendEquation(BlendEquation),
    /// Source and destination blend factors
    BlendFactor {
        /// Factor applied to the incoming fragment
        src: BlendFactor,
        /// Factor applied to the stored color
        dst: BlendFactor,
    },
}

impl PipelineState {
    /// Category this value belongs to
    pub fn category(&self) -> StateCategory {
        match self {
            Self::DepthTest(_) => StateCategory::DepthTest,
            Self::DepthWrite(_) => StateCategory::DepthWrite,
            Self::ColorWrite(_) => StateCategory::ColorWrite,
            Self::DepthFunc(_) => StateCategory::DepthFunc,
            Self::CullMethod(_) => StateCategory::CullMethod,
            Self::FillMode(_) => StateCategory::FillMode,
            Self::Blending(_) => StateCategory::Blending,
            Self::BlendEquation(_) => StateCategory::BlendEquation,
            Self::BlendFactor { .. } => StateCategory::BlendFactor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_slots_are_dense() {
        for (i, category) in StateCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_values_map_to_their_category() {
        assert_eq!(PipelineState::DepthTest(true).category(), StateCategory::DepthTest);
        assert_eq!(
            PipelineState::BlendFactor { src: BlendFactor::SrcAlpha, dst: BlendFactor::OneMinusSrcAlpha }.category(),
            StateCategory::BlendFactor
        );
    }
}
