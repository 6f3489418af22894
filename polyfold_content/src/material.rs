use polyfold_shared::nalgebra::Vector4;

use crate::ImageHandle;

/// Where the base color of a material comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseColor {
    /// Linear RGBA color
    Constant(Vector4<f32>),
    /// Color attribute of the mesh with the given name
    Attribute(String),
    Image(ImageHandle),
}

/// Minimal PBR material that is attached to a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: BaseColor,
    /// Tangent space normal map that replaces the shading normal
    pub normal_map: Option<ImageHandle>,
    pub roughness: f32,
    pub metallic: f32,
}

impl Material {
    pub const DEFAULT_BASE_COLOR: Vector4<f32> = Vector4::new(0.8, 0.8, 0.8, 1.0);

    /// Creates a grey material.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: BaseColor::Constant(Self::DEFAULT_BASE_COLOR),
            normal_map: None,
            roughness: 0.5,
            metallic: 0.0,
        }
    }

    /// Creates a material that reads the base color from the color attribute with the given name.
    pub fn from_color_attribute(name: impl Into<String>, attribute_name: impl Into<String>) -> Self {
        Self::new(name).with_base_color(BaseColor::Attribute(attribute_name.into()))
    }

    pub fn with_base_color(mut self, base_color: BaseColor) -> Self {
        self.base_color = base_color;
        self
    }

    pub fn with_normal_map(mut self, normal_map: ImageHandle) -> Self {
        self.normal_map = Some(normal_map);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    /// Returns the image used for the base color if there is one.
    pub fn base_color_image(&self) -> Option<ImageHandle> {
        match &self.base_color {
            BaseColor::Image(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Returns the images that this material references.
    pub fn images(&self) -> impl Iterator<Item = ImageHandle> {
        self.base_color_image().into_iter().chain(self.normal_map)
    }
}
