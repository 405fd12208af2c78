use glam::Vec3;

/// Directional sun light. Position and color are driven by the day/night cycle outside
/// the renderer and only read here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
}

impl Light {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn terms(&self) -> LightTerms {
        LightTerms::from_color(self.color)
    }
}

/// Phong light components derived from the sun color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightTerms {
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
}

impl LightTerms {
    pub const AMBIENT_SCALE: f32 = 0.3;
    pub const SPECULAR_SCALE: f32 = 0.8;

    pub fn from_color(color: Vec3) -> Self {
        Self { ambient: color * Self::AMBIENT_SCALE, diffuse: color, specular: color * Self::SPECULAR_SCALE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_scale_the_sun_color() {
        let terms = Light::new(Vec3::new(0.0, 200.0, 0.0), Vec3::new(1.0, 0.5, 0.25)).terms();
        assert!(terms.ambient.abs_diff_eq(Vec3::new(0.3, 0.15, 0.075), 1e-6));
        assert_eq!(terms.diffuse, Vec3::new(1.0, 0.5, 0.25));
        assert!(terms.specular.abs_diff_eq(Vec3::new(0.8, 0.4, 0.2), 1e-6));
    }
}
