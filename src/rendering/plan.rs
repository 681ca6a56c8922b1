use serde::{Deserialize, Serialize};

use crate::core::geo::TileKey;
use crate::rendering::texture::TextureId;

/// Upscale filter used when sampling a level's textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    #[default]
    Linear,
    HighQuality,
}

/// Axis-aligned rectangle in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DeviceRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// One textured quad to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub key: TileKey,
    pub level: u8,
    pub dest: DeviceRect,
    pub alpha: f32,
    pub filter: FilterMode,
    pub texture: TextureId,
}

/// Ordered draw commands for one frame, back to front. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawPlan {
    commands: Vec<DrawCommand>,
}

impl DrawPlan {
    pub(crate) fn new(commands: Vec<DrawCommand>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DrawCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Distinct levels in draw order.
    pub fn levels(&self) -> Vec<u8> {
        let mut levels: Vec<u8> = Vec::new();
        for cmd in &self.commands {
            if levels.last() != Some(&cmd.level) {
                levels.push(cmd.level);
            }
        }
        levels
    }

    pub fn for_level(&self, level: u8) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter().filter(move |cmd| cmd.level == level)
    }
}

impl<'a> IntoIterator for &'a DrawPlan {
    type Item = &'a DrawCommand;
    type IntoIter = std::slice::Iter<'a, DrawCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(level: u8) -> DrawCommand {
        DrawCommand {
            key: TileKey::new(level, 0, 0),
            level,
            dest: DeviceRect::new(0.0, 0.0, 256.0, 256.0),
            alpha: 1.0,
            filter: FilterMode::Linear,
            texture: TextureId(level as u64),
        }
    }

    #[test]
    fn test_levels_in_draw_order() {
        let plan = DrawPlan::new(vec![cmd(1), cmd(1), cmd(3), cmd(4)]);
        assert_eq!(plan.levels(), vec![1, 3, 4]);
        assert_eq!(plan.for_level(1).count(), 2);
        assert_eq!((&plan).into_iter().count(), 4);
    }
}
