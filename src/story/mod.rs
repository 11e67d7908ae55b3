//! 故事层：产物类型与故事引擎

pub mod artifact;
pub mod engine;

pub use artifact::{Character, CharacterUpdate, Choice, SceneArtifact};
pub use engine::{SceneTurn, StoryEngine};
